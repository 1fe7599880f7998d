use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ANCHOR_EVENT_TYPES: &[&str] = &["OOMKill", "CrashLoopBackOff", "ContainerTerminated"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub timestamp: String,
    pub event_type: String,
    #[serde(default)]
    pub pattern_id: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub pod_uid: String,
    #[serde(default = "empty_object")]
    pub payload: Value,
}

impl EventRecord {
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && !self.timestamp.is_empty() && !self.event_type.is_empty()
    }

    pub fn is_anchor_type(&self) -> bool {
        ANCHOR_EVENT_TYPES.contains(&self.event_type.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: String,
    pub timestamp: String,
    pub object_kind: String,
    pub object_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub trigger_event: String,
    #[serde(default = "empty_object")]
    pub state: Value,
}

impl SnapshotRecord {
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty()
            && !self.timestamp.is_empty()
            && !self.object_kind.is_empty()
            && !self.object_name.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CausalEdge {
    pub id: String,
    pub cause_event_id: String,
    pub effect_event_id: String,
    pub pattern_id: String,
    pub confidence: f32,
    pub edge_type: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

pub fn parse_event_line(line: &str) -> Option<EventRecord> {
    serde_json::from_str::<EventRecord>(line.trim())
        .ok()
        .filter(EventRecord::is_valid)
}

pub fn parse_snapshot_line(line: &str) -> Option<SnapshotRecord> {
    serde_json::from_str::<SnapshotRecord>(line.trim())
        .ok()
        .filter(SnapshotRecord::is_valid)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
