use chrono::Duration;
use sha2::{Digest, Sha256};

use crate::record::{CausalEdge, EventRecord, format_timestamp, parse_timestamp};
use crate::store::MemoryStore;

pub const EDGE_TYPE_DIRECT: &str = "direct";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CauseScope {
    SameNode,
    SamePod,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkRule {
    pub trigger: &'static str,
    pub cause_type: &'static str,
    pub scope: CauseScope,
    pub window_secs: i64,
    pub max_causes: usize,
    pub pattern_id: &'static str,
    pub confidence: f32,
    pub edge_type: &'static str,
}

pub const BUILTIN_RULES: &[LinkRule] = &[
    // OOM kill preceded by memory pressure on the same node.
    LinkRule {
        trigger: "OOMKill",
        cause_type: "NodeMemoryPressure",
        scope: CauseScope::SameNode,
        window_secs: 300,
        max_causes: 3,
        pattern_id: "P001",
        confidence: 0.9,
        edge_type: EDGE_TYPE_DIRECT,
    },
    // Kernel OOM evidence confirming a recent kill of the same pod.
    LinkRule {
        trigger: "OOMKillEvidence",
        cause_type: "OOMKill",
        scope: CauseScope::SamePod,
        window_secs: 90,
        max_causes: 1,
        pattern_id: "P001",
        confidence: 1.0,
        edge_type: EDGE_TYPE_DIRECT,
    },
];

pub fn edge_id(cause_event_id: &str, effect_event_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(cause_event_id.as_bytes());
    hasher.update(b"->");
    hasher.update(effect_event_id.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}

pub fn apply_rules(
    store: &MemoryStore,
    event: &EventRecord,
    rules: &[LinkRule],
) -> rusqlite::Result<Vec<CausalEdge>> {
    let mut created = Vec::new();
    for rule in rules.iter().filter(|rule| rule.trigger == event.event_type) {
        // An unparseable trigger timestamp yields no window and no edges.
        let Some(end) = parse_timestamp(&event.timestamp) else {
            continue;
        };
        let window_start = format_timestamp(end - Duration::seconds(rule.window_secs));

        let causes = match rule.scope {
            CauseScope::SameNode => store.causes_on_node(
                rule.cause_type,
                &event.node_name,
                &window_start,
                &event.timestamp,
                rule.max_causes,
            )?,
            CauseScope::SamePod => store.causes_on_pod(
                rule.cause_type,
                &event.pod_name,
                &event.namespace,
                &window_start,
                &event.timestamp,
                rule.max_causes,
            )?,
        };

        for cause in causes {
            let edge = CausalEdge {
                id: edge_id(&cause.id, &event.id),
                cause_event_id: cause.id,
                effect_event_id: event.id.clone(),
                pattern_id: rule.pattern_id.to_string(),
                confidence: rule.confidence,
                edge_type: rule.edge_type.to_string(),
            };
            if store.insert_edge(&edge)? {
                created.push(edge);
            }
        }
    }
    Ok(created)
}
