use chrono::{Duration, Utc};
use serde::Serialize;

use crate::record::{EventRecord, format_timestamp};
use crate::store::MemoryStore;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;
pub const RECURRENCE_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternHistory {
    pub pattern_id: String,
    pub name: Option<String>,
    pub days: u32,
    pub count: usize,
    // Advisory escalation signal, not a state transition.
    pub recurring: bool,
    pub events: Vec<EventRecord>,
}

pub fn pattern_history(
    store: &MemoryStore,
    pattern_id: &str,
    pod_name: Option<&str>,
    namespace: Option<&str>,
    days: u32,
) -> rusqlite::Result<PatternHistory> {
    let since = format_timestamp(Utc::now() - Duration::days(i64::from(days)));
    let events = store.events_for_pattern(pattern_id, pod_name, namespace, &since)?;
    let name = store.pattern_name(pattern_id)?;
    Ok(PatternHistory {
        pattern_id: pattern_id.to_string(),
        name,
        days,
        count: events.len(),
        recurring: events.len() >= RECURRENCE_THRESHOLD,
        events,
    })
}
