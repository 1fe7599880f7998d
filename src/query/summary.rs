use serde::Serialize;

use crate::store::{MemoryStore, PatternCount, PodActivity};

pub const TOP_PODS_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub events: i64,
    pub causal_edges: i64,
    pub snapshots: i64,
    pub patterns: Vec<PatternCount>,
    pub top_pods: Vec<PodActivity>,
}

pub fn summarize(store: &MemoryStore) -> rusqlite::Result<StoreSummary> {
    let counts = store.counts()?;
    Ok(StoreSummary {
        events: counts.events,
        causal_edges: counts.causal_edges,
        snapshots: counts.snapshots,
        patterns: store.pattern_distribution()?,
        top_pods: store.top_pods(TOP_PODS_LIMIT)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::BUILTIN_RULES;
    use crate::record::{parse_event_line, parse_snapshot_line};

    #[test]
    fn summary_reflects_everything_ingested() {
        let store = MemoryStore::open_in_memory().expect("store");
        let lines = [
            r#"{"id":"e1","timestamp":"2026-01-10T23:18:42Z","event_type":"NodeMemoryPressure","node_name":"n1"}"#,
            r#"{"id":"e2","timestamp":"2026-01-10T23:19:42Z","event_type":"OOMKill","pattern_id":"P001","pod_name":"api-7f","namespace":"default","node_name":"n1"}"#,
        ];
        for line in lines {
            let event = parse_event_line(line).expect("event parses");
            store.insert_event(&event).expect("insert");
            crate::link::apply_rules(&store, &event, BUILTIN_RULES).expect("link");
        }
        let snapshot = parse_snapshot_line(
            r#"{"id":"s1","timestamp":"2026-01-10T23:19:43Z","object_kind":"Pod","object_name":"api-7f","namespace":"default"}"#,
        )
        .expect("snapshot parses");
        store.insert_snapshot(&snapshot).expect("insert snapshot");

        let summary = summarize(&store).expect("summary");
        assert_eq!(summary.events, 2);
        assert_eq!(summary.causal_edges, 1);
        assert_eq!(summary.snapshots, 1);
        assert_eq!(summary.patterns.len(), 1);
        assert_eq!(summary.patterns[0].pattern_id, "P001");
        assert_eq!(summary.top_pods.len(), 1);
        assert_eq!(summary.top_pods[0].pod_name, "api-7f");
        assert_eq!(summary.top_pods[0].last_seen, "2026-01-10T23:19:42Z");
    }

    #[test]
    fn empty_store_summarizes_to_zeroes() {
        let store = MemoryStore::open_in_memory().expect("store");
        let summary = summarize(&store).expect("summary");
        assert_eq!(summary.events, 0);
        assert_eq!(summary.causal_edges, 0);
        assert_eq!(summary.snapshots, 0);
        assert!(summary.patterns.is_empty());
        assert!(summary.top_pods.is_empty());
    }
}
