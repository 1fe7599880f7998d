use chrono::{DateTime, Utc};

use crate::record::{SnapshotRecord, format_timestamp};
use crate::store::MemoryStore;

// Best known state at or before the query time; never interpolated.
pub fn state_at(
    store: &MemoryStore,
    object_kind: &str,
    object_name: &str,
    namespace: &str,
    at: DateTime<Utc>,
) -> rusqlite::Result<Option<SnapshotRecord>> {
    store.snapshot_at(object_kind, object_name, namespace, &format_timestamp(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::parse_timestamp;
    use serde_json::json;

    fn snapshot(id: &str, timestamp: &str, namespace: &str) -> SnapshotRecord {
        SnapshotRecord {
            id: id.to_string(),
            timestamp: timestamp.to_string(),
            object_kind: "Pod".to_string(),
            object_name: "api-7f".to_string(),
            namespace: namespace.to_string(),
            trigger_event: "e2".to_string(),
            state: json!({"phase": "Running"}),
        }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        parse_timestamp(raw).expect("test timestamp parses")
    }

    #[test]
    fn returns_most_recent_snapshot_at_or_before_query_time() {
        let store = MemoryStore::open_in_memory().expect("store");
        store
            .insert_snapshot(&snapshot("s1", "2026-01-10T10:00:00Z", "default"))
            .expect("s1");
        store
            .insert_snapshot(&snapshot("s2", "2026-01-10T10:05:00Z", "default"))
            .expect("s2");

        let mid = state_at(&store, "Pod", "api-7f", "default", at("2026-01-10T10:03:00Z"))
            .expect("query")
            .expect("snapshot found");
        assert_eq!(mid.id, "s1");

        let late = state_at(&store, "Pod", "api-7f", "default", at("2026-01-10T10:06:00Z"))
            .expect("query")
            .expect("snapshot found");
        assert_eq!(late.id, "s2");

        assert!(
            state_at(&store, "Pod", "api-7f", "default", at("2026-01-10T09:00:00Z"))
                .expect("query")
                .is_none()
        );
    }

    #[test]
    fn empty_snapshot_namespace_matches_any_requested_namespace() {
        let store = MemoryStore::open_in_memory().expect("store");
        store
            .insert_snapshot(&snapshot("s1", "2026-01-10T10:00:00Z", ""))
            .expect("s1");

        let found = state_at(&store, "Pod", "api-7f", "staging", at("2026-01-10T10:01:00Z"))
            .expect("query")
            .expect("wildcard matches");
        assert_eq!(found.id, "s1");
    }

    #[test]
    fn object_identity_is_exact() {
        let store = MemoryStore::open_in_memory().expect("store");
        store
            .insert_snapshot(&snapshot("s1", "2026-01-10T10:00:00Z", "default"))
            .expect("s1");

        assert!(
            state_at(&store, "Node", "api-7f", "default", at("2026-01-10T10:01:00Z"))
                .expect("query")
                .is_none()
        );
        assert!(
            state_at(&store, "Pod", "other", "default", at("2026-01-10T10:01:00Z"))
                .expect("query")
                .is_none()
        );
    }
}
