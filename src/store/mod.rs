pub mod atomic;

use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::Serialize;
use serde_json::Value;

use crate::record::{CausalEdge, EventRecord, SnapshotRecord};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CauseLink {
    pub event: EventRecord,
    pub confidence: f32,
    pub edge_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub events: i64,
    pub causal_edges: i64,
    pub snapshots: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternCount {
    pub pattern_id: String,
    pub name: Option<String>,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodActivity {
    pub pod_name: String,
    pub namespace: String,
    pub events: i64,
    pub last_seen: String,
}

pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn open(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn begin(&self) -> rusqlite::Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            ",
        )?;

        let version: i64 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            self.create_schema_v1()?;
            self.conn.execute_batch("PRAGMA user_version = 1;")?;
        } else if version == 1 {
            self.create_schema_v1()?;
        } else {
            return Err(rusqlite::Error::InvalidQuery);
        }
        Ok(())
    }

    fn create_schema_v1(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                pattern_id TEXT NOT NULL DEFAULT '',
                pod_name TEXT NOT NULL DEFAULT '',
                namespace TEXT NOT NULL DEFAULT '',
                node_name TEXT NOT NULL DEFAULT '',
                pod_uid TEXT NOT NULL DEFAULT '',
                payload TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_events_pod ON events(pod_name, namespace, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_type_node ON events(event_type, node_name, timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_pattern ON events(pattern_id, timestamp);

            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                object_kind TEXT NOT NULL,
                object_name TEXT NOT NULL,
                namespace TEXT NOT NULL DEFAULT '',
                trigger_event TEXT NOT NULL DEFAULT '',
                state TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_object ON snapshots(object_kind, object_name, timestamp);

            CREATE TABLE IF NOT EXISTS causal_edges (
                id TEXT PRIMARY KEY,
                cause_event_id TEXT NOT NULL,
                effect_event_id TEXT NOT NULL,
                pattern_id TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                edge_type TEXT NOT NULL DEFAULT 'direct'
            );

            CREATE INDEX IF NOT EXISTS idx_edges_effect ON causal_edges(effect_event_id);
            CREATE INDEX IF NOT EXISTS idx_edges_cause ON causal_edges(cause_event_id);

            CREATE TABLE IF NOT EXISTS patterns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL
            );

            INSERT OR IGNORE INTO patterns (id, name)
            VALUES ('P001', 'Memory pressure leads to OOM kill');
            ",
        )?;
        Ok(())
    }

    pub fn insert_event(&self, event: &EventRecord) -> rusqlite::Result<bool> {
        Self::validate_id(&event.id)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO events
                (id, timestamp, event_type, pattern_id, pod_name, namespace, node_name, pod_uid, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.timestamp,
                event.event_type,
                event.pattern_id,
                event.pod_name,
                event.namespace,
                event.node_name,
                event.pod_uid,
                encode_json(&event.payload),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_snapshot(&self, snapshot: &SnapshotRecord) -> rusqlite::Result<bool> {
        Self::validate_id(&snapshot.id)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO snapshots
                (id, timestamp, object_kind, object_name, namespace, trigger_event, state)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.id,
                snapshot.timestamp,
                snapshot.object_kind,
                snapshot.object_name,
                snapshot.namespace,
                snapshot.trigger_event,
                encode_json(&snapshot.state),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn insert_edge(&self, edge: &CausalEdge) -> rusqlite::Result<bool> {
        Self::validate_id(&edge.id)?;
        Self::validate_id(&edge.cause_event_id)?;
        Self::validate_id(&edge.effect_event_id)?;
        Self::validate_confidence(edge.confidence)?;
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO causal_edges
                (id, cause_event_id, effect_event_id, pattern_id, confidence, edge_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                edge.id,
                edge.cause_event_id,
                edge.effect_event_id,
                edge.pattern_id,
                edge.confidence,
                edge.edge_type,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn event_by_id(&self, id: &str) -> rusqlite::Result<Option<EventRecord>> {
        self.conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                event_from_row,
            )
            .optional()
    }

    pub fn latest_anchor_event(
        &self,
        pod_name: &str,
        namespace: &str,
    ) -> rusqlite::Result<Option<EventRecord>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM events
                     WHERE pod_name = ?1 AND namespace = ?2
                       AND event_type IN ('OOMKill', 'CrashLoopBackOff', 'ContainerTerminated')
                     ORDER BY timestamp DESC LIMIT 1"
                ),
                params![pod_name, namespace],
                event_from_row,
            )
            .optional()
    }

    pub fn causes_of(&self, effect_event_id: &str) -> rusqlite::Result<Vec<CauseLink>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS_QUALIFIED}, ce.confidence, ce.edge_type
             FROM events e JOIN causal_edges ce ON e.id = ce.cause_event_id
             WHERE ce.effect_event_id = ?1
             ORDER BY e.timestamp ASC"
        ))?;

        let mut rows = stmt.query(params![effect_event_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(CauseLink {
                event: event_from_row(row)?,
                confidence: row.get(9)?,
                edge_type: row.get(10)?,
            });
        }
        Ok(out)
    }

    pub fn causes_on_node(
        &self,
        event_type: &str,
        node_name: &str,
        window_start: &str,
        window_end: &str,
        limit: usize,
    ) -> rusqlite::Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE event_type = ?1 AND node_name = ?2
               AND timestamp >= ?3 AND timestamp <= ?4
             ORDER BY timestamp DESC LIMIT ?5"
        ))?;
        let mut rows = stmt.query(params![
            event_type,
            node_name,
            window_start,
            window_end,
            limit as i64
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(event_from_row(row)?);
        }
        Ok(out)
    }

    pub fn causes_on_pod(
        &self,
        event_type: &str,
        pod_name: &str,
        namespace: &str,
        window_start: &str,
        window_end: &str,
        limit: usize,
    ) -> rusqlite::Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE event_type = ?1 AND pod_name = ?2 AND namespace = ?3
               AND timestamp >= ?4 AND timestamp <= ?5
             ORDER BY timestamp DESC LIMIT ?6"
        ))?;
        let mut rows = stmt.query(params![
            event_type,
            pod_name,
            namespace,
            window_start,
            window_end,
            limit as i64
        ])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(event_from_row(row)?);
        }
        Ok(out)
    }

    pub fn events_for_pattern(
        &self,
        pattern_id: &str,
        pod_name: Option<&str>,
        namespace: Option<&str>,
        since: &str,
    ) -> rusqlite::Result<Vec<EventRecord>> {
        let mut sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE pattern_id = ?1 AND timestamp >= ?2"
        );
        let mut bound: Vec<&str> = vec![pattern_id, since];
        if let Some(pod) = pod_name {
            bound.push(pod);
            sql.push_str(&format!(" AND pod_name = ?{}", bound.len()));
        }
        if let Some(ns) = namespace {
            bound.push(ns);
            sql.push_str(&format!(" AND namespace = ?{}", bound.len()));
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bound))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(event_from_row(row)?);
        }
        Ok(out)
    }

    pub fn pattern_name(&self, pattern_id: &str) -> rusqlite::Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT name FROM patterns WHERE id = ?1",
                params![pattern_id],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn snapshot_at(
        &self,
        object_kind: &str,
        object_name: &str,
        namespace: &str,
        at: &str,
    ) -> rusqlite::Result<Option<SnapshotRecord>> {
        self.conn
            .query_row(
                "SELECT id, timestamp, object_kind, object_name, namespace, trigger_event, state
                 FROM snapshots
                 WHERE object_kind = ?1 AND object_name = ?2
                   AND (namespace = ?3 OR namespace = '')
                   AND timestamp <= ?4
                 ORDER BY timestamp DESC LIMIT 1",
                params![object_kind, object_name, namespace, at],
                snapshot_from_row,
            )
            .optional()
    }

    pub fn counts(&self) -> rusqlite::Result<StoreCounts> {
        let events = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        let causal_edges =
            self.conn
                .query_row("SELECT COUNT(*) FROM causal_edges", [], |row| row.get(0))?;
        let snapshots = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(StoreCounts {
            events,
            causal_edges,
            snapshots,
        })
    }

    pub fn pattern_distribution(&self) -> rusqlite::Result<Vec<PatternCount>> {
        let mut stmt = self.conn.prepare(
            "SELECT e.pattern_id, p.name, COUNT(*) AS cnt
             FROM events e LEFT JOIN patterns p ON p.id = e.pattern_id
             WHERE e.pattern_id != ''
             GROUP BY e.pattern_id
             ORDER BY cnt DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(PatternCount {
                pattern_id: row.get(0)?,
                name: row.get(1)?,
                count: row.get(2)?,
            });
        }
        Ok(out)
    }

    pub fn top_pods(&self, limit: usize) -> rusqlite::Result<Vec<PodActivity>> {
        let mut stmt = self.conn.prepare(
            "SELECT pod_name, namespace, COUNT(*) AS events, MAX(timestamp) AS last_seen
             FROM events WHERE pod_name != ''
             GROUP BY pod_name, namespace
             ORDER BY events DESC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(PodActivity {
                pod_name: row.get(0)?,
                namespace: row.get(1)?,
                events: row.get(2)?,
                last_seen: row.get(3)?,
            });
        }
        Ok(out)
    }

    fn validate_id(id: &str) -> rusqlite::Result<()> {
        if id.is_empty() {
            return Err(rusqlite::Error::InvalidParameterName(
                "record id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_confidence(confidence: f32) -> rusqlite::Result<()> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(rusqlite::Error::InvalidParameterName(
                "confidence must be in [0.0, 1.0]".to_string(),
            ));
        }
        Ok(())
    }
}

const EVENT_COLUMNS: &str =
    "id, timestamp, event_type, pattern_id, pod_name, namespace, node_name, pod_uid, payload";
const EVENT_COLUMNS_QUALIFIED: &str = "e.id, e.timestamp, e.event_type, e.pattern_id, e.pod_name, e.namespace, e.node_name, e.pod_uid, e.payload";

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        event_type: row.get(2)?,
        pattern_id: row.get(3)?,
        pod_name: row.get(4)?,
        namespace: row.get(5)?,
        node_name: row.get(6)?,
        pod_uid: row.get(7)?,
        payload: decode_json(&row.get::<_, String>(8)?),
    })
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnapshotRecord> {
    Ok(SnapshotRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        object_kind: row.get(2)?,
        object_name: row.get(3)?,
        namespace: row.get(4)?,
        trigger_event: row.get(5)?,
        state: decode_json(&row.get::<_, String>(6)?),
    })
}

fn encode_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

fn decode_json(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}
