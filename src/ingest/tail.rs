use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ingest::{IngestCounts, apply_event_lines, apply_snapshot_lines};
use crate::link::LinkRule;
use crate::store::MemoryStore;
use crate::store::atomic::atomic_write;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const EVENTS_FILE: &str = "events.jsonl";
pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";

#[derive(Debug)]
pub enum WatchError {
    Io(io::Error),
    Store(rusqlite::Error),
    State(serde_json::Error),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
            Self::State(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<io::Error> for WatchError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for WatchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(value)
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(value: serde_json::Error) -> Self {
        Self::State(value)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct WatchState {
    pub files: HashMap<String, u64>,
}

impl WatchState {
    fn offset_for(&self, path: &Path) -> u64 {
        self.files
            .get(path.to_string_lossy().as_ref())
            .copied()
            .unwrap_or(0)
    }

    fn set_offset(&mut self, path: &Path, offset: u64) {
        self.files
            .insert(path.to_string_lossy().into_owned(), offset);
    }
}

pub fn load_watch_state(path: &Path) -> Result<WatchState, WatchError> {
    if !path.exists() {
        return Ok(WatchState::default());
    }
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn save_watch_state(path: &Path, state: &WatchState) -> Result<(), WatchError> {
    let content = serde_json::to_string_pretty(state)?;
    atomic_write(path, content.as_bytes())?;
    Ok(())
}

// Read newly appended bytes up to the last complete line. A trailing
// partial record stays unconsumed for the next cycle; a source shorter
// than the cursor restarts the cursor at the beginning of the file.
pub fn read_new_lines(path: &Path, offset: &mut u64) -> io::Result<String> {
    let len = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err),
    };
    if len < *offset {
        *offset = 0;
    }
    if len == *offset {
        return Ok(String::new());
    }

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err),
    };
    file.seek(SeekFrom::Start(*offset))?;
    let mut buf = Vec::with_capacity((len - *offset) as usize);
    file.take(len - *offset).read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|byte| *byte == b'\n') else {
        return Ok(String::new());
    };
    buf.truncate(last_newline + 1);
    *offset += buf.len() as u64;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[derive(Debug, Default)]
pub struct CycleStats {
    pub events: IngestCounts,
    pub snapshots: IngestCounts,
    pub edges_created: usize,
    pub cursor_moved: bool,
}

pub struct WatchOptions<'a> {
    pub events_path: PathBuf,
    pub snapshots_path: PathBuf,
    pub state_path: PathBuf,
    pub interval: Duration,
    pub rules: &'a [LinkRule],
}

#[derive(Debug, Default, Serialize)]
pub struct WatchSummary {
    pub cycles: u64,
    pub events: IngestCounts,
    pub snapshots: IngestCounts,
    pub edges_created: usize,
}

impl WatchSummary {
    fn absorb(&mut self, stats: &CycleStats) {
        self.events.absorb(stats.events);
        self.snapshots.absorb(stats.snapshots);
        self.edges_created += stats.edges_created;
    }
}

// One polling cycle: consume what both sources grew by, commit it as a
// single transaction, then advance the in-memory cursors.
pub fn run_cycle(
    store: &MemoryStore,
    events_path: &Path,
    snapshots_path: &Path,
    state: &mut WatchState,
    rules: &[LinkRule],
) -> Result<CycleStats, WatchError> {
    let mut stats = CycleStats::default();

    let previous_event_offset = state.offset_for(events_path);
    let mut event_offset = previous_event_offset;
    let event_chunk = read_new_lines(events_path, &mut event_offset)?;

    let previous_snapshot_offset = state.offset_for(snapshots_path);
    let mut snapshot_offset = previous_snapshot_offset;
    let snapshot_chunk = read_new_lines(snapshots_path, &mut snapshot_offset)?;

    if !event_chunk.is_empty() || !snapshot_chunk.is_empty() {
        let tx = store.begin()?;
        stats.edges_created = apply_event_lines(store, &event_chunk, rules, &mut stats.events)?;
        apply_snapshot_lines(store, &snapshot_chunk, &mut stats.snapshots)?;
        tx.commit()?;
    }

    if event_offset != previous_event_offset {
        state.set_offset(events_path, event_offset);
        stats.cursor_moved = true;
    }
    if snapshot_offset != previous_snapshot_offset {
        state.set_offset(snapshots_path, snapshot_offset);
        stats.cursor_moved = true;
    }
    Ok(stats)
}

// Poll until the cancellation flag is raised; the flag is checked
// between cycles only, never mid-cycle.
pub fn watch(
    store: &MemoryStore,
    options: &WatchOptions<'_>,
    cancel: &AtomicBool,
) -> Result<WatchSummary, WatchError> {
    let mut state = load_watch_state(&options.state_path)?;
    let mut summary = WatchSummary::default();

    while !cancel.load(Ordering::SeqCst) {
        let stats = run_cycle(
            store,
            &options.events_path,
            &options.snapshots_path,
            &mut state,
            options.rules,
        )?;
        if stats.cursor_moved {
            save_watch_state(&options.state_path, &state)?;
        }
        summary.absorb(&stats);
        summary.cycles += 1;
        thread::sleep(options.interval);
    }

    Ok(summary)
}
