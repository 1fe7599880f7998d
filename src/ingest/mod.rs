pub mod tail;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::config::expand_tilde;
use crate::link::{self, LinkRule};
use crate::record::{EventRecord, SnapshotRecord, parse_event_line, parse_snapshot_line};
use crate::store::MemoryStore;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestCounts {
    pub ingested: usize,
    pub duplicates: usize,
    pub malformed: usize,
}

impl IngestCounts {
    pub fn absorb(&mut self, other: Self) {
        self.ingested += other.ingested;
        self.duplicates += other.duplicates;
        self.malformed += other.malformed;
    }
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub event_files: usize,
    pub snapshot_files: usize,
    pub events: IngestCounts,
    pub snapshots: IngestCounts,
    pub edges_created: usize,
    pub failures: Vec<Value>,
}

impl IngestReport {
    pub fn status(&self) -> &'static str {
        if self.failures.is_empty() { "ok" } else { "partial" }
    }
}

#[derive(Debug)]
pub enum SourceError {
    Pattern(glob::PatternError),
    Glob(glob::GlobError),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pattern(err) => write!(f, "{err}"),
            Self::Glob(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<glob::PatternError> for SourceError {
    fn from(value: glob::PatternError) -> Self {
        Self::Pattern(value)
    }
}

impl From<glob::GlobError> for SourceError {
    fn from(value: glob::GlobError) -> Self {
        Self::Glob(value)
    }
}

// Insert one event and derive its edges; the caller owns the transaction.
pub fn apply_event_record(
    store: &MemoryStore,
    event: &EventRecord,
    rules: &[LinkRule],
) -> rusqlite::Result<(bool, usize)> {
    let inserted = store.insert_event(event)?;
    let edges = if inserted {
        link::apply_rules(store, event, rules)?.len()
    } else {
        0
    };
    Ok((inserted, edges))
}

pub fn ingest_event_record(
    store: &MemoryStore,
    event: &EventRecord,
    rules: &[LinkRule],
) -> rusqlite::Result<(bool, usize)> {
    let tx = store.begin()?;
    let outcome = apply_event_record(store, event, rules)?;
    tx.commit()?;
    Ok(outcome)
}

pub fn ingest_snapshot_record(
    store: &MemoryStore,
    snapshot: &SnapshotRecord,
) -> rusqlite::Result<bool> {
    let tx = store.begin()?;
    let inserted = store.insert_snapshot(snapshot)?;
    tx.commit()?;
    Ok(inserted)
}

pub fn ingest_event_lines(
    store: &MemoryStore,
    content: &str,
    rules: &[LinkRule],
    counts: &mut IngestCounts,
) -> rusqlite::Result<usize> {
    let mut edges_created = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = parse_event_line(line) else {
            counts.malformed += 1;
            continue;
        };
        let (inserted, edges) = ingest_event_record(store, &event, rules)?;
        if inserted {
            counts.ingested += 1;
            edges_created += edges;
        } else {
            counts.duplicates += 1;
        }
    }
    Ok(edges_created)
}

pub fn ingest_snapshot_lines(
    store: &MemoryStore,
    content: &str,
    counts: &mut IngestCounts,
) -> rusqlite::Result<()> {
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(snapshot) = parse_snapshot_line(line) else {
            counts.malformed += 1;
            continue;
        };
        if ingest_snapshot_record(store, &snapshot)? {
            counts.ingested += 1;
        } else {
            counts.duplicates += 1;
        }
    }
    Ok(())
}

// Line processing for tail mode, where the polling cycle owns one
// transaction covering everything it consumed.
pub fn apply_event_lines(
    store: &MemoryStore,
    content: &str,
    rules: &[LinkRule],
    counts: &mut IngestCounts,
) -> rusqlite::Result<usize> {
    let mut edges_created = 0;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(event) = parse_event_line(line) else {
            counts.malformed += 1;
            continue;
        };
        let (inserted, edges) = apply_event_record(store, &event, rules)?;
        if inserted {
            counts.ingested += 1;
            edges_created += edges;
        } else {
            counts.duplicates += 1;
        }
    }
    Ok(edges_created)
}

pub fn apply_snapshot_lines(
    store: &MemoryStore,
    content: &str,
    counts: &mut IngestCounts,
) -> rusqlite::Result<()> {
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Some(snapshot) = parse_snapshot_line(line) else {
            counts.malformed += 1;
            continue;
        };
        if store.insert_snapshot(&snapshot)? {
            counts.ingested += 1;
        } else {
            counts.duplicates += 1;
        }
    }
    Ok(())
}

pub fn ingest_batch(
    store: &MemoryStore,
    event_paths: &[PathBuf],
    snapshot_paths: &[PathBuf],
    rules: &[LinkRule],
) -> rusqlite::Result<IngestReport> {
    let mut report = IngestReport::default();

    for path in event_paths {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                report.failures.push(json!({
                    "path": path,
                    "error": err.to_string(),
                }));
                continue;
            }
        };
        report.event_files += 1;
        report.edges_created += ingest_event_lines(store, &content, rules, &mut report.events)?;
    }

    for path in snapshot_paths {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                report.failures.push(json!({
                    "path": path,
                    "error": err.to_string(),
                }));
                continue;
            }
        };
        report.snapshot_files += 1;
        ingest_snapshot_lines(store, &content, &mut report.snapshots)?;
    }

    Ok(report)
}

pub fn resolve_sources(
    specs: &[String],
    home: &Path,
    exclude_patterns: &[String],
) -> Result<Vec<PathBuf>, SourceError> {
    let mut out = Vec::new();
    let excludes = compile_excludes(home, exclude_patterns)?;

    for spec in specs {
        let raw = spec.trim();
        if raw.is_empty() {
            continue;
        }
        let expanded = expand_tilde(raw, home);
        let candidates = if looks_like_glob(raw) {
            glob_paths(&expanded)?
        } else if expanded.is_dir() {
            WalkDir::new(&expanded)
                .into_iter()
                .filter_map(Result::ok)
                .map(|entry| entry.path().to_path_buf())
                .filter(|path| path.is_file() && has_jsonl_extension(path))
                .collect::<Vec<_>>()
        } else if expanded.is_file() {
            vec![expanded]
        } else {
            // A source that does not exist yet contributes nothing.
            Vec::new()
        };

        for path in candidates {
            if !excludes.iter().any(|pattern| pattern.matches_path(&path)) {
                out.push(path);
            }
        }
    }

    out.sort();
    out.dedup();
    Ok(out)
}

fn looks_like_glob(path: &str) -> bool {
    ['*', '?', '[', ']', '{', '}']
        .iter()
        .any(|ch| path.contains(*ch))
}

fn glob_paths(pattern: &Path) -> Result<Vec<PathBuf>, SourceError> {
    let pattern_str = pattern.to_string_lossy();
    let mut out = Vec::new();
    for entry in glob::glob(&pattern_str)? {
        let path = entry?;
        if path.is_file() {
            out.push(path);
        }
    }
    Ok(out)
}

fn compile_excludes(home: &Path, patterns: &[String]) -> Result<Vec<glob::Pattern>, SourceError> {
    let mut compiled = Vec::new();
    for pattern in patterns {
        let raw = pattern.trim();
        if raw.is_empty() {
            continue;
        }
        let expanded = expand_tilde(raw, home);
        compiled.push(glob::Pattern::new(&expanded.to_string_lossy())?);
    }
    Ok(compiled)
}

fn has_jsonl_extension(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}
