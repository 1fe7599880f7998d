use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use hindsight::config::{
    ConfigError, EffectiveConfig, default_config_yaml, expand_tilde, load_effective_config,
};
use hindsight::ingest::tail::{
    DEFAULT_POLL_INTERVAL_SECS, EVENTS_FILE, SNAPSHOTS_FILE, WatchError, WatchOptions, watch,
};
use hindsight::ingest::{SourceError, ingest_batch, resolve_sources};
use hindsight::link::BUILTIN_RULES;
use hindsight::query::chain::{ChainAnchor, causal_chain};
use hindsight::query::history::{DEFAULT_LOOKBACK_DAYS, pattern_history};
use hindsight::query::state::state_at;
use hindsight::query::summary::summarize;
use hindsight::record::parse_timestamp;
use hindsight::store::MemoryStore;
use serde_json::{Value, json};

const WATCH_STATE_FILE: &str = "watch-state.json";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, err.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(value: rusqlite::Error) -> Self {
        Self::new("sqlite_error", value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", value.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(value: ConfigError) -> Self {
        Self::new("config_error", value.to_string())
    }
}

impl From<SourceError> for CliError {
    fn from(value: SourceError) -> Self {
        Self::new("source_error", value.to_string())
    }
}

impl From<WatchError> for CliError {
    fn from(value: WatchError) -> Self {
        Self::new("watch_error", value.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(name = "hindsight")]
#[command(about = "An append-only causal memory for cluster events")]
struct Cli {
    #[arg(long, global = true)]
    global: bool,
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    Ingest(IngestArgs),
    Watch(WatchArgs),
    CausalChain(CausalChainArgs),
    PatternHistory(PatternHistoryArgs),
    StateAt(StateAtArgs),
    Summary,
}

#[derive(Args, Debug)]
struct IngestArgs {
    #[arg(long)]
    events: Vec<String>,
    #[arg(long)]
    snapshots: Vec<String>,
}

#[derive(Args, Debug)]
struct WatchArgs {
    #[arg(long)]
    dir: Option<String>,
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[derive(Args, Debug)]
struct CausalChainArgs {
    #[arg(long)]
    pod: String,
    #[arg(long, default_value = "default")]
    namespace: String,
    #[arg(long)]
    event_id: Option<String>,
}

#[derive(Args, Debug)]
struct PatternHistoryArgs {
    #[arg(long)]
    pattern: String,
    #[arg(long)]
    pod: Option<String>,
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
    days: u32,
}

#[derive(Args, Debug)]
struct StateAtArgs {
    #[arg(long)]
    object: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "default")]
    namespace: String,
    #[arg(long)]
    time: String,
}

#[derive(Debug, Clone)]
struct StorePaths {
    root: PathBuf,
    db: PathBuf,
    cursors: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    mode: StorageMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageMode {
    RepoLocal,
    Global,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let paths = store_paths(&cwd, cli.global, cli.db)?;
    match cli.command {
        Command::Init => cmd_init(&paths),
        Command::Ingest(args) => cmd_ingest(&paths, args),
        Command::Watch(args) => cmd_watch(&paths, args),
        Command::CausalChain(args) => cmd_causal_chain(&paths, args),
        Command::PatternHistory(args) => cmd_pattern_history(&paths, args),
        Command::StateAt(args) => cmd_state_at(&paths, args),
        Command::Summary => cmd_summary(&paths),
    }
}

fn cmd_init(paths: &StorePaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.root).map_err(|err| CliError::io("mkdir_error", err))?;
    fs::create_dir_all(&paths.cursors).map_err(|err| CliError::io("mkdir_error", err))?;
    let _ = MemoryStore::open(&path_string(&paths.db))?;
    write_default_config(paths)?;

    print_json(&json!({
        "status": "ok",
        "store_dir": paths.root,
        "db": paths.db,
        "mode": match paths.mode {
            StorageMode::RepoLocal => "repo",
            StorageMode::Global => "global",
        },
    }))
}

fn cmd_ingest(paths: &StorePaths, args: IngestArgs) -> Result<(), CliError> {
    let store = open_store_creating(paths)?;
    let home = home_dir()?;
    let config = load_config(paths)?;

    let event_specs = if args.events.is_empty() {
        config.events.clone()
    } else {
        args.events
    };
    let snapshot_specs = if args.snapshots.is_empty() {
        config.snapshots.clone()
    } else {
        args.snapshots
    };
    if event_specs.is_empty() && snapshot_specs.is_empty() {
        return Err(CliError::new(
            "missing_sources",
            "no sources given; pass --events/--snapshots or add sources in .hindsight/config.yml",
        ));
    }

    let event_paths = resolve_sources(&event_specs, &home, &config.exclude)?;
    let snapshot_paths = resolve_sources(&snapshot_specs, &home, &config.exclude)?;
    let report = ingest_batch(&store, &event_paths, &snapshot_paths, BUILTIN_RULES)?;

    let mut payload = serde_json::to_value(&report)?;
    if let Value::Object(map) = &mut payload {
        map.insert("status".to_string(), json!(report.status()));
    }
    print_json(&payload)
}

fn cmd_watch(paths: &StorePaths, args: WatchArgs) -> Result<(), CliError> {
    let store = open_store_creating(paths)?;
    let home = home_dir()?;
    let config = load_config(paths)?;

    let dir = args
        .dir
        .or(config.watch.dir)
        .ok_or_else(|| {
            CliError::new(
                "missing_watch_dir",
                "no watch directory given; pass --dir or set watch.dir in .hindsight/config.yml",
            )
        })?;
    let dir = expand_tilde(&dir, &home);
    let interval_secs = args
        .interval_secs
        .or(config.watch.interval_secs)
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);

    let options = WatchOptions {
        events_path: dir.join(EVENTS_FILE),
        snapshots_path: dir.join(SNAPSHOTS_FILE),
        state_path: paths.cursors.join(WATCH_STATE_FILE),
        interval: Duration::from_secs(interval_secs),
        rules: BUILTIN_RULES,
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .map_err(|err| CliError::new("signal_error", err.to_string()))?;

    print_json(&json!({
        "status": "watching",
        "events": options.events_path,
        "snapshots": options.snapshots_path,
        "interval_secs": interval_secs,
    }))?;

    let summary = watch(&store, &options, &cancel)?;

    let mut payload = serde_json::to_value(&summary)?;
    if let Value::Object(map) = &mut payload {
        map.insert("status".to_string(), json!("stopped"));
    }
    print_json(&payload)
}

fn cmd_causal_chain(paths: &StorePaths, args: CausalChainArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let anchor = match &args.event_id {
        Some(event_id) => ChainAnchor::Event(event_id),
        None => ChainAnchor::Pod {
            pod_name: &args.pod,
            namespace: &args.namespace,
        },
    };

    let Some(chain) = causal_chain(&store, anchor)? else {
        return print_json(&json!({
            "pod": args.pod,
            "namespace": args.namespace,
            "chain": [],
            "message": "no events found",
        }));
    };

    print_json(&json!({
        "anchor": chain.anchor,
        "causal_chain": chain.causes,
    }))
}

fn cmd_pattern_history(paths: &StorePaths, args: PatternHistoryArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let history = pattern_history(
        &store,
        &args.pattern,
        args.pod.as_deref(),
        args.namespace.as_deref(),
        args.days,
    )?;
    print_json(&serde_json::to_value(&history)?)
}

fn cmd_state_at(paths: &StorePaths, args: StateAtArgs) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let at = parse_timestamp(&args.time).ok_or_else(|| {
        CliError::new(
            "invalid_time",
            format!("`{}` is not an RFC 3339 timestamp", args.time),
        )
    })?;

    let Some(snapshot) = state_at(&store, &args.object, &args.name, &args.namespace, at)? else {
        return print_json(&json!({
            "found": false,
            "object": format!("{}/{}", args.object, args.name),
            "query_time": args.time,
        }));
    };

    print_json(&json!({
        "found": true,
        "snapshot": snapshot,
    }))
}

fn cmd_summary(paths: &StorePaths) -> Result<(), CliError> {
    let store = open_store(paths)?;
    let summary = summarize(&store)?;
    print_json(&serde_json::to_value(&summary)?)
}

fn store_paths(cwd: &Path, global: bool, db: Option<PathBuf>) -> Result<StorePaths, CliError> {
    let home = home_dir()?;
    let (root, mode) = if global {
        (home.join(".hindsight"), StorageMode::Global)
    } else {
        (cwd.join(".hindsight"), StorageMode::RepoLocal)
    };

    Ok(StorePaths {
        db: db.unwrap_or_else(|| root.join("memory.sqlite")),
        cursors: root.join("cursors"),
        repo_config: cwd.join(".hindsight").join("config.yml"),
        user_config: home.join(".hindsight").join("config.yml"),
        root,
        mode,
    })
}

// Queries refuse to run without an existing store; ingestion creates one.
fn open_store(paths: &StorePaths) -> Result<MemoryStore, CliError> {
    if !paths.db.exists() {
        return Err(CliError::new(
            "store_not_found",
            format!(
                "no memory store at {}; run `hindsight ingest` first",
                paths.db.display()
            ),
        ));
    }
    Ok(MemoryStore::open(&path_string(&paths.db))?)
}

fn open_store_creating(paths: &StorePaths) -> Result<MemoryStore, CliError> {
    if let Some(parent) = paths.db.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    fs::create_dir_all(&paths.cursors).map_err(|err| CliError::io("mkdir_error", err))?;
    Ok(MemoryStore::open(&path_string(&paths.db))?)
}

fn load_config(paths: &StorePaths) -> Result<EffectiveConfig, CliError> {
    Ok(load_effective_config(
        Some(&paths.repo_config),
        Some(&paths.user_config),
    )?)
}

fn write_default_config(paths: &StorePaths) -> Result<(), CliError> {
    let config_path = match paths.mode {
        StorageMode::RepoLocal => &paths.repo_config,
        StorageMode::Global => &paths.user_config,
    };
    if config_path.exists() {
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::io("mkdir_error", err))?;
    }
    fs::write(config_path, default_config_yaml()).map_err(|err| CliError::io("write_error", err))
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", "HOME environment variable is not set"))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn print_json(value: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
