use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WatchConfig {
    pub dir: Option<String>,
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EffectiveConfig {
    pub events: Vec<String>,
    pub snapshots: Vec<String>,
    pub exclude: Vec<String>,
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    events: Option<Vec<String>>,
    #[serde(default)]
    snapshots: Option<Vec<String>>,
    #[serde(default)]
    exclude: Option<Vec<String>>,
    #[serde(default)]
    watch: Option<RawWatch>,
}

#[derive(Debug, Deserialize)]
struct RawWatch {
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    interval_secs: Option<u64>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Yaml(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(value: serde_yaml::Error) -> Self {
        Self::Yaml(value)
    }
}

// User config first, repo config on top; repo-level settings win.
pub fn load_effective_config(
    repo_config: Option<&Path>,
    user_config: Option<&Path>,
) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();

    if let Some(path) = user_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_layer(path)?);
    }
    if let Some(path) = repo_config.filter(|path| path.exists()) {
        merge_layer(&mut merged, load_layer(path)?);
    }

    Ok(merged)
}

pub fn load_config_file(path: &Path) -> Result<EffectiveConfig, ConfigError> {
    let mut merged = EffectiveConfig::default();
    merge_layer(&mut merged, load_layer(path)?);
    Ok(merged)
}

fn load_layer(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&content)?)
}

fn merge_layer(merged: &mut EffectiveConfig, layer: RawConfig) {
    if let Some(events) = layer.events {
        merge_sources_dedup(&mut merged.events, events);
    }
    if let Some(snapshots) = layer.snapshots {
        merge_sources_dedup(&mut merged.snapshots, snapshots);
    }
    if let Some(exclude) = layer.exclude {
        merged.exclude = exclude;
    }
    if let Some(watch) = layer.watch {
        if let Some(dir) = watch.dir {
            merged.watch.dir = Some(dir);
        }
        if let Some(interval_secs) = watch.interval_secs {
            merged.watch.interval_secs = Some(interval_secs);
        }
    }
}

fn merge_sources_dedup(existing: &mut Vec<String>, incoming: Vec<String>) {
    for source in incoming {
        if !existing.contains(&source) {
            existing.push(source);
        }
    }
}

pub fn default_config_yaml() -> String {
    r#"# Sources are files, directories, or globs of newline-delimited JSON records.
events:
  - ./output/events.jsonl
snapshots:
  - ./output/snapshots.jsonl
watch:
  dir: ./output
  interval_secs: 1
exclude: []
"#
    .to_string()
}

pub fn expand_tilde(path: &str, home: &Path) -> PathBuf {
    if path == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = path.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sources_excludes_and_watch_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yml");
        std::fs::write(
            &path,
            r#"events:
  - ~/collector/events.jsonl
  - ./output/*.jsonl
snapshots:
  - ./output/snapshots.jsonl
watch:
  dir: ./output
  interval_secs: 2
exclude:
  - "**/archive-*"
"#,
        )
        .expect("write config");

        let parsed = load_config_file(&path).expect("parse config");
        assert_eq!(parsed.events.len(), 2);
        assert_eq!(parsed.snapshots.len(), 1);
        assert_eq!(parsed.exclude, vec!["**/archive-*".to_string()]);
        assert_eq!(parsed.watch.dir.as_deref(), Some("./output"));
        assert_eq!(parsed.watch.interval_secs, Some(2));
    }

    #[test]
    fn repo_layer_extends_sources_and_replaces_excludes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let user_cfg = dir.path().join("user.yml");
        let repo_cfg = dir.path().join("repo.yml");
        std::fs::write(
            &user_cfg,
            r#"events:
  - /shared/events.jsonl
  - /shared/dup.jsonl
exclude:
  - "user-*"
watch:
  dir: /shared
"#,
        )
        .expect("write user config");
        std::fs::write(
            &repo_cfg,
            r#"events:
  - /repo/events.jsonl
  - /shared/dup.jsonl
exclude:
  - "repo-*"
watch:
  interval_secs: 5
"#,
        )
        .expect("write repo config");

        let merged =
            load_effective_config(Some(&repo_cfg), Some(&user_cfg)).expect("merge config");
        assert_eq!(
            merged.events,
            vec![
                "/shared/events.jsonl".to_string(),
                "/shared/dup.jsonl".to_string(),
                "/repo/events.jsonl".to_string(),
            ]
        );
        assert_eq!(merged.exclude, vec!["repo-*".to_string()]);
        assert_eq!(merged.watch.dir.as_deref(), Some("/shared"));
        assert_eq!(merged.watch.interval_secs, Some(5));
    }

    #[test]
    fn missing_config_files_merge_to_empty_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let merged = load_effective_config(
            Some(&dir.path().join("absent.yml")),
            Some(&dir.path().join("also-absent.yml")),
        )
        .expect("merge config");
        assert_eq!(merged, EffectiveConfig::default());
    }

    #[test]
    fn expands_tilde_paths() {
        let expanded = expand_tilde("~/collector/events.jsonl", Path::new("/home/tester"));
        assert_eq!(expanded, Path::new("/home/tester/collector/events.jsonl"));
        assert_eq!(expand_tilde("~", Path::new("/home/tester")), Path::new("/home/tester"));
        assert_eq!(
            expand_tilde("/abs/events.jsonl", Path::new("/home/tester")),
            Path::new("/abs/events.jsonl")
        );
    }
}
