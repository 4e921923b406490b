use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::warehouse::PollIntervals;

/// Prefix under which every object written by the job lives.
pub const DATA_PREFIX: &str = "big-query-data";

/// Root configuration structure, deserialized from `.manifest-harvester/config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub job: JobConfig,
    pub warehouse: WarehouseConfig,
    pub store: StoreConfig,
}

/// Settings for the two-phase batch pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Local scratch space for staging directories, archives and unzip dirs.
    pub working_dir: PathBuf,
    /// A batch is sealed once its content exceeds this many bytes.
    pub batch_size_bytes: u64,
    /// Object prefix for sealed batches; wiped before and after every run.
    pub temp_prefix: String,
    /// Object key of the published aggregate.
    pub aggregate_key: String,
    /// Upload attempts per sealed batch before the run is aborted.
    pub upload_attempts: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            working_dir: std::env::temp_dir().join("manifest-harvester"),
            batch_size_bytes: 200 * 1024 * 1024,
            temp_prefix: format!("{}/manifest-data-zip", DATA_PREFIX),
            aggregate_key: format!("{}/collated.json", DATA_PREFIX),
            upload_attempts: 3,
        }
    }
}

/// Warehouse polling and paging.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub completion_poll_ms: u64,
    pub status_poll_ms: u64,
    /// Rows per page served by the local warehouse.
    pub page_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        WarehouseConfig {
            completion_poll_ms: 100,
            status_poll_ms: 1000,
            page_size: 1000,
        }
    }
}

impl WarehouseConfig {
    pub fn poll_intervals(&self) -> PollIntervals {
        PollIntervals {
            completion: Duration::from_millis(self.completion_poll_ms),
            status: Duration::from_millis(self.status_poll_ms),
        }
    }
}

/// Object store location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory backing the local object store.
    pub root: PathBuf,
    /// Bucket name, used as a subdirectory of `root`.
    pub bucket: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from(".manifest-harvester").join("store"),
            bucket: "developer-analytics-audit-report".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }
}

/// Load the configuration, searching in order:
///
/// 1. `config_override`: path passed via `--config`
/// 2. `<project_path>/.manifest-harvester/config.toml`
/// 3. `~/.config/manifest-harvester/config.toml`
/// 4. Built-in [`Config::default`]
///
/// Environment overrides ([`apply_env_overrides`]) are applied on top.
pub fn load_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    let mut config = load_file_config(project_path, config_override)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

fn load_file_config(project_path: &Path, config_override: Option<&Path>) -> Result<Config> {
    if let Some(path) = config_override {
        return read_config(path);
    }

    let project_config = project_path.join(".manifest-harvester").join("config.toml");
    if project_config.exists() {
        return read_config(&project_config);
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home
            .join(".config")
            .join("manifest-harvester")
            .join("config.toml");
        if home_config.exists() {
            return read_config(&home_config);
        }
    }

    Ok(Config::default())
}

fn read_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Override config values from the environment:
///
/// - `HARVESTER_WORKING_DIR` → `job.working_dir`
/// - `HARVESTER_STORE_ROOT` → `store.root`
/// - `HARVESTER_BUCKET` → `store.bucket`
/// - `HARVESTER_COLLATED_FILENAME` → `job.aggregate_key` as `big-query-data/<name>`
pub fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| var(name).filter(|v| !v.trim().is_empty());

    if let Some(dir) = non_empty("HARVESTER_WORKING_DIR") {
        config.job.working_dir = PathBuf::from(dir);
    }
    if let Some(root) = non_empty("HARVESTER_STORE_ROOT") {
        config.store.root = PathBuf::from(root);
    }
    if let Some(bucket) = non_empty("HARVESTER_BUCKET") {
        config.store.bucket = bucket;
    }
    if let Some(name) = non_empty("HARVESTER_COLLATED_FILENAME") {
        config.job.aggregate_key = format!("{}/{}", DATA_PREFIX, name);
    }
}
