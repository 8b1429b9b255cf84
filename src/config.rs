use crate::constants::*;
use crate::error::{IngestError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the pipeline needs, passed explicitly to constructors.
///
/// Loaded from TOML, then overridden from `WORKSHOP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub transport: TransportConfig,
    pub store: StoreConfig,
    /// Base URL that artifact keys are appended to when linking records.
    pub public_base_url: String,
    pub fetcher: FetcherConfig,
    pub reconcile: ReconcileConfig,
    pub worker: WorkerConfig,
    pub records_db: PathBuf,
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Fs,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Root directory for the `fs` backend.
    pub root: PathBuf,
    /// Object storage endpoint for the `http` backend.
    pub url: Option<String>,
    pub service_key: Option<String>,
    pub content_container: String,
    pub missing_container: String,
    pub artifact_extension: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    Remote,
    Cli,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub kind: FetcherKind,
    pub timeout_secs: u64,
    pub remote: RemoteFetcherConfig,
    pub cli: CliFetcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteFetcherConfig {
    pub api_base: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliFetcherConfig {
    pub program: Option<String>,
    /// Argument template; `{id}` and `{out}` are substituted per fetch.
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub not_found_exit_code: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub poll_interval_secs: u64,
    pub max_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub max_deliveries: u32,
    pub batch_size: usize,
    pub idle_poll_millis: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            store: StoreConfig::default(),
            public_base_url: "http://localhost:8080".to_string(),
            fetcher: FetcherConfig::default(),
            reconcile: ReconcileConfig::default(),
            worker: WorkerConfig::default(),
            records_db: PathBuf::from("data/records.db"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("data/queues") }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Fs,
            root: PathBuf::from("data/blobs"),
            url: None,
            service_key: None,
            content_container: DEFAULT_CONTENT_CONTAINER.to_string(),
            missing_container: DEFAULT_MISSING_CONTAINER.to_string(),
            artifact_extension: DEFAULT_ARTIFACT_EXTENSION.to_string(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            kind: FetcherKind::Remote,
            timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            remote: RemoteFetcherConfig::default(),
            cli: CliFetcherConfig::default(),
        }
    }
}

impl Default for RemoteFetcherConfig {
    fn default() -> Self {
        Self { api_base: DEFAULT_API_BASE.to_string(), api_key: None }
    }
}

impl Default for CliFetcherConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: vec!["{id}".to_string(), "{out}".to_string()],
            work_dir: PathBuf::from("data/scratch"),
            not_found_exit_code: DEFAULT_NOT_FOUND_EXIT_CODE,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_wait_secs: DEFAULT_MAX_WAIT_SECS,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            batch_size: DEFAULT_BATCH_SIZE,
            idle_poll_millis: DEFAULT_IDLE_POLL_MILLIS,
        }
    }
}

impl ReconcileConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WorkerConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_millis)
    }
}

impl PipelineConfig {
    /// Load from `path` (or the default path if it exists), apply environment
    /// overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            IngestError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `WORKSHOP_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WORKSHOP_TRANSPORT_DIR") {
            self.transport.dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WORKSHOP_STORE_ROOT") {
            self.store.root = PathBuf::from(v);
        }
        if let Some(v) = lookup("WORKSHOP_STORE_URL") {
            self.store.url = Some(v);
            self.store.backend = StoreBackend::Http;
        }
        if let Some(v) = lookup("WORKSHOP_STORE_KEY") {
            self.store.service_key = Some(v);
        }
        if let Some(v) = lookup("WORKSHOP_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = lookup("WORKSHOP_FETCHER") {
            match v.trim().to_ascii_lowercase().as_str() {
                "cli" => self.fetcher.kind = FetcherKind::Cli,
                "remote" => self.fetcher.kind = FetcherKind::Remote,
                other => tracing::warn!("Ignoring unknown WORKSHOP_FETCHER value '{}'", other),
            }
        }
        if let Some(v) = lookup("WORKSHOP_API_BASE") {
            self.fetcher.remote.api_base = v;
        }
        if let Some(v) = lookup("WORKSHOP_API_KEY") {
            self.fetcher.remote.api_key = Some(v);
        }
        if let Some(v) = lookup("WORKSHOP_CLI_PROGRAM") {
            self.fetcher.cli.program = Some(v);
        }
        if let Some(v) = lookup("WORKSHOP_RECORDS_DB") {
            self.records_db = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile.poll_interval_secs == 0 {
            return Err(IngestError::Config("reconcile.poll_interval_secs must be > 0".into()));
        }
        if self.reconcile.max_wait_secs < self.reconcile.poll_interval_secs {
            return Err(IngestError::Config(
                "reconcile.max_wait_secs must be >= reconcile.poll_interval_secs".into(),
            ));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(IngestError::Config("fetcher.timeout_secs must be > 0".into()));
        }
        if self.worker.concurrency == 0 || self.worker.batch_size == 0 {
            return Err(IngestError::Config("worker concurrency and batch_size must be > 0".into()));
        }
        if self.worker.max_deliveries == 0 {
            return Err(IngestError::Config("worker.max_deliveries must be > 0".into()));
        }
        if self.store.artifact_extension.is_empty() || self.store.artifact_extension == MISSING_EXTENSION {
            return Err(IngestError::Config(format!(
                "store.artifact_extension must be non-empty and not '{}'",
                MISSING_EXTENSION
            )));
        }
        if self.store.backend == StoreBackend::Http
            && (self.store.url.is_none() || self.store.service_key.is_none())
        {
            return Err(IngestError::Config("http store requires store.url and store.service_key".into()));
        }
        if self.fetcher.kind == FetcherKind::Cli && self.fetcher.cli.program.is_none() {
            return Err(IngestError::Config("cli fetcher requires fetcher.cli.program".into()));
        }
        Ok(())
    }
}
