//! Pipeline configuration
//!
//! Precedence, lowest first: defaults, TOML file, environment, CLI flags.

use crate::error::{IndexError, Result};
use crystal_common::env;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Defaults
// ============================================================================

/// Sitemap index listing every business-directory chunk.
pub const DEFAULT_BASE_URL: &str = "https://www.dnb.com/business-directory-sitemapindex.xml";

/// The site's own top-level sitemap. Listed in the index but not a chunk.
pub const DEFAULT_SENTINEL_URL: &str = "https://www.dnb.com/sitemap.xml";

/// The directory host rejects non-browser user agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/84.0.4147.105 Safari/537.36";

pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_CHUNK_DIR: &str = "dnb_export";
pub const DEFAULT_SHARD_DIR: &str = "dnb_indexes";
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_SORT_RUN_BYTES: usize = 64 * 1024 * 1024;
pub const DEFAULT_SORT_FAN_IN: usize = 64;

/// Configuration for one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Sitemap index URL
    pub base_url: String,

    /// Location skipped by the downloader
    pub sentinel_url: String,

    pub user_agent: String,

    /// Concurrent chunk downloads
    pub max_workers: usize,

    /// Where downloaded chunks land (transient)
    pub chunk_store_path: PathBuf,

    /// Where index shards land (durable, appended to)
    pub shard_output_path: PathBuf,

    /// Directory for the intermediate identifier streams
    pub work_dir: PathBuf,

    /// Per-request timeout
    pub timeout_secs: u64,

    /// Extra attempts per chunk after the first failure (0 = no retry)
    pub max_retries: u32,

    /// Base delay for exponential backoff between chunk attempts
    pub retry_backoff_ms: u64,

    /// In-memory run size for the external sort
    pub sort_run_bytes: usize,

    /// Maximum runs merged at once
    pub sort_fan_in: usize,

    /// Keep the chunk store after extraction
    pub keep_chunks: bool,

    pub show_progress: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            sentinel_url: DEFAULT_SENTINEL_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_workers: DEFAULT_MAX_WORKERS,
            chunk_store_path: PathBuf::from(DEFAULT_CHUNK_DIR),
            shard_output_path: PathBuf::from(DEFAULT_SHARD_DIR),
            work_dir: PathBuf::from("."),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 0,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            sort_run_bytes: DEFAULT_SORT_RUN_BYTES,
            sort_fan_in: DEFAULT_SORT_FAN_IN,
            keep_chunks: false,
            show_progress: true,
        }
    }
}

impl IndexConfig {
    pub fn builder() -> IndexConfigBuilder {
        IndexConfigBuilder::default()
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Load a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            IndexError::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        toml::from_str(&text).map_err(|e| {
            IndexError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Override fields from `CRYSTAL_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        env::load_dotenv();

        if let Some(url) = env::var("CRYSTAL_BASE_URL") {
            self.base_url = url;
        }
        if let Some(url) = env::var("CRYSTAL_SENTINEL_URL") {
            self.sentinel_url = url;
        }
        if let Some(agent) = env::var("CRYSTAL_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(workers) = env::parse("CRYSTAL_MAX_WORKERS")? {
            self.max_workers = workers;
        }
        if let Some(dir) = env::var("CRYSTAL_CHUNK_DIR") {
            self.chunk_store_path = PathBuf::from(dir);
        }
        if let Some(dir) = env::var("CRYSTAL_SHARD_DIR") {
            self.shard_output_path = PathBuf::from(dir);
        }
        if let Some(dir) = env::var("CRYSTAL_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env::parse("CRYSTAL_TIMEOUT_SECS")? {
            self.timeout_secs = secs;
        }
        if let Some(retries) = env::parse("CRYSTAL_MAX_RETRIES")? {
            self.max_retries = retries;
        }
        if let Some(ms) = env::parse("CRYSTAL_RETRY_BACKOFF_MS")? {
            self.retry_backoff_ms = ms;
        }
        if let Some(bytes) = env::parse("CRYSTAL_SORT_RUN_BYTES")? {
            self.sort_run_bytes = bytes;
        }
        if let Some(fan_in) = env::parse("CRYSTAL_SORT_FAN_IN")? {
            self.sort_fan_in = fan_in;
        }
        if let Some(keep) = env::flag("CRYSTAL_KEEP_CHUNKS")? {
            self.keep_chunks = keep;
        }
        if let Some(show) = env::flag("CRYSTAL_SHOW_PROGRESS")? {
            self.show_progress = show;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(IndexError::Config("Base URL cannot be empty".to_string()));
        }

        if url::Url::parse(&self.base_url).is_err() {
            return Err(IndexError::Config(format!("Base URL is not a valid URL: {}", self.base_url)));
        }

        if self.user_agent.trim().is_empty() {
            return Err(IndexError::Config("User agent cannot be empty".to_string()));
        }

        if self.max_workers == 0 {
            return Err(IndexError::Config("max_workers must be greater than 0".to_string()));
        }

        if self.timeout_secs == 0 {
            return Err(IndexError::Config("Timeout must be greater than 0".to_string()));
        }

        if self.sort_run_bytes == 0 {
            return Err(IndexError::Config("sort_run_bytes must be greater than 0".to_string()));
        }

        if self.sort_fan_in < 2 {
            return Err(IndexError::Config("sort_fan_in must be at least 2".to_string()));
        }

        // The chunk store is deleted after extraction.
        if self.chunk_store_path == self.shard_output_path {
            return Err(IndexError::Config(format!(
                "Chunk store and shard output cannot share a directory ({})",
                self.chunk_store_path.display()
            )));
        }

        Ok(())
    }
}

/// Builder for IndexConfig
#[derive(Debug, Default)]
pub struct IndexConfigBuilder {
    config: IndexConfig,
}

impl IndexConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn sentinel_url(mut self, url: impl Into<String>) -> Self {
        self.config.sentinel_url = url.into();
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    pub fn chunk_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chunk_store_path = path.into();
        self
    }

    pub fn shard_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.shard_output_path = path.into();
        self
    }

    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn sort_run_bytes(mut self, bytes: usize) -> Self {
        self.config.sort_run_bytes = bytes;
        self
    }

    pub fn sort_fan_in(mut self, fan_in: usize) -> Self {
        self.config.sort_fan_in = fan_in;
        self
    }

    pub fn keep_chunks(mut self, keep: bool) -> Self {
        self.config.keep_chunks = keep;
        self
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.config.show_progress = show;
        self
    }

    pub fn build(self) -> IndexConfig {
        self.config
    }
}
