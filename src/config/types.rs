use crate::platform::{ContentKind, Platform};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for linkscout
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Per-platform overrides keyed by platform name
    #[serde(default)]
    pub platforms: BTreeMap<String, PlatformConfig>,
}

/// Settings shared by every fetch
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Run browser helpers without a visible window
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy URL handed to every back-end
    #[serde(default)]
    pub proxy: Option<String>,

    /// Upper bound on a single fetch, in seconds
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Links returned per fetch unless a request or platform says otherwise
    #[serde(rename = "default-max-items", default = "default_max_items")]
    pub default_max_items: usize,
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of operations processed at once
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Operations that may wait in the channel before submission suspends
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Round-robin scheduler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduler ticks
    #[serde(rename = "tick-interval-secs", default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,

    /// Accounts submitted per tick
    #[serde(rename = "batch-size", default = "default_batch_size")]
    pub batch_size: usize,

    /// Start the scheduler with monitoring even if it was last stopped
    #[serde(default)]
    pub autostart: bool,
}

/// Storage locations
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Root of the per-platform cookie directories
    #[serde(rename = "credentials-dir")]
    pub credentials_dir: String,
}

/// Credential pool policy
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    /// Consecutive failures that burn a credential
    #[serde(rename = "burn-threshold", default = "default_burn_threshold")]
    pub burn_threshold: u32,
}

/// Per-platform overrides
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformConfig {
    #[serde(rename = "max-items")]
    pub max_items: Option<usize>,

    /// Whether a credential may only serve one fetch at a time
    #[serde(rename = "exclusive-credentials")]
    pub exclusive_credentials: Option<bool>,

    /// Program and leading arguments of the fetch back-end
    pub command: Option<Vec<String>>,

    /// YouTube channel tab to read
    #[serde(rename = "content-type")]
    pub content_type: Option<ContentKind>,

    /// Base URL of the channel preview site
    #[serde(rename = "base-url")]
    pub base_url: Option<String>,
}

fn default_headless() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    180
}

fn default_max_items() -> usize {
    5
}

fn default_concurrency() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    256
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_batch_size() -> usize {
    1
}

fn default_burn_threshold() -> u32 {
    3
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout_secs: default_timeout_secs(),
            default_max_items: default_max_items(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            batch_size: default_batch_size(),
            autostart: false,
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            burn_threshold: default_burn_threshold(),
        }
    }
}

impl Config {
    /// Builds a configuration with default settings for the given storage locations
    pub fn with_storage(database_path: impl Into<String>, credentials_dir: impl Into<String>) -> Self {
        Self {
            fetch: FetchConfig::default(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig {
                database_path: database_path.into(),
                credentials_dir: credentials_dir.into(),
            },
            credentials: CredentialsConfig::default(),
            platforms: BTreeMap::new(),
        }
    }

    /// Returns the overrides configured for a platform, if any
    pub fn platform(&self, platform: Platform) -> Option<&PlatformConfig> {
        self.platforms.get(platform.as_str())
    }

    /// Links returned per fetch for a platform
    pub fn max_items_for(&self, platform: Platform) -> usize {
        self.platform(platform)
            .and_then(|p| p.max_items)
            .unwrap_or(self.fetch.default_max_items)
    }

    /// Whether credentials of a platform are leased exclusively (default true)
    pub fn exclusive_credentials(&self, platform: Platform) -> bool {
        self.platform(platform)
            .and_then(|p| p.exclusive_credentials)
            .unwrap_or(true)
    }

    /// Content type used when a request does not name one
    pub fn content_type_for(&self, platform: Platform) -> ContentKind {
        self.platform(platform)
            .and_then(|p| p.content_type)
            .unwrap_or_default()
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.database_path)
    }

    pub fn credentials_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.credentials_dir)
    }
}
