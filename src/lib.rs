//! Linkscout: recent-link monitoring for social media accounts
//!
//! This crate orchestrates fetches of recent content links from accounts on several
//! platforms. Each platform is reached through an external, failure-prone back-end;
//! linkscout provides the shared machinery around them:
//! - an operation queue with a fixed worker pool and per-operation lifecycle tracking
//! - per-platform credential pools that rotate cookies and retire failing ones
//! - a round-robin scheduler that keeps re-checking a managed set of accounts

pub mod config;
pub mod credentials;
pub mod fetch;
pub mod orchestrator;
pub mod output;
pub mod platform;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for linkscout operations
#[derive(Debug, Error)]
pub enum LinkscoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Credential error: {0}")]
    Credential(#[from] credentials::CredentialError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Operation queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkscoutError {
    pub(crate) fn operation_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Operation",
            id: id.into(),
        }
    }

    pub(crate) fn account_not_found(id: i64) -> Self {
        Self::NotFound {
            kind: "Account",
            id: id.to_string(),
        }
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors for malformed identifiers and unsupported platforms
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Empty account identifier")]
    EmptyIdentifier,

    #[error("Malformed account identifier '{0}'")]
    Malformed(String),

    #[error("Unsupported platform for '{0}'. Supported: Instagram, TikTok, X/Twitter, Facebook, YouTube, Telegram")]
    UnsupportedPlatform(String),

    #[error("No fetch back-end is configured for {0}")]
    NoBackend(platform::Platform),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Account is already managed: {0}")]
    DuplicateAccount(String),
}

/// Result type alias for linkscout operations
pub type Result<T> = std::result::Result<T, LinkscoutError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use orchestrator::Orchestrator;
pub use platform::{identify_platform, resolve_account, AccountTarget, Platform};
pub use queue::{OperationQueue, OperationStatus, SubmitOptions};
pub use scheduler::RoundRobinScheduler;
pub use state::{AccountStatus, OperationState};
