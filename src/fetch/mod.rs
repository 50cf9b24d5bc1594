//! Fetch layer: a uniform contract over every platform back-end
//!
//! A back-end takes a resolved account and returns the most recent content links,
//! newest first, or a typed `FetchError`. Back-end specific failures (exit codes,
//! stderr text, HTTP statuses, I/O errors, elapsed timeouts) are normalized here.

mod command;
mod telegram;

pub use command::{classify_failure, CommandSource, CommandStyle};
pub use telegram::{parse_channel_preview, ChannelPreviewSource};

use crate::config::Config;
use crate::platform::{AccountTarget, ContentKind, FetchMechanism, Platform};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default program used for video extractor platforms
pub const DEFAULT_EXTRACTOR: &str = "yt-dlp";

/// Default base URL of the Telegram channel preview site
pub const DEFAULT_TELEGRAM_BASE_URL: &str = "https://t.me";

/// Kinds of fetch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorKind {
    Timeout,
    NotFound,
    AuthRejected,
    RateLimited,
    Unknown,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::AuthRejected => "auth_rejected",
            Self::RateLimited => "rate_limited",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A normalized fetch failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FetchErrorKind::Timeout,
            format!("fetch did not finish within {}s", after.as_secs()),
        )
    }

    /// Returns true if this failure should count against the credential used
    ///
    /// A missing account says nothing about the credential.
    pub fn counts_against_credential(&self) -> bool {
        self.kind != FetchErrorKind::NotFound
    }
}

/// Everything a back-end needs for one fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub target: AccountTarget,
    pub content_type: ContentKind,
    pub max_items: usize,
    /// Cookie file leased from the credential pool
    pub credential: Option<PathBuf>,
    pub proxy: Option<String>,
    pub headless: bool,
}

impl FetchRequest {
    pub fn platform(&self) -> Platform {
        self.target.platform
    }

    /// URL of the page to read
    pub fn listing_url(&self) -> String {
        self.target.listing_url(self.content_type)
    }
}

/// A platform back-end that returns recent links for an account
#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Fetches up to `request.max_items` links, newest first
    async fn fetch_links(&self, request: &FetchRequest) -> Result<Vec<String>, FetchError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Routes fetches to the back-end registered for each platform
pub struct FetchDispatcher {
    sources: HashMap<Platform, Arc<dyn LinkSource>>,
    timeout: Duration,
}

impl FetchDispatcher {
    /// Creates a dispatcher with no back-ends
    pub fn new(timeout: Duration) -> Self {
        Self {
            sources: HashMap::new(),
            timeout,
        }
    }

    /// Builds the default back-ends for every platform the configuration supports
    ///
    /// Browser platforms only get a back-end when a helper command is configured.
    /// Video extractor platforms default to `yt-dlp`; Telegram reads the public
    /// channel preview.
    pub fn from_config(config: &Config) -> Result<Self, reqwest::Error> {
        let mut dispatcher = Self::new(config.fetch_timeout());
        let client = build_http_client(config.fetch.proxy.as_deref(), config.fetch_timeout())?;

        for platform in Platform::all() {
            let overrides = config.platform(platform);
            let command = overrides.and_then(|p| p.command.clone());

            let source: Option<Arc<dyn LinkSource>> = match platform.mechanism() {
                FetchMechanism::Browser => command.and_then(|cmd| {
                    CommandSource::from_command(&cmd, CommandStyle::BrowserHelper)
                        .map(|s| Arc::new(s) as Arc<dyn LinkSource>)
                }),
                FetchMechanism::VideoExtractor => {
                    let cmd = command.unwrap_or_else(|| vec![DEFAULT_EXTRACTOR.to_string()]);
                    CommandSource::from_command(&cmd, CommandStyle::VideoExtractor)
                        .map(|s| Arc::new(s) as Arc<dyn LinkSource>)
                }
                FetchMechanism::ChannelPreview => {
                    let base_url = overrides
                        .and_then(|p| p.base_url.clone())
                        .unwrap_or_else(|| DEFAULT_TELEGRAM_BASE_URL.to_string());
                    Some(Arc::new(ChannelPreviewSource::new(client.clone(), base_url)))
                }
            };

            match source {
                Some(source) => {
                    tracing::debug!("Registered {} back-end for {}", source.name(), platform);
                    dispatcher.register(platform, source);
                }
                None => {
                    tracing::info!("No fetch back-end configured for {}", platform);
                }
            }
        }

        Ok(dispatcher)
    }

    /// Registers (or replaces) the back-end for a platform
    pub fn register(&mut self, platform: Platform, source: Arc<dyn LinkSource>) {
        self.sources.insert(platform, source);
    }

    /// Returns true if a back-end is registered for the platform
    pub fn supports(&self, platform: Platform) -> bool {
        self.sources.contains_key(&platform)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Performs one fetch
    ///
    /// Applies the fetch timeout, drops blank and duplicate links while keeping
    /// order, and truncates to the requested number of links.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Vec<String>, FetchError> {
        let platform = request.platform();
        let source = self.sources.get(&platform).ok_or_else(|| {
            FetchError::new(
                FetchErrorKind::Unknown,
                format!("no fetch back-end configured for {}", platform),
            )
        })?;

        tracing::debug!(
            "Fetching {} via {} (max {})",
            request.target.url,
            source.name(),
            request.max_items
        );

        let links = tokio::time::timeout(self.timeout, source.fetch_links(request))
            .await
            .map_err(|_| FetchError::timeout(self.timeout))??;

        Ok(normalize_links(links, request.max_items))
    }
}

/// Trims, drops blanks and duplicates (first occurrence wins) and truncates
pub fn normalize_links(links: Vec<String>, max_items: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .map(|link| link.trim().to_string())
        .filter(|link| !link.is_empty())
        .filter(|link| seen.insert(link.clone()))
        .take(max_items)
        .collect()
}

/// Builds the HTTP client used by HTTP back-ends
///
/// # Arguments
///
/// * `proxy` - Optional proxy URL applied to every request
/// * `timeout` - Per-request timeout
pub fn build_http_client(proxy: Option<&str>, timeout: Duration) -> Result<Client, reqwest::Error> {
    let user_agent = format!("linkscout/{}", env!("CARGO_PKG_VERSION"));

    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }

    builder.build()
}
