//! Platform identification module for linkscout
//!
//! This module knows which social media platforms are supported, how each one is
//! reached (browser automation, video extractor, channel preview), and how free-form
//! account identifiers resolve to a canonical account URL.

mod domain;
mod resolve;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export main functions
pub use domain::identify_platform;
pub use resolve::resolve_account;

/// Supported social media platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    TikTok,
    X,
    Facebook,
    YouTube,
    Telegram,
}

/// The kind of external mechanism used to fetch links from a platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMechanism {
    /// Scripted browser session driven by a helper command; needs a cookie file
    Browser,
    /// Video metadata extractor (yt-dlp); stateless
    VideoExtractor,
    /// Public channel preview page; stateless
    ChannelPreview,
}

impl Platform {
    /// Returns all supported platforms
    pub fn all() -> [Platform; 6] {
        [
            Self::Instagram,
            Self::TikTok,
            Self::X,
            Self::Facebook,
            Self::YouTube,
            Self::Telegram,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::X => "x",
            Self::Facebook => "facebook",
            Self::YouTube => "youtube",
            Self::Telegram => "telegram",
        }
    }

    /// Returns the mechanism this platform is fetched through
    pub fn mechanism(&self) -> FetchMechanism {
        match self {
            Self::Instagram | Self::X | Self::Facebook => FetchMechanism::Browser,
            Self::TikTok | Self::YouTube => FetchMechanism::VideoExtractor,
            Self::Telegram => FetchMechanism::ChannelPreview,
        }
    }

    /// Returns true if fetches for this platform borrow a credential from the pool
    pub fn requires_credential(&self) -> bool {
        self.mechanism() == FetchMechanism::Browser
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "x" | "twitter" => Ok(Self::X),
            "facebook" => Ok(Self::Facebook),
            "youtube" => Ok(Self::YouTube),
            "telegram" => Ok(Self::Telegram),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

/// YouTube channel tab to read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Videos,
    #[default]
    Shorts,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Videos => "videos",
            Self::Shorts => "shorts",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "videos" => Ok(Self::Videos),
            "shorts" => Ok(Self::Shorts),
            other => Err(format!(
                "unknown content type '{}' (expected videos or shorts)",
                other
            )),
        }
    }
}

/// A resolved account on a specific platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountTarget {
    pub platform: Platform,

    /// Handle or channel name as it appears in the account URL
    pub username: String,

    /// Canonical account URL
    pub url: String,
}

impl AccountTarget {
    /// URL of the page the fetch back-end should read
    ///
    /// YouTube channels are split into tabs; every other platform reads the
    /// account URL as is.
    pub fn listing_url(&self, content: ContentKind) -> String {
        match self.platform {
            Platform::YouTube => format!("{}/{}", self.url, content.as_str()),
            _ => self.url.clone(),
        }
    }
}
