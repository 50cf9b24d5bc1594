//! External command back-ends
//!
//! Browser helpers and video extractors run as child processes. Links are read from
//! stdout, one per line.
//!
//! Helper exit codes:
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 2 | Account not found |
//! | 3 | Authentication rejected |
//! | 4 | Rate limited |
//! | other | Classified from stderr |

use crate::fetch::{FetchError, FetchErrorKind, FetchRequest, LinkSource};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

pub const ENV_COOKIES: &str = "LINKSCOUT_COOKIES";
pub const ENV_HEADLESS: &str = "LINKSCOUT_HEADLESS";
pub const ENV_PROXY: &str = "LINKSCOUT_PROXY";
pub const ENV_MAX_ITEMS: &str = "LINKSCOUT_MAX_ITEMS";
pub const ENV_PLATFORM: &str = "LINKSCOUT_PLATFORM";

/// How arguments are passed to the child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStyle {
    /// Account URL as the last argument; settings in `LINKSCOUT_*` variables
    BrowserHelper,
    /// yt-dlp compatible flags
    VideoExtractor,
}

/// Runs an external program to fetch links
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
    style: CommandStyle,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, style: CommandStyle) -> Self {
        Self {
            program: program.into(),
            args,
            style,
        }
    }

    /// Builds a source from a `[program, args...]` list; None if the list is empty
    pub fn from_command(command: &[String], style: CommandStyle) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self::new(program.clone(), args.to_vec(), style))
    }

    fn build_command(&self, request: &FetchRequest) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        command
            .env(ENV_PLATFORM, request.platform().as_str())
            .env(ENV_HEADLESS, if request.headless { "1" } else { "0" })
            .env(ENV_MAX_ITEMS, request.max_items.to_string());
        if let Some(cookies) = &request.credential {
            command.env(ENV_COOKIES, cookies);
        }
        if let Some(proxy) = &request.proxy {
            command.env(ENV_PROXY, proxy);
        }

        if self.style == CommandStyle::VideoExtractor {
            command
                .arg("--flat-playlist")
                .arg("--no-warnings")
                .args(["--print", "url"])
                .arg("--playlist-end")
                .arg(request.max_items.to_string());
            if let Some(proxy) = &request.proxy {
                command.arg("--proxy").arg(proxy);
            }
            if let Some(cookies) = &request.credential {
                command.arg("--cookies").arg(cookies);
            }
        }

        command.arg(request.listing_url());

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl LinkSource for CommandSource {
    async fn fetch_links(&self, request: &FetchRequest) -> Result<Vec<String>, FetchError> {
        let output = self
            .build_command(request)
            .output()
            .await
            .map_err(|e| {
                FetchError::new(
                    FetchErrorKind::Unknown,
                    format!("failed to run {}: {}", self.program, e),
                )
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(classify_failure(output.status.code(), &stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
            .map(str::to_string)
            .collect())
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Maps a failed child process to a fetch error
///
/// Dedicated exit codes win; otherwise the stderr text is searched for well-known
/// messages.
///
/// # Arguments
///
/// * `exit_code` - Exit code, or None if the process was killed by a signal
/// * `stderr` - Captured standard error
pub fn classify_failure(exit_code: Option<i32>, stderr: &str) -> FetchError {
    let detail = stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| match exit_code {
            Some(code) => format!("exited with status {}", code),
            None => "terminated by signal".to_string(),
        });

    let kind = match exit_code {
        Some(2) => FetchErrorKind::NotFound,
        Some(3) => FetchErrorKind::AuthRejected,
        Some(4) => FetchErrorKind::RateLimited,
        _ => classify_stderr(&stderr.to_lowercase()),
    };

    FetchError::new(kind, detail)
}

fn classify_stderr(stderr: &str) -> FetchErrorKind {
    const RATE_LIMITED: &[&str] = &["429", "rate limit", "rate-limit", "too many requests"];
    const AUTH_REJECTED: &[&str] = &[
        "401",
        "403",
        "login required",
        "log in",
        "sign in",
        "checkpoint",
        "authentication",
        "cookies are no longer valid",
    ];
    const NOT_FOUND: &[&str] = &["404", "not found", "does not exist", "page isn't available"];
    const TIMEOUT: &[&str] = &["timed out", "timeout"];

    let contains_any = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if contains_any(RATE_LIMITED) {
        FetchErrorKind::RateLimited
    } else if contains_any(AUTH_REJECTED) {
        FetchErrorKind::AuthRejected
    } else if contains_any(NOT_FOUND) {
        FetchErrorKind::NotFound
    } else if contains_any(TIMEOUT) {
        FetchErrorKind::Timeout
    } else {
        FetchErrorKind::Unknown
    }
}
