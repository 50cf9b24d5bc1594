//! Telegram channel back-end
//!
//! Reads the public web preview of a channel (`<base>/s/<channel>`) and turns each
//! message post into a `https://t.me/<channel>/<id>` link.

use crate::fetch::{FetchError, FetchErrorKind, FetchRequest, LinkSource};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};

/// Fetches recent posts from a channel's public preview page
pub struct ChannelPreviewSource {
    client: Client,
    base_url: String,
}

impl ChannelPreviewSource {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn preview_url(&self, channel: &str) -> String {
        format!("{}/s/{}", self.base_url, channel)
    }
}

#[async_trait]
impl LinkSource for ChannelPreviewSource {
    async fn fetch_links(&self, request: &FetchRequest) -> Result<Vec<String>, FetchError> {
        let url = self.preview_url(&request.target.username);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_request_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(&url, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(&url, e))?;

        let mut links = parse_channel_preview(&body).ok_or_else(|| {
            FetchError::new(
                FetchErrorKind::NotFound,
                format!("{} has no public channel preview", request.target.url),
            )
        })?;
        links.truncate(request.max_items);

        Ok(links)
    }

    fn name(&self) -> &str {
        "telegram-preview"
    }
}

/// Extracts post links from a channel preview page, newest first
///
/// # Returns
///
/// * `Some(links)` - The page is a channel preview (possibly with no posts)
/// * `None` - The page is not a channel preview, so the channel does not exist or is private
pub fn parse_channel_preview(html: &str) -> Option<Vec<String>> {
    let document = Html::parse_document(html);

    let channel_info = Selector::parse(".tgme_channel_info").ok()?;
    let message = Selector::parse(".tgme_widget_message[data-post]").ok()?;

    let mut posts: Vec<String> = document
        .select(&message)
        .filter_map(|element| element.value().attr("data-post"))
        .map(|post| format!("https://t.me/{}", post.trim_matches('/')))
        .collect();

    if posts.is_empty() && document.select(&channel_info).next().is_none() {
        return None;
    }

    // The preview lists posts oldest first
    posts.reverse();
    Some(posts)
}

fn classify_status(url: &str, status: StatusCode) -> FetchError {
    let kind = match status {
        StatusCode::NOT_FOUND => FetchErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => FetchErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchErrorKind::AuthRejected,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => FetchErrorKind::Timeout,
        _ => FetchErrorKind::Unknown,
    };
    FetchError::new(kind, format!("HTTP {} from {}", status.as_u16(), url))
}

fn classify_request_error(url: &str, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::new(FetchErrorKind::Timeout, format!("request to {} timed out", url))
    } else {
        FetchError::new(FetchErrorKind::Unknown, format!("request to {} failed: {}", url, error))
    }
}
