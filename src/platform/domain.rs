use crate::platform::Platform;
use url::Url;

/// Host suffixes recognised for each platform
const PLATFORM_HOSTS: &[(&str, Platform)] = &[
    ("instagram.com", Platform::Instagram),
    ("tiktok.com", Platform::TikTok),
    ("x.com", Platform::X),
    ("twitter.com", Platform::X),
    ("facebook.com", Platform::Facebook),
    ("fb.com", Platform::Facebook),
    ("youtube.com", Platform::YouTube),
    ("youtu.be", Platform::YouTube),
    ("t.me", Platform::Telegram),
    ("telegram.me", Platform::Telegram),
];

/// Identifies the platform a URL belongs to
///
/// Matching is done on the host, so a host equal to a known platform domain or any
/// subdomain of it (`www.`, `m.`, `mobile.` ...) is recognised.
///
/// # Arguments
///
/// * `url` - The URL string to classify
///
/// # Returns
///
/// * `Some(Platform)` - The platform serving this URL
/// * `None` - The URL is malformed or belongs to an unsupported site
///
/// # Examples
///
/// ```
/// use linkscout::platform::{identify_platform, Platform};
///
/// assert_eq!(identify_platform("https://www.instagram.com/someone"), Some(Platform::Instagram));
/// assert_eq!(identify_platform("https://twitter.com/someone"), Some(Platform::X));
/// assert_eq!(identify_platform("https://example.com/"), None);
/// ```
pub fn identify_platform(url: &str) -> Option<Platform> {
    let url = Url::parse(url).ok()?;
    platform_for_host(url.host_str()?)
}

/// Maps a host name to its platform
pub(crate) fn platform_for_host(host: &str) -> Option<Platform> {
    let host = host.to_lowercase();

    PLATFORM_HOSTS
        .iter()
        .find(|(domain, _)| {
            host == *domain
                || host
                    .strip_suffix(domain)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
        .map(|(_, platform)| *platform)
}
