use crate::platform::domain::platform_for_host;
use crate::platform::{AccountTarget, Platform};
use crate::ValidationError;
use url::Url;

/// YouTube path prefixes that are followed by the channel name
const YOUTUBE_CHANNEL_PREFIXES: &[&str] = &["channel", "c", "user"];

/// Resolves a free-form account identifier to a canonical account
///
/// # Accepted Forms
///
/// 1. A full URL: `https://www.instagram.com/someone/?hl=en`
/// 2. A URL without scheme: `tiktok.com/@someone`
/// 3. A bare username or `@handle`: treated as an Instagram account
///
/// The canonical URL drops query strings, fragments and trailing path segments so
/// that the same account always resolves to the same URL.
///
/// # Arguments
///
/// * `identifier` - The identifier supplied by the user
///
/// # Returns
///
/// * `Ok(AccountTarget)` - The platform, username and canonical account URL
/// * `Err(ValidationError)` - The identifier is empty, malformed, or unsupported
///
/// # Examples
///
/// ```
/// use linkscout::platform::{resolve_account, Platform};
///
/// let target = resolve_account("twitter.com/someone/media").unwrap();
/// assert_eq!(target.platform, Platform::X);
/// assert_eq!(target.url, "https://x.com/someone");
/// ```
pub fn resolve_account(identifier: &str) -> Result<AccountTarget, ValidationError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(ValidationError::EmptyIdentifier);
    }

    let candidate = if identifier.starts_with("http://") || identifier.starts_with("https://") {
        identifier.to_string()
    } else if looks_like_host_path(identifier) {
        format!("https://{}", identifier)
    } else {
        let username = identifier.trim_start_matches('@');
        validate_username(identifier, username)?;
        format!("https://www.instagram.com/{}", username)
    };

    let url = Url::parse(&candidate)
        .map_err(|_| ValidationError::Malformed(identifier.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| ValidationError::Malformed(identifier.to_string()))?;
    let platform = platform_for_host(host)
        .ok_or_else(|| ValidationError::UnsupportedPlatform(identifier.to_string()))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let (username, url) = match platform {
        Platform::Instagram => {
            let username = first_segment(identifier, &segments)?;
            (username.to_string(), format!("https://www.instagram.com/{}", username))
        }
        Platform::TikTok => {
            let username = first_segment(identifier, &segments)?.trim_start_matches('@');
            validate_username(identifier, username)?;
            (username.to_string(), format!("https://www.tiktok.com/@{}", username))
        }
        Platform::X => {
            let username = first_segment(identifier, &segments)?;
            (username.to_string(), format!("https://x.com/{}", username))
        }
        Platform::Facebook => {
            let username = first_segment(identifier, &segments)?;
            (username.to_string(), format!("https://www.facebook.com/{}", username))
        }
        Platform::YouTube => resolve_youtube(identifier, host, &segments)?,
        Platform::Telegram => {
            // Preview links look like t.me/s/<channel>
            let channel = match segments.as_slice() {
                ["s", channel, ..] => *channel,
                _ => first_segment(identifier, &segments)?,
            };
            let channel = channel.trim_start_matches('@');
            validate_username(identifier, channel)?;
            (channel.to_string(), format!("https://t.me/{}", channel))
        }
    };

    Ok(AccountTarget {
        platform,
        username,
        url,
    })
}

/// Returns true if the identifier starts with a host name rather than a username
fn looks_like_host_path(identifier: &str) -> bool {
    let host = identifier.split('/').next().unwrap_or_default();
    platform_for_host(host).is_some() || (identifier.contains('/') && host.contains('.'))
}

fn first_segment<'a>(identifier: &str, segments: &[&'a str]) -> Result<&'a str, ValidationError> {
    let segment = segments
        .first()
        .copied()
        .ok_or_else(|| ValidationError::Malformed(identifier.to_string()))?;
    validate_username(identifier, segment.trim_start_matches('@'))?;
    Ok(segment)
}

fn validate_username(identifier: &str, username: &str) -> Result<(), ValidationError> {
    let valid = !username.is_empty()
        && username
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(ValidationError::Malformed(identifier.to_string()))
    }
}

fn resolve_youtube(
    identifier: &str,
    host: &str,
    segments: &[&str],
) -> Result<(String, String), ValidationError> {
    // youtu.be links point at single videos, not channels
    if host.ends_with("youtu.be") {
        return Err(ValidationError::Malformed(identifier.to_string()));
    }

    match segments {
        [prefix, name, ..] if YOUTUBE_CHANNEL_PREFIXES.contains(prefix) => {
            validate_username(identifier, name)?;
            Ok((
                name.to_string(),
                format!("https://www.youtube.com/{}/{}", prefix, name),
            ))
        }
        [handle, ..] if handle.starts_with('@') => {
            validate_username(identifier, handle.trim_start_matches('@'))?;
            Ok((
                handle.to_string(),
                format!("https://www.youtube.com/{}", handle),
            ))
        }
        [name, ..] if !YOUTUBE_CHANNEL_PREFIXES.contains(name) && *name != "watch" => {
            validate_username(identifier, name)?;
            Ok((name.to_string(), format!("https://www.youtube.com/c/{}", name)))
        }
        _ => Err(ValidationError::Malformed(identifier.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_instagram_url() {
        let target = resolve_account("https://www.instagram.com/someone/?hl=en").unwrap();
        assert_eq!(target.platform, Platform::Instagram);
        assert_eq!(target.username, "someone");
        assert_eq!(target.url, "https://www.instagram.com/someone");
    }

    #[test]
    fn test_bare_username_defaults_to_instagram() {
        let target = resolve_account("some.one_99").unwrap();
        assert_eq!(target.platform, Platform::Instagram);
        assert_eq!(target.url, "https://www.instagram.com/some.one_99");

        let target = resolve_account("@someone").unwrap();
        assert_eq!(target.username, "someone");
    }

    #[test]
    fn test_scheme_less_domain() {
        let target = resolve_account("tiktok.com/@dancer").unwrap();
        assert_eq!(target.platform, Platform::TikTok);
        assert_eq!(target.username, "dancer");
        assert_eq!(target.url, "https://www.tiktok.com/@dancer");
    }

    #[test]
    fn test_twitter_canonicalised_to_x() {
        let target = resolve_account("https://twitter.com/someone/status/123").unwrap();
        assert_eq!(target.platform, Platform::X);
        assert_eq!(target.url, "https://x.com/someone");
    }

    #[test]
    fn test_facebook_page() {
        let target = resolve_account("https://m.facebook.com/somepage/videos").unwrap();
        assert_eq!(target.platform, Platform::Facebook);
        assert_eq!(target.url, "https://www.facebook.com/somepage");
    }

    #[test]
    fn test_youtube_forms() {
        let handle = resolve_account("https://www.youtube.com/@chan/shorts").unwrap();
        assert_eq!(handle.username, "@chan");
        assert_eq!(handle.url, "https://www.youtube.com/@chan");

        let channel = resolve_account("youtube.com/channel/UC123abc").unwrap();
        assert_eq!(channel.username, "UC123abc");
        assert_eq!(channel.url, "https://www.youtube.com/channel/UC123abc");

        let custom = resolve_account("https://www.youtube.com/somename").unwrap();
        assert_eq!(custom.url, "https://www.youtube.com/c/somename");
    }

    #[test]
    fn test_youtube_video_link_rejected() {
        assert!(matches!(
            resolve_account("https://youtu.be/dQw4w9WgXcQ"),
            Err(ValidationError::Malformed(_))
        ));
        assert!(matches!(
            resolve_account("https://www.youtube.com/watch?v=abc"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_telegram_forms() {
        let plain = resolve_account("t.me/somechannel").unwrap();
        assert_eq!(plain.platform, Platform::Telegram);
        assert_eq!(plain.url, "https://t.me/somechannel");

        let preview = resolve_account("https://t.me/s/somechannel").unwrap();
        assert_eq!(preview.username, "somechannel");
    }

    #[test]
    fn test_empty_identifier() {
        assert_eq!(resolve_account("   "), Err(ValidationError::EmptyIdentifier));
    }

    #[test]
    fn test_unsupported_platform() {
        assert!(matches!(
            resolve_account("https://example.com/someone"),
            Err(ValidationError::UnsupportedPlatform(_))
        ));
        assert!(matches!(
            resolve_account("example.org/someone"),
            Err(ValidationError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn test_missing_username() {
        assert!(matches!(
            resolve_account("https://www.instagram.com/"),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_invalid_username_characters() {
        assert!(matches!(
            resolve_account("some one"),
            Err(ValidationError::Malformed(_))
        ));
    }
}
