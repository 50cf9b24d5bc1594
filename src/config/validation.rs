use crate::config::types::{
    Config, CredentialsConfig, FetchConfig, PlatformConfig, SchedulerConfig, StorageConfig,
    WorkerConfig,
};
use crate::platform::Platform;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_fetch_config(&config.fetch)?;
    validate_worker_config(&config.worker)?;
    validate_scheduler_config(&config.scheduler)?;
    validate_storage_config(&config.storage)?;
    validate_credentials_config(&config.credentials)?;
    for (name, platform_config) in &config.platforms {
        validate_platform_config(name, platform_config)?;
    }
    Ok(())
}

fn validate_fetch_config(config: &FetchConfig) -> Result<(), ConfigError> {
    if !(5..=3600).contains(&config.timeout_secs) {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be between 5 and 3600, got {}",
            config.timeout_secs
        )));
    }

    validate_max_items("default-max-items", config.default_max_items)?;

    if let Some(proxy) = &config.proxy {
        validate_http_url("proxy", proxy)?;
    }

    Ok(())
}

fn validate_worker_config(config: &WorkerConfig) -> Result<(), ConfigError> {
    if !(1..=16).contains(&config.concurrency) {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 16, got {}",
            config.concurrency
        )));
    }

    if !(1..=10_000).contains(&config.queue_capacity) {
        return Err(ConfigError::Validation(format!(
            "queue-capacity must be between 1 and 10000, got {}",
            config.queue_capacity
        )));
    }

    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    if config.tick_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "tick-interval-secs must be >= 1".to_string(),
        ));
    }

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    if config.credentials_dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "credentials-dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_credentials_config(config: &CredentialsConfig) -> Result<(), ConfigError> {
    if !(1..=10).contains(&config.burn_threshold) {
        return Err(ConfigError::Validation(format!(
            "burn-threshold must be between 1 and 10, got {}",
            config.burn_threshold
        )));
    }
    Ok(())
}

/// Validates the overrides of one `[platforms.<name>]` table
fn validate_platform_config(name: &str, config: &PlatformConfig) -> Result<(), ConfigError> {
    let platform: Platform = name
        .parse()
        .map_err(|e: String| ConfigError::Validation(format!("[platforms.{}]: {}", name, e)))?;

    // Keys must use the canonical name so lookups by platform find them
    if platform.as_str() != name {
        return Err(ConfigError::Validation(format!(
            "[platforms.{}] must be written as [platforms.{}]",
            name,
            platform.as_str()
        )));
    }

    if let Some(max_items) = config.max_items {
        validate_max_items(&format!("[platforms.{}] max-items", name), max_items)?;
    }

    if let Some(command) = &config.command {
        if platform == Platform::Telegram {
            return Err(ConfigError::Validation(
                "[platforms.telegram] reads the public channel preview; set base-url instead of command"
                    .to_string(),
            ));
        }
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "[platforms.{}] command cannot be empty",
                name
            )));
        }
    }

    if config.content_type.is_some() && platform != Platform::YouTube {
        return Err(ConfigError::Validation(format!(
            "[platforms.{}] content-type only applies to youtube",
            name
        )));
    }

    if let Some(base_url) = &config.base_url {
        if platform != Platform::Telegram {
            return Err(ConfigError::Validation(format!(
                "[platforms.{}] base-url only applies to telegram",
                name
            )));
        }
        validate_http_url("base-url", base_url)?;
    }

    if config.exclusive_credentials.is_some() && !platform.requires_credential() {
        return Err(ConfigError::Validation(format!(
            "[platforms.{}] does not use credentials; remove exclusive-credentials",
            name
        )));
    }

    Ok(())
}

fn validate_max_items(field: &str, value: usize) -> Result<(), ConfigError> {
    if !(1..=200).contains(&value) {
        return Err(ConfigError::Validation(format!(
            "{} must be between 1 and 200, got {}",
            field, value
        )));
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid {} '{}': {}", field, value, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "Invalid {} '{}': expected an http(s) URL with a host",
            field, value
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::with_storage("./linkscout.db", "./cookies")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_worker_ranges() {
        let mut config = base_config();
        config.worker.concurrency = 17;
        assert!(validate(&config).is_err());

        config.worker.concurrency = 16;
        assert!(validate(&config).is_ok());

        config.worker.queue_capacity = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_timeout_range() {
        let mut config = base_config();
        config.fetch.timeout_secs = 4;
        assert!(validate(&config).is_err());

        config.fetch.timeout_secs = 3601;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_burn_threshold_range() {
        let mut config = base_config();
        config.credentials.burn_threshold = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_paths_rejected() {
        let mut config = base_config();
        config.storage.credentials_dir = "  ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_malformed_proxy_rejected() {
        let mut config = base_config();
        config.fetch.proxy = Some("not a url".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.fetch.proxy = Some("ftp://proxy.local".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.fetch.proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_unknown_platform_table() {
        let mut config = base_config();
        config
            .platforms
            .insert("myspace".to_string(), PlatformConfig::default());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_alias_platform_table_rejected() {
        let mut config = base_config();
        config
            .platforms
            .insert("twitter".to_string(), PlatformConfig::default());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = base_config();
        config.platforms.insert(
            "instagram".to_string(),
            PlatformConfig {
                command: Some(vec![]),
                ..Default::default()
            },
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_content_type_only_for_youtube() {
        let mut config = base_config();
        config.platforms.insert(
            "tiktok".to_string(),
            PlatformConfig {
                content_type: Some(crate::platform::ContentKind::Videos),
                ..Default::default()
            },
        );
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_telegram_base_url() {
        let mut config = base_config();
        config.platforms.insert(
            "telegram".to_string(),
            PlatformConfig {
                base_url: Some("http://127.0.0.1:9000".to_string()),
                ..Default::default()
            },
        );
        assert!(validate(&config).is_ok());

        config.platforms.insert(
            "telegram".to_string(),
            PlatformConfig {
                command: Some(vec!["telethon-helper".to_string()]),
                ..Default::default()
            },
        );
        assert!(validate(&config).is_err());
    }
}
