use crate::config::types::{Config, CrawlerConfig, ProxyConfig, RetryConfig, SessionConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_site(config)?;
    validate_crawler(&config.crawler)?;
    validate_retry(&config.retry)?;
    validate_session(&config.session)?;
    validate_proxy(&config.proxy)?;
    validate_output(config)?;
    Ok(())
}

fn validate_site(config: &Config) -> Result<(), ConfigError> {
    let base = Url::parse(&config.site.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if base.scheme() != "https" {
        return Err(ConfigError::Validation(format!(
            "base-url must use HTTPS scheme, got '{}'",
            config.site.base_url
        )));
    }

    for seed in &config.site.seed_categories {
        Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }

    Ok(())
}

fn validate_crawler(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.batch_size < 1 || config.batch_size > 100 {
        return Err(ConfigError::Validation(format!(
            "batch-size must be between 1 and 100, got {}",
            config.batch_size
        )));
    }

    if config.detail_batch_size < 1 || config.detail_batch_size > 100 {
        return Err(ConfigError::Validation(format!(
            "detail-batch-size must be between 1 and 100, got {}",
            config.detail_batch_size
        )));
    }

    if config.lease_timeout_secs < 30 {
        return Err(ConfigError::Validation(format!(
            "lease-timeout-secs must be >= 30, got {}",
            config.lease_timeout_secs
        )));
    }

    if !(0.0..=1.0).contains(&config.error_threshold) {
        return Err(ConfigError::Validation(format!(
            "error-threshold must be within [0, 1], got {}",
            config.error_threshold
        )));
    }

    Ok(())
}

fn validate_retry(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "retry max-attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.backoff < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry backoff must be >= 1.0, got {}",
            config.backoff
        )));
    }

    Ok(())
}

fn validate_session(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout-secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    let (lo, hi) = config.human_delay_ms;
    if lo > hi {
        return Err(ConfigError::Validation(format!(
            "human-delay-ms lower bound {} exceeds upper bound {}",
            lo, hi
        )));
    }

    Ok(())
}

fn validate_proxy(config: &ProxyConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.min_success_rate) {
        return Err(ConfigError::Validation(format!(
            "min-success-rate must be within [0, 1], got {}",
            config.min_success_rate
        )));
    }

    Url::parse(&config.validation_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid validation-url: {}", e)))?;

    for source in &config.free_sources {
        Url::parse(source)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid free source '{}': {}", source, e)))?;
    }

    Ok(())
}

fn validate_output(config: &Config) -> Result<(), ConfigError> {
    if config.output.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{OutputConfig, SiteConfig};

    fn base_config() -> Config {
        Config {
            site: SiteConfig {
                base_url: "https://groceries.example.com".to_string(),
                seed_categories: vec![],
                consent_path: None,
            },
            crawler: CrawlerConfig::default(),
            rate_limit: Default::default(),
            circuit_breaker: Default::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            proxy: ProxyConfig::default(),
            output: OutputConfig {
                database_path: "./trolley.db".to_string(),
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn test_http_base_url_rejected() {
        let mut config = base_config();
        config.site.base_url = "http://groceries.example.com".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = base_config();
        config.crawler.max_attempts = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_short_lease_rejected() {
        let mut config = base_config();
        config.crawler.lease_timeout_secs = 5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_backoff_below_one_rejected() {
        let mut config = base_config();
        config.retry.backoff = 0.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_inverted_human_delay_rejected() {
        let mut config = base_config();
        config.session.human_delay_ms = (2000, 500);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_free_source_rejected() {
        let mut config = base_config();
        config.proxy.free_sources = vec!["not a url".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_database_path_rejected() {
        let mut config = base_config();
        config.output.database_path = String::new();
        assert!(validate(&config).is_err());
    }
}
