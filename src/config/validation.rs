use crate::config::types::{
    ConcurrencyConfig, Config, CrawlerConfig, PolitenessConfig, ResourceConfig, RobotsConfig,
    ScopeConfig, StorageConfig, UserAgentConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_politeness_config(&config.politeness)?;
    validate_robots_config(&config.robots)?;
    validate_resource_config(&config.resources)?;
    validate_concurrency_config(&config.concurrency)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_storage_config(&config.storage)?;
    validate_scope_config(&config.scope)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    // max_depth >= 0 is always true for u32, so no check needed

    if config.max_pages_per_host < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages_per_host must be >= 1, got {}",
            config.max_pages_per_host
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.request_timeout_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "request_timeout_ms must be >= 100ms, got {}ms",
            config.request_timeout_ms
        )));
    }

    if config.max_content_length == 0 {
        return Err(ConfigError::Validation(
            "max_content_length must be > 0".to_string(),
        ));
    }

    if config.dedup_capacity == 0 {
        return Err(ConfigError::Validation(
            "dedup_capacity must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates politeness configuration
fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.backoff_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "backoff_multiplier must be >= 1.0, got {}",
            config.backoff_multiplier
        )));
    }

    if config.rate_limit_multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "rate_limit_multiplier must be >= 1.0, got {}",
            config.rate_limit_multiplier
        )));
    }

    if config.max_backoff_ms < config.default_delay_ms {
        return Err(ConfigError::Validation(format!(
            "max_backoff_ms ({}) must be >= default_delay_ms ({})",
            config.max_backoff_ms, config.default_delay_ms
        )));
    }

    if config.dormant_threshold < 1 {
        return Err(ConfigError::Validation(
            "dormant_threshold must be >= 1".to_string(),
        ));
    }

    if config.host_table_capacity == 0 {
        return Err(ConfigError::Validation(
            "host_table_capacity must be > 0".to_string(),
        ));
    }

    Ok(())
}

/// Validates robots configuration
fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "robots timeout_ms must be > 0".to_string(),
        ));
    }

    if config.grace_period_secs > config.ttl_secs {
        return Err(ConfigError::Validation(format!(
            "robots grace_period_secs ({}) must not exceed ttl_secs ({})",
            config.grace_period_secs, config.ttl_secs
        )));
    }

    Ok(())
}

/// Validates the resource envelope
fn validate_resource_config(config: &ResourceConfig) -> Result<(), ConfigError> {
    if config.memory_ceiling_mb <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "memory_ceiling_mb must be > 0, got {}",
            config.memory_ceiling_mb
        )));
    }

    if config.cpu_ceiling_percent <= 0.0 {
        return Err(ConfigError::Validation(format!(
            "cpu_ceiling_percent must be > 0, got {}",
            config.cpu_ceiling_percent
        )));
    }

    for (name, value) in [
        ("high_watermark", config.high_watermark),
        ("low_watermark", config.low_watermark),
    ] {
        if value <= 0.0 || value > 100.0 {
            return Err(ConfigError::Validation(format!(
                "{} must be in (0, 100], got {}",
                name, value
            )));
        }
    }

    if config.low_watermark >= config.high_watermark {
        return Err(ConfigError::Validation(format!(
            "low_watermark ({}) must be below high_watermark ({})",
            config.low_watermark, config.high_watermark
        )));
    }

    if config.sample_interval_ms < 100 {
        return Err(ConfigError::Validation(format!(
            "sample_interval_ms must be >= 100ms, got {}ms",
            config.sample_interval_ms
        )));
    }

    Ok(())
}

/// Validates concurrency bounds: 1 <= min <= initial <= max
fn validate_concurrency_config(config: &ConcurrencyConfig) -> Result<(), ConfigError> {
    if config.min < 1 {
        return Err(ConfigError::Validation(format!(
            "concurrency min must be >= 1, got {}",
            config.min
        )));
    }

    if config.min > config.max {
        return Err(ConfigError::Validation(format!(
            "concurrency min ({}) must be <= max ({})",
            config.min, config.max
        )));
    }

    if config.initial < config.min || config.initial > config.max {
        return Err(ConfigError::Validation(format!(
            "concurrency initial must be between {} and {}, got {}",
            config.min, config.max, config.initial
        )));
    }

    if config.storm_host_threshold < 1 {
        return Err(ConfigError::Validation(
            "storm_host_threshold must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates seeds and allowed domain patterns
fn validate_scope_config(config: &ScopeConfig) -> Result<(), ConfigError> {
    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        validate_domain_string(domain)?;
    } else {
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("localhost").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern(".example.com").is_err());
        assert!(validate_domain_pattern("example.com.").is_err());
        assert!(validate_domain_pattern("exa mple.com").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("admin@sub.example.com").is_ok());

        assert!(validate_email("").is_err());
        assert!(validate_email("invalid").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("user@").is_err());
        assert!(validate_email("user@domain").is_err());
        assert!(validate_email("a@b@c.com").is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let ok = ConcurrencyConfig::default();
        assert!(validate_concurrency_config(&ok).is_ok());

        let above = ConcurrencyConfig {
            initial: 30,
            ..ConcurrencyConfig::default()
        };
        assert!(validate_concurrency_config(&above).is_err());

        let zero_floor = ConcurrencyConfig {
            initial: 1,
            min: 0,
            max: 4,
            storm_host_threshold: 3,
        };
        assert!(validate_concurrency_config(&zero_floor).is_err());

        let inverted = ConcurrencyConfig {
            initial: 5,
            min: 8,
            max: 4,
            storm_host_threshold: 3,
        };
        assert!(validate_concurrency_config(&inverted).is_err());
    }

    #[test]
    fn test_watermarks_must_be_ordered() {
        let inverted = ResourceConfig {
            high_watermark: 60.0,
            low_watermark: 70.0,
            ..ResourceConfig::default()
        };
        assert!(validate_resource_config(&inverted).is_err());

        let out_of_range = ResourceConfig {
            high_watermark: 120.0,
            ..ResourceConfig::default()
        };
        assert!(validate_resource_config(&out_of_range).is_err());

        assert!(validate_resource_config(&ResourceConfig::default()).is_ok());
    }

    #[test]
    fn test_multipliers_below_one_rejected() {
        let shrinking = PolitenessConfig {
            backoff_multiplier: 0.5,
            ..PolitenessConfig::default()
        };
        assert!(validate_politeness_config(&shrinking).is_err());
    }

    #[test]
    fn test_seed_scheme_checked() {
        let scope = ScopeConfig {
            seeds: vec!["ftp://example.com/".to_string()],
            allowed_domains: Vec::new(),
        };
        assert!(validate_scope_config(&scope).is_err());

        let scope = ScopeConfig {
            seeds: vec!["http://example.com/".to_string()],
            allowed_domains: vec!["*.example.com".to_string()],
        };
        assert!(validate_scope_config(&scope).is_ok());
    }
}
