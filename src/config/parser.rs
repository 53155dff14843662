use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

/// Loads and parses a configuration file from the given path
///
/// Environment overrides (`ROAMER_*`) are applied after parsing and before
/// validation, so an override can never smuggle in an invalid value.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config = parse_config(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Parses TOML content into a configuration without validating it
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Applies `ROAMER_*` environment overrides to a parsed configuration
///
/// | Variable | Key |
/// |----------|-----|
/// | `ROAMER_MAX_MEMORY_MB` | `resources.memory-ceiling-mb` |
/// | `ROAMER_MAX_CPU_PERCENT` | `resources.cpu-ceiling-percent` |
/// | `ROAMER_INITIAL_CONCURRENCY` | `concurrency.initial` |
/// | `ROAMER_MAX_CONCURRENCY` | `concurrency.max` |
/// | `ROAMER_DATABASE_PATH` | `storage.database-path` |
///
/// The lookup is injected so tests do not have to touch the process environment.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env_value(&lookup, "ROAMER_MAX_MEMORY_MB")? {
        config.resources.memory_ceiling_mb = value;
    }
    if let Some(value) = env_value(&lookup, "ROAMER_MAX_CPU_PERCENT")? {
        config.resources.cpu_ceiling_percent = value;
    }
    if let Some(value) = env_value(&lookup, "ROAMER_INITIAL_CONCURRENCY")? {
        config.concurrency.initial = value;
    }
    if let Some(value) = env_value(&lookup, "ROAMER_MAX_CONCURRENCY")? {
        config.concurrency.max = value;
    }
    if let Some(path) = lookup("ROAMER_DATABASE_PATH") {
        config.storage.database_path = path;
    }
    Ok(())
}

fn env_value<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                name: name.to_string(),
                value: raw,
            }),
        None => Ok(None),
    }
}

/// Computes a SHA-256 hash of the configuration file content
///
/// This is stored with each run so a resumed crawl can tell whether the
/// configuration changed in between.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL: &str = r#"
[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[storage]
database-path = "./test.db"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.crawler.max_depth, 5);
        assert_eq!(config.crawler.dedup_capacity, 10_000);
        assert_eq!(config.concurrency.initial, 10);
        assert_eq!(config.concurrency.min, 5);
        assert_eq!(config.concurrency.max, 20);
        assert_eq!(config.resources.memory_ceiling_mb, 450.0);
        assert_eq!(config.robots.ttl_secs, 3600);
        assert!(config.scope.seeds.is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
[crawler]
max-depth = 2
max-pages-per-host = 50
max-attempts = 4
request-timeout-ms = 5000

[politeness]
default-delay-ms = 250
backoff-multiplier = 3.0

[resources]
memory-ceiling-mb = 256
high-watermark = 90
low-watermark = 60

[concurrency]
initial = 4
min = 2
max = 8

[user-agent]
crawler-name = "TestCrawler"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[storage]
database-path = "./test.db"

[scope]
seeds = ["https://example.com/"]
allowed-domains = ["*.example.com"]
"#;
        let file = create_temp_config(content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.max_depth, 2);
        assert_eq!(config.crawler.max_attempts, 4);
        assert_eq!(config.politeness.default_delay_ms, 250);
        assert_eq!(config.politeness.backoff_multiplier, 3.0);
        assert_eq!(config.resources.memory_ceiling_mb, 256.0);
        assert_eq!(config.concurrency.max, 8);
        assert_eq!(config.scope.allowed_domains, vec!["*.example.com"]);
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/roamer.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = format!("{}\n[concurrency]\ninitial = 50\nmin = 5\nmax = 20\n", MINIMAL);
        let file = create_temp_config(&content);
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_env_overrides_applied() {
        let mut config = parse_config(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("ROAMER_MAX_MEMORY_MB", "300"),
            ("ROAMER_MAX_CPU_PERCENT", "45.5"),
            ("ROAMER_INITIAL_CONCURRENCY", "6"),
            ("ROAMER_MAX_CONCURRENCY", "12"),
            ("ROAMER_DATABASE_PATH", "/data/roamer.db"),
        ]);

        apply_env_overrides(&mut config, |name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.resources.memory_ceiling_mb, 300.0);
        assert_eq!(config.resources.cpu_ceiling_percent, 45.5);
        assert_eq!(config.concurrency.initial, 6);
        assert_eq!(config.concurrency.max, 12);
        assert_eq!(config.storage.database_path, "/data/roamer.db");
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = parse_config(MINIMAL).unwrap();
        let result = apply_env_overrides(&mut config, |name| {
            (name == "ROAMER_MAX_CONCURRENCY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        let hash1 = compute_config_hash(file1.path()).unwrap();
        let hash2 = compute_config_hash(file2.path()).unwrap();

        assert_ne!(hash1, hash2);
    }
}
