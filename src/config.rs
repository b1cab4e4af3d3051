//! Configuration loader: merges env vars, .env file, and config.toml.

use common::config::StripConfig;
use common::Error;
use std::path::Path;

fn parse_positive_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    let parsed = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer > 0")))?;
    if parsed == 0 {
        return Err(Error::Config(format!("{env_name} must be an integer > 0")));
    }
    Ok(parsed)
}

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

pub(crate) fn validate_config(config: &StripConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    let base_url = config.upstream.base_url.trim();
    if base_url.is_empty() {
        issues.push("upstream.base_url must not be empty".into());
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        issues.push("upstream.base_url must start with http:// or https://".into());
    }
    if config.upstream.requests_per_sec == 0 {
        issues.push("upstream.requests_per_sec must be > 0".into());
    }
    if config.upstream.request_timeout_ms == 0 {
        issues.push("upstream.request_timeout_ms must be > 0".into());
    }

    if config.prefetch.window_size == 0 {
        issues.push("prefetch.window_size must be > 0".into());
    }
    if config.prefetch.concurrency == 0 {
        issues.push("prefetch.concurrency must be > 0".into());
    }
    if config.prefetch.fetch_timeout_ms == 0 {
        issues.push("prefetch.fetch_timeout_ms must be > 0".into());
    }
    if config.prefetch.fetch_timeout_ms > config.upstream.request_timeout_ms {
        issues.push("prefetch.fetch_timeout_ms must be <= upstream.request_timeout_ms".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Load configuration from environment and optional config file.
pub fn load_config() -> Result<StripConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults.
    let mut config = StripConfig::default();

    // 3. Try loading config.toml if it exists.
    let config_path = Path::new("config.toml");
    if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| Error::Config(format!("Failed to read config.toml: {}", e)))?;
        config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config.toml: {}", e)))?;
    }

    // 4. Override with environment variables (highest priority).
    if let Ok(url) = std::env::var("FARE_UPSTREAM_URL") {
        config.upstream.base_url = url.trim().to_string();
    }
    if let Ok(raw) = std::env::var("FARE_REQUESTS_PER_SEC") {
        let parsed = parse_positive_u64(&raw, "FARE_REQUESTS_PER_SEC")?;
        config.upstream.requests_per_sec = u32::try_from(parsed)
            .map_err(|_| Error::Config("FARE_REQUESTS_PER_SEC is too large".into()))?;
    }
    if let Ok(raw) = std::env::var("FARE_WINDOW_SIZE") {
        config.prefetch.window_size = parse_positive_u64(&raw, "FARE_WINDOW_SIZE")? as usize;
    }
    if let Ok(raw) = std::env::var("FARE_PREFETCH_CONCURRENCY") {
        config.prefetch.concurrency = parse_positive_u64(&raw, "FARE_PREFETCH_CONCURRENCY")? as usize;
    }
    if let Ok(raw) = std::env::var("FARE_PREFETCH_PACING_MS") {
        config.prefetch.pacing_ms = parse_non_negative_u64(&raw, "FARE_PREFETCH_PACING_MS")?;
    }
    if let Ok(raw) = std::env::var("FARE_FETCH_TIMEOUT_MS") {
        config.prefetch.fetch_timeout_ms = parse_positive_u64(&raw, "FARE_FETCH_TIMEOUT_MS")?;
    }
    if let Ok(raw) = std::env::var("FARE_RESPONSE_CACHE_TTL_SECS") {
        config.response_cache.ttl_secs =
            parse_non_negative_u64(&raw, "FARE_RESPONSE_CACHE_TTL_SECS")?;
    }

    // 5. Validate.
    validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&StripConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_reports_every_issue() {
        let mut config = StripConfig::default();
        config.upstream.base_url = "ftp://fares".into();
        config.prefetch.concurrency = 0;
        config.prefetch.window_size = 0;

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("base_url"));
        assert!(message.contains("concurrency"));
        assert!(message.contains("window_size"));
    }

    #[test]
    fn test_toml_overrides_sections() {
        let config: StripConfig = toml::from_str(
            r#"
            [upstream]
            base_url = "https://fares.example.com/api"

            [prefetch]
            pacing_ms = 250
            "#,
        )
        .expect("config should parse");

        assert_eq!(config.upstream.base_url, "https://fares.example.com/api");
        assert_eq!(config.prefetch.pacing_ms, 250);
        assert_eq!(config.prefetch.concurrency, 2);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_env_number_parsing() {
        assert_eq!(parse_positive_u64(" 3 ", "X").expect("valid"), 3);
        assert!(parse_positive_u64("0", "X").is_err());
        assert!(parse_non_negative_u64("-1", "X").is_err());
        assert_eq!(parse_non_negative_u64("0", "X").expect("valid"), 0);
    }
}
