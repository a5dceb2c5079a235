use anyhow::{Context, Result};
use dotenvy::dotenv;
use provider_gateway::{CacheCategory, CacheTtlTable};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::kernel::jobs::QueueFallback;

pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.dataforseo.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_OPENROUTER_MODEL: &str = "anthropic/claude-3.5-sonnet";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Public base URL of this service; when set, jobs are dispatched over
    /// HTTP to `{public_base_url}/internal/jobs/run`.
    pub public_base_url: Option<String>,
    /// Postgres job store when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub provider_base_url: String,
    pub provider_login: String,
    pub provider_password: String,
    /// JSON operation table replacing the built-in one.
    pub provider_operations_file: Option<String>,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    pub cache_ttl_keyword_metadata: Option<Duration>,
    pub cache_ttl_serp: Option<Duration>,
    pub cache_ttl_research: Option<Duration>,
    pub cache_ttl_generic: Option<Duration>,
    pub job_timeout: Duration,
    pub queue_fallback: QueueFallback,
    pub queue_max_retry_window: Duration,
    pub job_retention: Duration,
    pub terminal_webhook_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| var(key).with_context(|| format!("{key} must be set"));

        Ok(Self {
            port: parse_or(&var, "PORT", 8080)?,
            public_base_url: var("PUBLIC_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            database_url: var("DATABASE_URL"),
            provider_base_url: var("PROVIDER_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string()),
            provider_login: required("PROVIDER_LOGIN")?,
            provider_password: required("PROVIDER_PASSWORD")?,
            provider_operations_file: var("PROVIDER_OPERATIONS_FILE"),
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: var("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            openrouter_api_key: var("OPENROUTER_API_KEY"),
            openrouter_model: var("OPENROUTER_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENROUTER_MODEL.to_string()),
            cache_ttl_keyword_metadata: secs(&var, "CACHE_TTL_KEYWORD_METADATA_SECS")?,
            cache_ttl_serp: secs(&var, "CACHE_TTL_SERP_SECS")?,
            cache_ttl_research: secs(&var, "CACHE_TTL_RESEARCH_SECS")?,
            cache_ttl_generic: secs(&var, "CACHE_TTL_GENERIC_SECS")?,
            job_timeout: Duration::from_secs(parse_or(&var, "JOB_TIMEOUT_SECS", 15 * 60)?),
            queue_fallback: parse_or(&var, "QUEUE_FALLBACK", QueueFallback::Inline)?,
            queue_max_retry_window: Duration::from_secs(parse_or(
                &var,
                "QUEUE_MAX_RETRY_WINDOW_SECS",
                30 * 60,
            )?),
            job_retention: Duration::from_secs(
                parse_or(&var, "JOB_RETENTION_HOURS", 7 * 24u64)? * 3600,
            ),
            terminal_webhook_url: var("TERMINAL_WEBHOOK_URL"),
        })
    }

    /// Cache TTLs: built-in defaults with any environment overrides applied.
    pub fn cache_ttls(&self) -> CacheTtlTable {
        [
            (CacheCategory::KeywordMetadata, self.cache_ttl_keyword_metadata),
            (CacheCategory::Serp, self.cache_ttl_serp),
            (CacheCategory::Research, self.cache_ttl_research),
            (CacheCategory::Generic, self.cache_ttl_generic),
        ]
        .into_iter()
        .fold(CacheTtlTable::default(), |table, (category, ttl)| match ttl {
            Some(ttl) => table.with_ttl(category, ttl),
            None => table,
        })
    }

    /// Where the HTTP task queue delivers dispatch messages.
    pub fn worker_endpoint(&self) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}/internal/jobs/run"))
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("{key} must be valid, got {raw:?}")),
        None => Ok(default),
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("{key} must be a number of seconds"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const MINIMAL: [(&str, &str); 3] = [
        ("PROVIDER_LOGIN", "login"),
        ("PROVIDER_PASSWORD", "secret"),
        ("OPENAI_API_KEY", "sk-test"),
    ];

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&MINIMAL).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.provider_base_url, DEFAULT_PROVIDER_BASE_URL);
        assert_eq!(config.job_timeout, Duration::from_secs(900));
        assert_eq!(config.queue_fallback, QueueFallback::Inline);
        assert_eq!(config.job_retention, Duration::from_secs(7 * 24 * 3600));
        assert!(config.database_url.is_none());
        assert!(config.worker_endpoint().is_none());
    }

    #[test]
    fn missing_credentials_are_reported_by_name() {
        let err = load(&[("OPENAI_API_KEY", "sk-test")]).unwrap_err();
        assert!(err.to_string().contains("PROVIDER_LOGIN"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("DATABASE_URL", "  "));
        let config = load(&pairs).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("PORT", "eighty"));
        let err = load(&pairs).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn queue_settings_are_parsed() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("QUEUE_FALLBACK", "reject"));
        pairs.push(("PUBLIC_BASE_URL", "https://gen.example.com/"));
        let config = load(&pairs).unwrap();
        assert_eq!(config.queue_fallback, QueueFallback::Reject);
        assert_eq!(
            config.worker_endpoint().as_deref(),
            Some("https://gen.example.com/internal/jobs/run")
        );
    }

    #[test]
    fn cache_ttl_overrides_replace_defaults() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("CACHE_TTL_SERP_SECS", "60"));
        let config = load(&pairs).unwrap();
        let ttls = config.cache_ttls();
        assert_eq!(ttls.ttl(CacheCategory::Serp), Duration::from_secs(60));
        assert_eq!(
            ttls.ttl(CacheCategory::KeywordMetadata),
            CacheTtlTable::default().ttl(CacheCategory::KeywordMetadata)
        );
    }
}
