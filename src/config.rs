use crate::ebay::EbayConfig;
use crate::llm::LlmConfig;
use crate::rate_limit::RateLimitTable;
use std::{env, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read rate limit file {path}: {source}")]
    RateLimitFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid rate limit table: {0}")]
    RateLimitYaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

/// Gates applied when deciding whether a listing is worth keeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Asking price must sit at least this far (percent) below the fetched
    /// market signal before the sellability stage is called.
    pub quick_discount_min_pct: f64,
    pub min_true_discount_pct: i32,
    pub heuristic_min_score: u8,
    pub market_history_max_age_days: Option<u32>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            quick_discount_min_pct: 40.0,
            min_true_discount_pct: 50,
            heuristic_min_score: 70,
            market_history_max_age_days: Some(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_key: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub queue_capacity: usize,
    pub job_concurrency: usize,
    pub body_limit_bytes: usize,
    pub http: HttpSettings,
    pub analysis_enabled: bool,
    pub analysis_timeout: Duration,
    pub thresholds: Thresholds,
    pub cache_max_entries: usize,
    pub cache_ttl: Duration,
    pub idempotency_ttl: Duration,
    pub llm: LlmConfig,
    pub ebay: EbayConfig,
    pub supabase: Option<SupabaseSettings>,
    pub redis_url: Option<String>,
    pub mercari_api_key: Option<String>,
    pub metrics_key: Option<String>,
    pub api_keys: String,
    pub rate_limits: RateLimitTable,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let llm = LlmConfig::from_lookup(&lookup);
        let ebay = EbayConfig::from_lookup(&lookup);
        let analysis_enabled = match lookup("ANALYSIS_ENABLED") {
            Some(raw) => parse_bool(&raw),
            None => llm.api_key.is_some() && ebay.has_credentials(),
        };

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            quick_discount_min_pct: parse_or(&lookup, "QUICK_DISCOUNT_MIN_PCT", defaults.quick_discount_min_pct),
            min_true_discount_pct: parse_or(&lookup, "MIN_TRUE_DISCOUNT_PCT", defaults.min_true_discount_pct),
            heuristic_min_score: parse_or(&lookup, "HEURISTIC_MIN_SCORE", defaults.heuristic_min_score),
            // 0 disables the recency window.
            market_history_max_age_days: match parse_or(&lookup, "MARKET_HISTORY_MAX_AGE_DAYS", 90u32) {
                0 => None,
                days => Some(days),
            },
        };

        let supabase = lookup("SUPABASE_URL").and_then(|url| {
            let service_key = lookup("SUPABASE_SERVICE_ROLE_KEY")
                .or_else(|| lookup("SUPABASE_SERVICE_KEY"))
                .or_else(|| lookup("SUPABASE_KEY"))?;
            Some(SupabaseSettings {
                url: url.trim_end_matches('/').to_string(),
                service_key,
            })
        });

        let rate_limits = match lookup("RATE_LIMITS_FILE").filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                let table = load_rate_limits(PathBuf::from(path.trim()))?;
                info!(
                    target = "flipscout.config",
                    endpoints = table.endpoints.len(),
                    "rate_limits_loaded"
                );
                table
            }
            None => RateLimitTable::default(),
        };

        Ok(Self {
            port: parse_or(&lookup, "PORT", 8000),
            queue_capacity: positive_or(&lookup, "QUEUE_CAPACITY", 64),
            job_concurrency: positive_or(&lookup, "JOB_CONCURRENCY", 4),
            body_limit_bytes: positive_or(&lookup, "REQUEST_MAX_BYTES", 1024 * 1024),
            http: HttpSettings {
                timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", 15),
                connect_timeout_secs: parse_or(&lookup, "HTTP_CONNECT_TIMEOUT_SECS", 5),
            },
            analysis_enabled,
            analysis_timeout: Duration::from_secs(positive_or(&lookup, "ANALYSIS_TIMEOUT_SECS", 20)),
            thresholds,
            cache_max_entries: positive_or(&lookup, "CACHE_MAX_ENTRIES", 1000),
            cache_ttl: Duration::from_secs(positive_or(&lookup, "CACHE_TTL_SECS", 3600)),
            idempotency_ttl: Duration::from_secs(positive_or(&lookup, "IDEMPOTENCY_TTL_SECS", 3600)),
            llm,
            ebay,
            supabase,
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            mercari_api_key: lookup("MERCARI_API_KEY").filter(|v| !v.trim().is_empty()),
            metrics_key: lookup("METRICS_KEY").filter(|v| !v.trim().is_empty()),
            api_keys: lookup("DEMO_API_KEYS").unwrap_or_else(|| "demo-owner:demo-key".to_string()),
            rate_limits,
        })
    }
}

pub fn load_rate_limits(path: PathBuf) -> Result<RateLimitTable, ConfigError> {
    let raw = std::fs::read_to_string(&path)
        .map_err(|source| ConfigError::RateLimitFile { path, source })?;
    Ok(serde_yaml::from_str(&raw)?)
}

pub(crate) fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn positive_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or(lookup, key, default);
    if value > T::default() { value } else { default }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned()).expect("config")
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = config_from(&[]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.thresholds, Thresholds::default());
        assert!(!config.analysis_enabled);
        assert!(config.supabase.is_none());
        assert_eq!(config.rate_limits, RateLimitTable::default());
    }

    #[test]
    fn analysis_follows_credentials_unless_forced() {
        let creds = [
            ("TENSORZERO_API_KEY", "tz"),
            ("EBAY_APP_ID_PRODUCTION", "app"),
            ("EBAY_CERT_ID_PRODUCTION", "cert"),
        ];
        assert!(config_from(&creds).analysis_enabled);

        let mut forced_off = creds.to_vec();
        forced_off.push(("ANALYSIS_ENABLED", "false"));
        assert!(!config_from(&forced_off).analysis_enabled);

        assert!(!config_from(&[("TENSORZERO_API_KEY", "tz")]).analysis_enabled);
    }

    #[test]
    fn malformed_numbers_fall_back() {
        let config = config_from(&[
            ("PORT", "eighty"),
            ("QUEUE_CAPACITY", "0"),
            ("MIN_TRUE_DISCOUNT_PCT", "55"),
            ("MARKET_HISTORY_MAX_AGE_DAYS", "0"),
        ]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.thresholds.min_true_discount_pct, 55);
        assert_eq!(config.thresholds.market_history_max_age_days, None);
    }

    #[test]
    fn supabase_requires_url_and_key() {
        let config = config_from(&[("SUPABASE_URL", "https://x.supabase.co/")]);
        assert!(config.supabase.is_none());
        let config = config_from(&[
            ("SUPABASE_URL", "https://x.supabase.co/"),
            ("SUPABASE_KEY", "secret"),
        ]);
        let supabase = config.supabase.expect("supabase");
        assert_eq!(supabase.url, "https://x.supabase.co");
    }

    #[test]
    fn missing_rate_limit_file_is_an_error() {
        let vars: HashMap<String, String> =
            [("RATE_LIMITS_FILE".to_string(), "/nonexistent/limits.yaml".to_string())].into();
        let result = AppConfig::from_lookup(|key| vars.get(key).cloned());
        assert!(matches!(result, Err(ConfigError::RateLimitFile { .. })));
    }
}
