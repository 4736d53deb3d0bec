use std::env;
use std::time::Duration;

use reqwest::Url;

use crate::error::ConfigError;

/// Generation status checks run this often unless configured otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// A learner may hold at most this many non-archived trails.
pub const MAX_ACTIVE_TRAILS: usize = 3;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the remote trail service.
#[derive(Clone, Debug)]
pub struct TrailServiceConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl TrailServiceConfig {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            api_token: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Read configuration from `TRAILS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the base URL is missing or a value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the base URL is missing or a value fails to parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = lookup("TRAILS_API_BASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::Missing {
                var: "TRAILS_API_BASE_URL",
            })?;
        let mut config = Self::new(parse_base_url(&raw)?);

        config.api_token = lookup("TRAILS_API_TOKEN").filter(|token| !token.trim().is_empty());
        if let Some(raw) = lookup("TRAILS_POLL_INTERVAL_MS") {
            config.poll_interval =
                Duration::from_millis(parse_positive(&raw, "TRAILS_POLL_INTERVAL_MS")?);
        }
        if let Some(raw) = lookup("TRAILS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_positive(&raw, "TRAILS_REQUEST_TIMEOUT_SECS")?);
        }
        Ok(config)
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            poll_interval: self.poll_interval,
            ..StoreConfig::default()
        }
    }
}

/// Parse a base URL that can carry path segments.
///
/// # Errors
///
/// Returns `ConfigError::Invalid` for unparsable or non-hierarchical URLs.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = || ConfigError::Invalid {
        var: "TRAILS_API_BASE_URL",
        raw: raw.to_owned(),
    };
    let url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if url.cannot_be_a_base() {
        return Err(invalid());
    }
    Ok(url)
}

fn parse_positive(raw: &str, var: &'static str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::Invalid {
            var,
            raw: raw.to_owned(),
        }),
    }
}

/// Tuning for `TrailStore`.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    pub poll_interval: Duration,
    pub max_active_trails: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_active_trails: MAX_ACTIVE_TRAILS,
        }
    }
}
