//! Configuration types.
//!
//! Everything is read from the environment once at startup. Unparseable or
//! below-minimum values fall back to the default rather than failing, so a
//! typo in an optional knob never keeps the service down.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Inclusive length bounds (in characters) shared by inbound validation and
/// the reply QA stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageBounds {
    pub min: usize,
    pub max: usize,
}

impl MessageBounds {
    /// Build bounds, raising `min` to 1 and `max` to at least `min`.
    pub fn new(min: usize, max: usize) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
        }
    }
}

impl Default for MessageBounds {
    fn default() -> Self {
        Self { min: 1, max: 4000 }
    }
}

/// Outbound SMS webhook settings.
#[derive(Debug, Clone)]
pub struct SmsConfig {
    /// Webhook URL. `None` means deliveries fail with `NotConfigured`.
    pub outbound_url: Option<String>,
    /// Per-request timeout for the webhook call.
    pub timeout: Duration,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            outbound_url: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Bearer token required on `/chat`. Empty means every request is refused.
    pub api_token: SecretString,
    /// Path of the libSQL database file.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
    pub sms: SmsConfig,
    pub bounds: MessageBounds,
    /// Maximum number of deferred deliveries running at once.
    pub delivery_concurrency: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_token: SecretString::from(String::new()),
            db_path: PathBuf::from("./data/texet.db"),
            port: 8000,
            sms: SmsConfig::default(),
            bounds: MessageBounds::default(),
            delivery_concurrency: 8,
        }
    }
}

impl AppConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_token = SecretString::from(lookup("API_TOKEN").unwrap_or_default());

        let db_path = lookup("TEXET_DB_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let port = parse_or(&lookup, "TEXET_PORT", defaults.port, None);

        let outbound_url = lookup("SMS_OUTBOUND_URL").filter(|s| !s.trim().is_empty());
        if let Some(ref url) = outbound_url {
            reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                key: "SMS_OUTBOUND_URL".to_string(),
                message: e.to_string(),
            })?;
        }

        let timeout_secs = parse_or(
            &lookup,
            "SMS_TIMEOUT_SECONDS",
            defaults.sms.timeout.as_secs_f64(),
            Some(0.1),
        );

        let min = parse_or(&lookup, "MESSAGE_MIN_LENGTH", defaults.bounds.min, Some(1));
        let max = parse_or(
            &lookup,
            "MESSAGE_MAX_LENGTH",
            defaults.bounds.max,
            Some(min),
        );

        let delivery_concurrency = parse_or(
            &lookup,
            "TEXET_DELIVERY_CONCURRENCY",
            defaults.delivery_concurrency,
            Some(1),
        );

        Ok(Self {
            api_token,
            db_path,
            port,
            sms: SmsConfig {
                outbound_url,
                timeout: Duration::from_secs_f64(timeout_secs),
            },
            bounds: MessageBounds::new(min, max),
            delivery_concurrency,
        })
    }
}

/// Parse `key`, falling back to `default` when unset, empty, unparseable,
/// or below `minimum`.
fn parse_or<F, T>(lookup: &F, key: &str, default: T, minimum: Option<T>) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Copy,
{
    let Some(parsed) = lookup(key).and_then(|s| s.trim().parse::<T>().ok()) else {
        return default;
    };
    match minimum {
        Some(min) if parsed < min => {
            tracing::warn!(key, "Configuration value below minimum, using default");
            default
        }
        _ => parsed,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.bounds, MessageBounds { min: 1, max: 4000 });
        assert_eq!(config.sms.timeout, Duration::from_secs(10));
        assert!(config.sms.outbound_url.is_none());
        assert_eq!(config.port, 8000);
        assert_eq!(config.delivery_concurrency, 8);
        assert_eq!(config.api_token.expose_secret(), "");
    }

    #[test]
    fn reads_values() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("API_TOKEN", "secret"),
            ("TEXET_DB_PATH", "/tmp/t.db"),
            ("SMS_OUTBOUND_URL", "http://localhost:9000/sms"),
            ("SMS_TIMEOUT_SECONDS", "2.5"),
            ("MESSAGE_MIN_LENGTH", "2"),
            ("MESSAGE_MAX_LENGTH", "160"),
        ]))
        .unwrap();
        assert_eq!(config.api_token.expose_secret(), "secret");
        assert_eq!(config.db_path, PathBuf::from("/tmp/t.db"));
        assert_eq!(
            config.sms.outbound_url.as_deref(),
            Some("http://localhost:9000/sms")
        );
        assert_eq!(config.sms.timeout, Duration::from_millis(2500));
        assert_eq!(config.bounds, MessageBounds { min: 2, max: 160 });
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("SMS_TIMEOUT_SECONDS", "0.01"),
            ("MESSAGE_MIN_LENGTH", "zero"),
            ("TEXET_DELIVERY_CONCURRENCY", "0"),
        ]))
        .unwrap();
        assert_eq!(config.sms.timeout, Duration::from_secs(10));
        assert_eq!(config.bounds.min, 1);
        assert_eq!(config.delivery_concurrency, 8);
    }

    #[test]
    fn max_below_min_falls_back() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("MESSAGE_MIN_LENGTH", "10"),
            ("MESSAGE_MAX_LENGTH", "5"),
        ]))
        .unwrap();
        assert_eq!(config.bounds, MessageBounds { min: 10, max: 4000 });
    }

    #[test]
    fn rejects_malformed_outbound_url() {
        let err = AppConfig::from_lookup(lookup_from(&[("SMS_OUTBOUND_URL", "not a url")]))
            .unwrap_err();
        assert!(err.to_string().contains("SMS_OUTBOUND_URL"));
    }

    #[test]
    fn bounds_are_normalized() {
        assert_eq!(MessageBounds::new(0, 0), MessageBounds { min: 1, max: 1 });
        assert_eq!(MessageBounds::new(5, 3), MessageBounds { min: 5, max: 5 });
    }
}
