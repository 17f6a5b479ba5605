//! Configuration management for the governance firewall.
//!
//! All configuration is loaded from environment variables with the
//! `PAYGUARD_` prefix. Secrets must be provided via the environment and are
//! redacted from `Debug` output; they live only inside the config value
//! handed to clients at construction time.

#![warn(missing_docs, clippy::pedantic)]

use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Environment variable prefix shared by all settings.
pub const ENV_PREFIX: &str = "PAYGUARD_";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable was not set.
    #[error("missing required environment variable `{ENV_PREFIX}{name}`")]
    Missing {
        /// Variable name without the prefix.
        name: &'static str,
    },
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for `{ENV_PREFIX}{name}`: {reason}")]
    Invalid {
        /// Variable name without the prefix.
        name: &'static str,
        /// Human-readable parse failure.
        reason: String,
    },
}

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// A secret string that never appears in `Debug` or `Display` output.
#[derive(Clone, Default)]
pub struct Secret(String);

impl Secret {
    /// Wraps an already-loaded secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the underlying secret for use at a client construction site.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns `true` when no secret material is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Payment backend API key id.
    pub payment_key_id: String,
    /// Payment backend API key secret.
    pub payment_key_secret: Secret,
    /// Payment backend account number used by the pull-mode poller.
    pub payment_account: Option<String>,
    /// Base URL of the payment backend API.
    pub payment_api_base: String,
    /// Shared secret for webhook HMAC verification.
    pub webhook_secret: Secret,
    /// Threat-intel API key.
    pub threat_intel_key: Secret,
    /// Threat-intel lookup endpoint.
    pub threat_intel_api_url: String,
    /// Legal-entity registry endpoint (advisory identity checks).
    pub identity_api_url: String,
    /// SQLite database path for policies and the audit primary.
    pub database_url: String,
    /// Directory receiving audit fallback files when the primary is down.
    pub audit_fallback_dir: String,
    /// Push-notification topic for held payouts (empty disables).
    pub notify_topic: String,
    /// Push-notification server base URL.
    pub notify_server: String,
    /// Optional bearer token for the notification server.
    pub notify_token: Secret,
    /// Server bind host.
    pub host: String,
    /// Server bind port.
    pub port: u16,
    /// Poll interval for pull-mode ingress.
    pub poll_interval: Duration,
    /// Start the background poller automatically.
    pub auto_poll: bool,
    /// Maximum concurrently processed intents before backpressure.
    pub inflight_limit: usize,
    /// Consecutive failures before a circuit opens.
    pub breaker_failure_threshold: u32,
    /// Time a circuit stays open before a half-open probe.
    pub breaker_reset_timeout: Duration,
    /// Maximum payout requests per agent per rate-limit window (0 disables).
    pub rate_limit_max: u32,
    /// Sliding rate-limit window length.
    pub rate_limit_window: Duration,
}

impl GuardConfig {
    /// Loads configuration from `PAYGUARD_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            payment_key_id: required("PAYMENT_KEY_ID")?,
            payment_key_secret: Secret::new(required("PAYMENT_KEY_SECRET")?),
            payment_account: optional("PAYMENT_ACCOUNT"),
            payment_api_base: optional("PAYMENT_API_BASE")
                .unwrap_or_else(|| "https://api.payments.example/v1".to_owned()),
            webhook_secret: Secret::new(required("WEBHOOK_SECRET")?),
            threat_intel_key: Secret::new(required("THREAT_INTEL_KEY")?),
            threat_intel_api_url: optional("THREAT_INTEL_API_URL").unwrap_or_else(|| {
                "https://safebrowsing.googleapis.com/v4/threatMatches:find".to_owned()
            }),
            identity_api_url: optional("IDENTITY_API_URL")
                .unwrap_or_else(|| "https://api.gleif.org/api/v1/lei-records".to_owned()),
            database_url: optional("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://payguard.db?mode=rwc".to_owned()),
            audit_fallback_dir: optional("AUDIT_FALLBACK_DIR")
                .unwrap_or_else(|| "./audit_logs".to_owned()),
            notify_topic: optional("NOTIFY_TOPIC").unwrap_or_default(),
            notify_server: optional("NOTIFY_SERVER")
                .unwrap_or_else(|| "https://ntfy.sh".to_owned()),
            notify_token: Secret::new(optional("NOTIFY_TOKEN").unwrap_or_default()),
            host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_owned()),
            port: parsed("PORT", 8000)?,
            poll_interval: Duration::from_secs(parsed("POLL_INTERVAL_SECS", 30_u64)?.clamp(5, 300)),
            auto_poll: parsed("AUTO_POLL", false)?,
            inflight_limit: parsed("INFLIGHT_LIMIT", 64_usize)?,
            breaker_failure_threshold: parsed("BREAKER_FAILURE_THRESHOLD", 5_u32)?,
            breaker_reset_timeout: Duration::from_secs(parsed("BREAKER_RESET_SECS", 30_u64)?),
            rate_limit_max: parsed("RATE_LIMIT_MAX", 10_u32)?,
            rate_limit_window: Duration::from_secs(parsed("RATE_LIMIT_WINDOW_SECS", 60_u64)?),
        })
    }
}

fn var(name: &'static str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn required(name: &'static str) -> ConfigResult<String> {
    var(name).ok_or(ConfigError::Missing { name })
}

fn optional(name: &'static str) -> Option<String> {
    var(name)
}

fn parsed<T>(name: &'static str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match var(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_debug_is_redacted() {
        let secret = Secret::new("whsec_supersensitive");
        assert_eq!(format!("{secret:?}"), "Secret(****)");
    }

    #[test]
    fn config_debug_never_leaks_secrets() {
        let config = GuardConfig {
            payment_key_id: "key_id".into(),
            payment_key_secret: Secret::new("key_secret_value"),
            payment_account: None,
            payment_api_base: "https://api.payments.example/v1".into(),
            webhook_secret: Secret::new("webhook_secret_value"),
            threat_intel_key: Secret::new("intel_key_value"),
            threat_intel_api_url: String::new(),
            identity_api_url: String::new(),
            database_url: "sqlite::memory:".into(),
            audit_fallback_dir: "./audit_logs".into(),
            notify_topic: String::new(),
            notify_server: String::new(),
            notify_token: Secret::default(),
            host: "127.0.0.1".into(),
            port: 8000,
            poll_interval: Duration::from_secs(30),
            auto_poll: false,
            inflight_limit: 64,
            breaker_failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(60),
        };

        let rendered = format!("{config:?}");
        assert!(!rendered.contains("key_secret_value"));
        assert!(!rendered.contains("webhook_secret_value"));
        assert!(!rendered.contains("intel_key_value"));
    }

    #[test]
    fn missing_required_variables_error() {
        // The test environment does not define the payment credentials.
        std::env::remove_var("PAYGUARD_PAYMENT_KEY_ID");
        let err = GuardConfig::from_env().expect_err("missing credentials");
        assert!(matches!(err, ConfigError::Missing { name: "PAYMENT_KEY_ID" }));

        // With credentials present the webhook shared secret is still
        // required; a deployment without it must fail at startup rather
        // than reject every push webhook at runtime.
        std::env::set_var("PAYGUARD_PAYMENT_KEY_ID", "key_id");
        std::env::set_var("PAYGUARD_PAYMENT_KEY_SECRET", "key_secret");
        std::env::remove_var("PAYGUARD_WEBHOOK_SECRET");
        let err = GuardConfig::from_env().expect_err("missing webhook secret");
        assert!(matches!(err, ConfigError::Missing { name: "WEBHOOK_SECRET" }));

        std::env::remove_var("PAYGUARD_PAYMENT_KEY_ID");
        std::env::remove_var("PAYGUARD_PAYMENT_KEY_SECRET");
    }
}
