//! Service configuration.
//!
//! Configuration is loaded from `CONDUCTOR_*` environment variables with
//! defaults suitable for local development. Unparsable values fall back to
//! the default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Conductor service configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConductorConfig {
    /// How long a pending invitation stays valid, in hours.
    pub invitation_lifetime_hours: i64,

    /// Whether every user sees every other user.
    pub show_all_users: bool,

    /// Base URL of the GeoIP API.
    pub geoip_url: String,

    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,

    /// Maximum attempts for outgoing HTTP calls.
    pub max_retries: u32,

    /// Sender address of outgoing mail.
    pub default_from_email: String,

    /// Secret for signing auth tokens.
    pub token_secret: Option<String>,

    /// Auth token lifetime in hours.
    pub token_lifetime_hours: i64,

    /// Whether logs are written as JSON.
    pub log_json: bool,
}

impl std::fmt::Debug for ConductorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConductorConfig")
            .field("invitation_lifetime_hours", &self.invitation_lifetime_hours)
            .field("show_all_users", &self.show_all_users)
            .field("geoip_url", &self.geoip_url)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("default_from_email", &self.default_from_email)
            .field("token_secret", &self.token_secret.as_ref().map(|_| "[REDACTED]"))
            .field("token_lifetime_hours", &self.token_lifetime_hours)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Default for ConductorConfig {
    /// Returns default configuration suitable for local development.
    fn default() -> Self {
        Self {
            invitation_lifetime_hours: 7 * 24,
            show_all_users: false,
            geoip_url: "http://freegeoip.net".to_string(),
            http_timeout_secs: 10,
            max_retries: 3,
            default_from_email: "noreply@example.com".to_string(),
            token_secret: None,
            token_lifetime_hours: 24,
            log_json: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl ConductorConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CONDUCTOR_INVITATION_LIFETIME_HOURS`: Invitation lifetime (default: 168)
    /// - `CONDUCTOR_SHOW_ALL_USERS`: Show every user to everyone (default: false)
    /// - `CONDUCTOR_GEOIP_URL`: GeoIP API base URL (default: http://freegeoip.net)
    /// - `CONDUCTOR_HTTP_TIMEOUT_SECS`: HTTP timeout in seconds (default: 10)
    /// - `CONDUCTOR_MAX_RETRIES`: Maximum HTTP attempts (default: 3)
    /// - `CONDUCTOR_DEFAULT_FROM_EMAIL`: Mail sender (default: noreply@example.com)
    /// - `CONDUCTOR_TOKEN_SECRET`: Token signing secret
    /// - `CONDUCTOR_TOKEN_LIFETIME_HOURS`: Token lifetime (default: 24)
    /// - `CONDUCTOR_LOG_JSON`: JSON log output (default: false)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            invitation_lifetime_hours: env_parse(
                "CONDUCTOR_INVITATION_LIFETIME_HOURS",
                default.invitation_lifetime_hours,
            ),
            show_all_users: env_flag("CONDUCTOR_SHOW_ALL_USERS", default.show_all_users),
            geoip_url: std::env::var("CONDUCTOR_GEOIP_URL").unwrap_or(default.geoip_url),
            http_timeout_secs: env_parse("CONDUCTOR_HTTP_TIMEOUT_SECS", default.http_timeout_secs),
            max_retries: env_parse("CONDUCTOR_MAX_RETRIES", default.max_retries),
            default_from_email: std::env::var("CONDUCTOR_DEFAULT_FROM_EMAIL")
                .unwrap_or(default.default_from_email),
            token_secret: std::env::var("CONDUCTOR_TOKEN_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            token_lifetime_hours: env_parse(
                "CONDUCTOR_TOKEN_LIFETIME_HOURS",
                default.token_lifetime_hours,
            ),
            log_json: env_flag("CONDUCTOR_LOG_JSON", default.log_json),
        }
    }

    /// Invitation lifetime.
    pub fn invitation_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.invitation_lifetime_hours)
    }

    /// HTTP request timeout.
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Auth token lifetime.
    pub fn token_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_lifetime_hours)
    }

    /// Validate that all required configuration is present for production.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.token_secret.is_none() {
            return Err(ConfigError::MissingEnvVar("CONDUCTOR_TOKEN_SECRET".to_string()));
        }
        if self.invitation_lifetime_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONDUCTOR_INVITATION_LIFETIME_HOURS".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CONDUCTOR_MAX_RETRIES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.invitation_lifetime(), chrono::Duration::days(7));
        assert_eq!(config.http_timeout(), Duration::from_secs(10));
        assert_eq!(config.geoip_url, "http://freegeoip.net");
        assert!(!config.show_all_users);
    }

    #[test]
    fn test_production_requires_secret() {
        let config = ConductorConfig::default();
        assert!(matches!(
            config.validate_for_production(),
            Err(ConfigError::MissingEnvVar(_))
        ));

        let config = ConductorConfig {
            token_secret: Some("s3cret".to_string()),
            ..ConductorConfig::default()
        };
        assert!(config.validate_for_production().is_ok());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ConductorConfig {
            token_secret: Some("s3cret".to_string()),
            ..ConductorConfig::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
