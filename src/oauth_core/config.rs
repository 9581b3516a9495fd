//! Issuance settings: lifetimes, credential lengths and refresh reuse policy.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest accepted code or token length. 22 base64url characters carry
/// 132 bits from the CSPRNG.
pub const MIN_CREDENTIAL_LENGTH: usize = 22;

/// Sweep period used for `RevokeFamily` when none is configured.
pub const DEFAULT_TOMBSTONE_SWEEP_SECS: u64 = 300;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// The document could not be parsed.
    #[error("Malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// What happens when a client presents a refresh token that was already rotated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReusePolicy {
    /// Fail with `invalid_grant` and change nothing.
    #[default]
    Reject,
    /// Fail with `invalid_grant` and revoke every live token of the same family.
    ///
    /// Rotated tokens are remembered until their original expiry and only
    /// reclaimed by the expiry sweep, so run
    /// [`OAuthServer::spawn_configured_sweeper`](super::server::OAuthServer::spawn_configured_sweeper)
    /// with this policy.
    RevokeFamily,
}

/// Configuration for an [`OAuthServer`](super::server::OAuthServer).
///
/// Missing fields fall back to [`OAuthConfig::default`], so a partial JSON
/// document is enough:
///
/// ```
/// use starberry_authd::OAuthConfig;
///
/// let config = OAuthConfig::from_json_str(r#"{ "access_token_ttl_secs": 900 }"#).unwrap();
/// assert_eq!(config.access_token_ttl_secs, 900);
/// assert_eq!(config.authorization_code_ttl_secs, 600);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Authorization code lifetime. Default 10 minutes.
    pub authorization_code_ttl_secs: u64,
    /// Access token lifetime, also reported as `expires_in`. Default 1 hour.
    pub access_token_ttl_secs: u64,
    /// Refresh token lifetime. Default 24 hours.
    pub refresh_token_ttl_secs: u64,
    /// Length of generated authorization codes.
    pub code_length: usize,
    /// Length of generated access and refresh tokens.
    pub token_length: usize,
    pub refresh_reuse_policy: RefreshReusePolicy,
    /// Period of the background expiry sweep. `None` leaves expiry purely lazy,
    /// except under `RevokeFamily`, which sweeps every
    /// [`DEFAULT_TOMBSTONE_SWEEP_SECS`].
    pub sweep_interval_secs: Option<u64>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorization_code_ttl_secs: 600,
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 24 * 3600,
            code_length: 32,
            token_length: 43,
            refresh_reuse_policy: RefreshReusePolicy::Reject,
            sweep_interval_secs: None,
        }
    }
}

impl OAuthConfig {
    /// Loads and validates a configuration from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `code_length` or `token_length`
    /// is below [`MIN_CREDENTIAL_LENGTH`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.code_length < MIN_CREDENTIAL_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "code_length must be at least {MIN_CREDENTIAL_LENGTH}, got {}",
                self.code_length
            )));
        }
        if self.token_length < MIN_CREDENTIAL_LENGTH {
            return Err(ConfigError::InvalidValue(format!(
                "token_length must be at least {MIN_CREDENTIAL_LENGTH}, got {}",
                self.token_length
            )));
        }
        Ok(())
    }

    pub fn authorization_code_ttl(&self) -> Duration {
        secs(self.authorization_code_ttl_secs)
    }

    pub fn access_token_ttl(&self) -> Duration {
        secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        secs(self.refresh_token_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<std::time::Duration> {
        let fallback = match self.refresh_reuse_policy {
            RefreshReusePolicy::RevokeFamily => Some(DEFAULT_TOMBSTONE_SWEEP_SECS),
            RefreshReusePolicy::Reject => None,
        };
        self.sweep_interval_secs
            .filter(|s| *s > 0)
            .or(fallback)
            .map(std::time::Duration::from_secs)
    }
}

/// Lifetimes are capped at roughly a century so expiry arithmetic cannot overflow.
const MAX_TTL_SECS: u64 = 100 * 365 * 24 * 3600;

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_TTL_SECS) as i64)
}
