//! Core configuration loading and validation.
//!
//! # Responsibility
//! - Deserialize the JSON configuration document with per-section defaults.
//! - Validate declaration-level invariants before any service is built.
//! - Build the explicit `TierPolicy` value passed into services.
//!
//! # Invariants
//! - A missing section falls back to its defaults; an unknown key is an error.
//! - An empty `tiers` list means "use the built-in tier table".

use crate::logging::default_log_level;
use crate::model::tier::{TierPolicy, TierPolicyError};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Smallest gap that still leaves room for one midpoint insertion.
pub const MIN_SORT_ORDER_GAP: i64 = 2;

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    /// SQLite database file. `None` means in-memory.
    pub database_path: Option<PathBuf>,
    /// Directory for the local blob store.
    pub blob_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub retry: RetryPolicy,
    pub ordering: OrderingConfig,
    pub quota: QuotaConfig,
    /// Tier table; empty selects the built-in `free`/`pro` tiers.
    pub tiers: Vec<crate::model::tier::TierLimits>,
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute directory for rolling log files. `None` disables file logging.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            dir: None,
        }
    }
}

/// Bounded retry policy for store-level write conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Overall deadline for one operation, retries included.
    pub request_timeout_ms: u64,
    /// How long SQLite waits on a held write lock before reporting `BUSY`.
    pub busy_timeout_ms: u64,
}

impl RetryPolicy {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Upper bound of the backoff window before attempt `attempt + 1`.
    ///
    /// Exponential in `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exp = self.base_backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(exp.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 10,
            max_backoff_ms: 200,
            request_timeout_ms: 5_000,
            busy_timeout_ms: 1_000,
        }
    }
}

/// Manual ordering key spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OrderingConfig {
    /// Distance between consecutive keys on append and renumber.
    pub gap: i64,
    /// Key assigned to the first item of an empty scope.
    pub base: i64,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            gap: 1_000,
            base: 1_000,
        }
    }
}

/// Quota enforcement switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaConfig {
    /// Reject module creation for undeclared tiers instead of applying the
    /// most restrictive tier.
    pub reject_unknown_tiers: bool,
}

/// Configuration load/validation errors.
#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
    Tier(TierPolicyError),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, message } => {
                write!(f, "failed to read config `{}`: {message}", path.display())
            }
            Self::Parse(message) => write!(f, "failed to parse config: {message}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
            Self::Tier(err) => write!(f, "invalid tier table: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Tier(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TierPolicyError> for ConfigError {
    fn from(value: TierPolicyError) -> Self {
        Self::Tier(value)
    }
}

impl CoreConfig {
    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// Parses and validates a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.retry.base_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.base_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
            ));
        }
        if self.ordering.gap < MIN_SORT_ORDER_GAP {
            return Err(ConfigError::Invalid(format!(
                "ordering.gap must be at least {MIN_SORT_ORDER_GAP}"
            )));
        }
        if let Some(dir) = &self.logging.dir {
            if !dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "logging.dir must be an absolute path, got `{}`",
                    dir.display()
                )));
            }
        }
        if !self.tiers.is_empty() {
            TierPolicy::new(self.tiers.clone())?;
        }
        Ok(())
    }

    /// Builds the tier policy described by this config.
    pub fn tier_policy(&self) -> Result<TierPolicy, ConfigError> {
        if self.tiers.is_empty() {
            return Ok(TierPolicy::builtin());
        }
        Ok(TierPolicy::new(self.tiers.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::model::tier::{Limit, QuotaResource, TIER_FREE};

    #[test]
    fn empty_document_uses_defaults() {
        let config = CoreConfig::from_json_str("{}").expect("defaults should validate");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.ordering.gap, 1_000);
        assert!(!config.quota.reject_unknown_tiers);

        let policy = config.tier_policy().expect("builtin policy");
        assert_eq!(policy.most_restrictive().name, TIER_FREE);
    }

    #[test]
    fn custom_tiers_replace_builtin_table() {
        let config = CoreConfig::from_json_str(
            r#"{
                "ordering": { "gap": 16 },
                "tiers": [
                    {
                        "name": "solo",
                        "max_modules": 2,
                        "max_notes_per_module": 5,
                        "max_tags": 3,
                        "max_storage_bytes": 1024
                    }
                ]
            }"#,
        )
        .expect("config should parse");
        assert_eq!(config.ordering.gap, 16);
        assert_eq!(config.ordering.base, 1_000);

        let policy = config.tier_policy().expect("policy");
        assert!(!policy.contains("pro"));
        assert_eq!(
            policy.lookup("pro").limit_for(QuotaResource::Modules),
            Limit::Finite(2)
        );
    }

    #[test]
    fn rejects_invalid_sections() {
        let err = CoreConfig::from_json_str(r#"{ "retry": { "max_attempts": 0 } }"#)
            .expect_err("zero attempts must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CoreConfig::from_json_str(r#"{ "ordering": { "gap": 1 } }"#)
            .expect_err("gap below minimum must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = CoreConfig::from_json_str(r#"{ "logging": { "dir": "relative/logs" } }"#)
            .expect_err("relative log dir must fail");
        assert!(err.to_string().contains("absolute"));

        let err = CoreConfig::from_json_str(r#"{ "unknown_section": true }"#)
            .expect_err("unknown keys must fail");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn backoff_ceiling_grows_and_caps() {
        let config = CoreConfig::default();
        let retry = &config.retry;
        assert_eq!(retry.backoff_ceiling(1).as_millis(), 10);
        assert_eq!(retry.backoff_ceiling(2).as_millis(), 20);
        assert_eq!(retry.backoff_ceiling(30).as_millis(), 200);
    }
}
