use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use trellis_core::config::{env_flag, env_parse, ConfigError, ConfigSource, ConfigTrait};

use crate::definition::TIMEOUT_DEFAULT;

/// When a transaction manager activates thread-bound synchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynchronizationPolicy {
    /// Also for empty scopes, e.g. SUPPORTS without an existing transaction
    #[default]
    Always,
    /// Only for scopes backed by a real transaction
    OnActualTransaction,
    Never,
}

impl FromStr for SynchronizationPolicy {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "on_actual_transaction" => Ok(Self::OnActualTransaction),
            "never" => Ok(Self::Never),
            _ => Err(ConfigError::invalid_value(
                "transaction_synchronization",
                raw,
                "always, on_actual_transaction or never",
            )),
        }
    }
}

impl fmt::Display for SynchronizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Always => "always",
            Self::OnActualTransaction => "on_actual_transaction",
            Self::Never => "never",
        })
    }
}

/// Behavior switches of a transaction manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionManagerConfig {
    pub transaction_synchronization: SynchronizationPolicy,
    /// Timeout in seconds applied when a definition asks for the default
    pub default_timeout: i32,
    /// Whether NESTED propagation may create savepoints in a running transaction
    pub nested_transaction_allowed: bool,
    /// Check isolation and read-only compatibility when joining a transaction
    pub validate_existing_transaction: bool,
    /// Mark the shared transaction rollback-only when a participant fails
    pub global_rollback_on_participation_failure: bool,
    /// Raise an unexpected rollback as soon as a participant sees the global mark
    pub fail_early_on_global_rollback_only: bool,
    /// Roll back when the commit itself fails
    pub rollback_on_commit_failure: bool,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            transaction_synchronization: SynchronizationPolicy::Always,
            default_timeout: TIMEOUT_DEFAULT,
            nested_transaction_allowed: false,
            validate_existing_transaction: false,
            global_rollback_on_participation_failure: true,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
        }
    }
}

impl TransactionManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults for managers whose resources support savepoints
    pub fn with_savepoints() -> Self {
        Self {
            nested_transaction_allowed: true,
            ..Self::default()
        }
    }
}

impl ConfigTrait for TransactionManagerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<SynchronizationPolicy>(
            "TRELLIS_TX_SYNCHRONIZATION",
            "always, on_actual_transaction or never",
        )? {
            config.transaction_synchronization = v;
        }
        if let Some(v) = env_parse("TRELLIS_TX_DEFAULT_TIMEOUT", "timeout in seconds or -1")? {
            config.default_timeout = v;
        }
        if let Some(v) = env_flag("TRELLIS_TX_NESTED_TRANSACTION_ALLOWED")? {
            config.nested_transaction_allowed = v;
        }
        if let Some(v) = env_flag("TRELLIS_TX_VALIDATE_EXISTING_TRANSACTION")? {
            config.validate_existing_transaction = v;
        }
        if let Some(v) = env_flag("TRELLIS_TX_GLOBAL_ROLLBACK_ON_PARTICIPATION_FAILURE")? {
            config.global_rollback_on_participation_failure = v;
        }
        if let Some(v) = env_flag("TRELLIS_TX_FAIL_EARLY_ON_GLOBAL_ROLLBACK_ONLY")? {
            config.fail_early_on_global_rollback_only = v;
        }
        if let Some(v) = env_flag("TRELLIS_TX_ROLLBACK_ON_COMMIT_FAILURE")? {
            config.rollback_on_commit_failure = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_timeout < TIMEOUT_DEFAULT {
            return Err(ConfigError::invalid_value(
                "default_timeout",
                self.default_timeout.to_string(),
                "a timeout in seconds or -1",
            ));
        }
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "transaction_synchronization".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_SYNCHRONIZATION", SynchronizationPolicy::Always),
        );
        sources.insert(
            "default_timeout".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_DEFAULT_TIMEOUT", TIMEOUT_DEFAULT),
        );
        sources.insert(
            "nested_transaction_allowed".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_NESTED_TRANSACTION_ALLOWED", false),
        );
        sources.insert(
            "validate_existing_transaction".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_VALIDATE_EXISTING_TRANSACTION", false),
        );
        sources.insert(
            "global_rollback_on_participation_failure".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_GLOBAL_ROLLBACK_ON_PARTICIPATION_FAILURE", true),
        );
        sources.insert(
            "fail_early_on_global_rollback_only".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_FAIL_EARLY_ON_GLOBAL_ROLLBACK_ONLY", false),
        );
        sources.insert(
            "rollback_on_commit_failure".to_string(),
            ConfigSource::for_env_var("TRELLIS_TX_ROLLBACK_ON_COMMIT_FAILURE", false),
        );
        sources
    }
}
