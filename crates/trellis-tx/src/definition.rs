//! Transaction definitions: propagation, isolation, timeout and read-only hints.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// Timeout value meaning "use the manager's default"
pub const TIMEOUT_DEFAULT: i32 = -1;

/// How a transactional call relates to a transaction already running on the thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction, or start one if none exists
    #[default]
    Required,
    /// Join the current transaction, or run without one
    Supports,
    /// Join the current transaction, failing if none exists
    Mandatory,
    /// Suspend any current transaction and start a new one
    RequiresNew,
    /// Suspend any current transaction and run without one
    NotSupported,
    /// Run without a transaction, failing if one exists
    Never,
    /// Run in a savepoint of the current transaction, or start one if none exists
    Nested,
}

impl Propagation {
    pub fn code(self) -> i32 {
        match self {
            Self::Required => 0,
            Self::Supports => 1,
            Self::Mandatory => 2,
            Self::RequiresNew => 3,
            Self::NotSupported => 4,
            Self::Never => 5,
            Self::Nested => 6,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => Self::Required,
            1 => Self::Supports,
            2 => Self::Mandatory,
            3 => Self::RequiresNew,
            4 => Self::NotSupported,
            5 => Self::Never,
            6 => Self::Nested,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Required => "PROPAGATION_REQUIRED",
            Self::Supports => "PROPAGATION_SUPPORTS",
            Self::Mandatory => "PROPAGATION_MANDATORY",
            Self::RequiresNew => "PROPAGATION_REQUIRES_NEW",
            Self::NotSupported => "PROPAGATION_NOT_SUPPORTED",
            Self::Never => "PROPAGATION_NEVER",
            Self::Nested => "PROPAGATION_NESTED",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation level requested for a new transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Isolation {
    /// Whatever the underlying resource uses
    #[default]
    Default,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Isolation {
    pub fn code(self) -> i32 {
        match self {
            Self::Default => -1,
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::Default,
            1 => Self::ReadUncommitted,
            2 => Self::ReadCommitted,
            4 => Self::RepeatableRead,
            8 => Self::Serializable,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "ISOLATION_DEFAULT",
            Self::ReadUncommitted => "ISOLATION_READ_UNCOMMITTED",
            Self::ReadCommitted => "ISOLATION_READ_COMMITTED",
            Self::RepeatableRead => "ISOLATION_REPEATABLE_READ",
            Self::Serializable => "ISOLATION_SERIALIZABLE",
        }
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Properties of a transaction requested from a transaction manager
pub trait TransactionDefinition: Send + Sync {
    fn propagation(&self) -> Propagation {
        Propagation::Required
    }

    fn isolation(&self) -> Isolation {
        Isolation::Default
    }

    /// Timeout in seconds, [`TIMEOUT_DEFAULT`] for the manager's default
    fn timeout(&self) -> i32 {
        TIMEOUT_DEFAULT
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// Short description used in log output and error messages
    fn describe(&self) -> String {
        let mut description = format!("{},{}", self.propagation(), self.isolation());
        if self.timeout() != TIMEOUT_DEFAULT {
            description.push_str(&format!(",timeout_{}", self.timeout()));
        }
        if self.is_read_only() {
            description.push_str(",readOnly");
        }
        description
    }
}

/// Plain settings-backed transaction definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultTransactionDefinition {
    pub propagation: Propagation,
    pub isolation: Isolation,
    pub timeout: i32,
    pub read_only: bool,
    pub name: Option<String>,
}

impl Default for DefaultTransactionDefinition {
    fn default() -> Self {
        Self {
            propagation: Propagation::Required,
            isolation: Isolation::Default,
            timeout: TIMEOUT_DEFAULT,
            read_only: false,
            name: None,
        }
    }
}

impl DefaultTransactionDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_propagation(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }

    /// Copy the settings of any definition
    pub fn from_definition(definition: &dyn TransactionDefinition) -> Self {
        Self {
            propagation: definition.propagation(),
            isolation: definition.isolation(),
            timeout: definition.timeout(),
            read_only: definition.is_read_only(),
            name: definition.name().map(str::to_string),
        }
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_timeout(mut self, seconds: i32) -> Result<Self, TransactionError> {
        if seconds < TIMEOUT_DEFAULT {
            return Err(TransactionError::InvalidTimeout { timeout: seconds });
        }
        self.timeout = seconds;
        Ok(self)
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl TransactionDefinition for DefaultTransactionDefinition {
    fn propagation(&self) -> Propagation {
        self.propagation
    }

    fn isolation(&self) -> Isolation {
        self.isolation
    }

    fn timeout(&self) -> i32 {
        self.timeout
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for DefaultTransactionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for code in 0..7 {
            assert_eq!(Propagation::from_code(code).unwrap().code(), code);
        }
        assert_eq!(Propagation::from_code(7), None);
        assert_eq!(Isolation::from_code(4), Some(Isolation::RepeatableRead));
        assert_eq!(Isolation::from_code(3), None);
    }

    #[test]
    fn test_defaults_and_description() {
        let definition = DefaultTransactionDefinition::new();
        assert_eq!(definition.timeout, TIMEOUT_DEFAULT);
        assert_eq!(definition.to_string(), "PROPAGATION_REQUIRED,ISOLATION_DEFAULT");

        let definition = DefaultTransactionDefinition::for_propagation(Propagation::RequiresNew)
            .with_isolation(Isolation::Serializable)
            .with_timeout(30)
            .unwrap()
            .with_read_only(true);
        assert_eq!(
            definition.describe(),
            "PROPAGATION_REQUIRES_NEW,ISOLATION_SERIALIZABLE,timeout_30,readOnly"
        );
    }

    #[test]
    fn test_timeout_below_default_is_rejected() {
        let err = DefaultTransactionDefinition::new().with_timeout(-2).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidTimeout { timeout: -2 }));
    }

    #[test]
    fn test_definition_deserializes_from_yaml() {
        let definition: DefaultTransactionDefinition =
            serde_yaml::from_str("propagation: NESTED\nread_only: true\nname: audit\n").unwrap();
        assert_eq!(definition.propagation, Propagation::Nested);
        assert_eq!(definition.isolation, Isolation::Default);
        assert!(definition.read_only);
        assert_eq!(TransactionDefinition::name(&definition), Some("audit"));
    }
}
