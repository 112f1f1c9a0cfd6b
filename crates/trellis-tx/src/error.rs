use std::error::Error as StdError;

use thiserror::Error;
use trellis_aop::AopError;
use trellis_core::{ConfigError, CoreError, InvocationError};

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// Errors raised by transaction managers, synchronizations and the
/// declarative transaction support
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Misuse of the transaction API, e.g. completing a status twice
    #[error("{message}")]
    IllegalTransactionState { message: String },

    #[error("{message}")]
    NestedTransactionNotSupported { message: String },

    #[error("{message}")]
    SuspensionNotSupported { message: String },

    /// The transaction was rolled back although commit was requested
    #[error("{message}")]
    UnexpectedRollback { message: String },

    #[error("Invalid transaction timeout: {timeout}")]
    InvalidTimeout { timeout: i32 },

    #[error("{message}")]
    CannotCreateTransaction {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Failure of the underlying resource while committing or rolling back
    #[error("{message}")]
    TransactionSystem {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("{message}")]
    TransactionUsage { message: String },

    #[error("{message}")]
    TimedOut { message: String },

    #[error("{message}")]
    ReadOnlyViolation { message: String },

    #[error("No transaction aspect-managed TransactionStatus in scope")]
    NoTransaction,

    /// Error raised by application code or a synchronization callback
    #[error("{0}")]
    Application(#[source] InvocationError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Aop(#[from] AopError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TransactionError {
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalTransactionState {
            message: message.into(),
        }
    }

    pub fn nested_not_supported(message: impl Into<String>) -> Self {
        Self::NestedTransactionNotSupported {
            message: message.into(),
        }
    }

    pub fn suspension_not_supported(message: impl Into<String>) -> Self {
        Self::SuspensionNotSupported {
            message: message.into(),
        }
    }

    pub fn unexpected_rollback(message: impl Into<String>) -> Self {
        Self::UnexpectedRollback {
            message: message.into(),
        }
    }

    pub fn cannot_create<E>(message: impl Into<String>, source: Option<E>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::CannotCreateTransaction {
            message: message.into(),
            source: source.map(|err| Box::new(err) as BoxedSource),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::TransactionSystem {
            message: message.into(),
            source: None,
        }
    }

    pub fn system_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::TransactionSystem {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::TransactionUsage {
            message: message.into(),
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut {
            message: message.into(),
        }
    }

    pub fn read_only_violation(message: impl Into<String>) -> Self {
        Self::ReadOnlyViolation {
            message: message.into(),
        }
    }

    pub fn application(error: InvocationError) -> Self {
        Self::Application(error)
    }

    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, Self::UnexpectedRollback { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalTransactionState { .. })
    }

    /// Whether the error came from application code rather than the
    /// transaction infrastructure
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application(_))
    }
}

impl From<InvocationError> for TransactionError {
    fn from(err: InvocationError) -> Self {
        Self::Application(err)
    }
}

impl From<TransactionError> for InvocationError {
    fn from(err: TransactionError) -> Self {
        match err {
            TransactionError::Application(inner) => inner,
            other => InvocationError::unchecked(other),
        }
    }
}
