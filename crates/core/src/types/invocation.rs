use std::error::Error;
use std::fmt;
use std::sync::Arc;

use super::instance::Instance;
use crate::errors::CoreError;

/// Result of invoking a method: `None` for void methods
pub type InvocationResult = Result<Option<Instance>, InvocationError>;

/// Whether a raised error is part of the method's declared contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Declared, recoverable application error
    Checked,
    /// Unexpected failure; rolls back transactions by default
    Unchecked,
}

/// Error raised by a method body or by an interceptor
#[derive(Clone)]
pub struct InvocationError {
    kind: ErrorKind,
    error: Arc<dyn Error + Send + Sync>,
    type_name: &'static str,
}

impl InvocationError {
    pub fn checked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::Checked,
            error: Arc::new(error),
            type_name: std::any::type_name::<E>(),
        }
    }

    pub fn unchecked<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            kind: ErrorKind::Unchecked,
            error: Arc::new(error),
            type_name: std::any::type_name::<E>(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_checked(&self) -> bool {
        self.kind == ErrorKind::Checked
    }

    pub fn is_unchecked(&self) -> bool {
        self.kind == ErrorKind::Unchecked
    }

    /// Fully qualified Rust type name of the wrapped error
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn error(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.error.as_ref().downcast_ref::<E>()
    }

    pub fn is<E: Error + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }
}

impl fmt::Debug for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationError")
            .field("kind", &self.kind)
            .field("type", &self.type_name)
            .field("error", &self.error.to_string())
            .finish()
    }
}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl Error for InvocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.error.as_ref())
    }
}

impl From<CoreError> for InvocationError {
    fn from(err: CoreError) -> Self {
        InvocationError::unchecked(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("insufficient funds: {0}")]
    struct InsufficientFunds(i64);

    #[test]
    fn test_checked_and_unchecked_wrapping() {
        let checked = InvocationError::checked(InsufficientFunds(10));
        assert!(checked.is_checked());
        assert_eq!(checked.to_string(), "insufficient funds: 10");
        assert_eq!(checked.downcast_ref::<InsufficientFunds>().unwrap().0, 10);
        assert!(checked.type_name().ends_with("InsufficientFunds"));

        let unchecked: InvocationError = CoreError::illegal_state("boom").into();
        assert!(unchecked.is_unchecked());
        assert!(unchecked.is::<CoreError>());
    }
}
