use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::definition::{DefaultTransactionDefinition, Isolation, Propagation, TransactionDefinition};
use crate::error::TransactionError;
use crate::manager::PlatformTransactionManager;
use crate::status::TransactionStatus;

/// Runs closures inside transactions.
///
/// The closure's `Err` rolls the transaction back and is returned unchanged;
/// `Ok` commits. The closure may also call
/// [`TransactionStatus::set_rollback_only`] to roll back without failing.
///
/// ```ignore
/// let template = TransactionTemplate::new(manager).with_propagation(Propagation::RequiresNew);
/// let total = template.execute(|status| -> Result<i64, TransactionError> {
///     store.put("balance", "10")?;
///     Ok(10)
/// })?;
/// ```
#[derive(Clone)]
pub struct TransactionTemplate {
    manager: Arc<dyn PlatformTransactionManager>,
    definition: DefaultTransactionDefinition,
}

impl TransactionTemplate {
    pub fn new(manager: Arc<dyn PlatformTransactionManager>) -> Self {
        Self {
            manager,
            definition: DefaultTransactionDefinition::default(),
        }
    }

    pub fn with_definition(manager: Arc<dyn PlatformTransactionManager>, definition: DefaultTransactionDefinition) -> Self {
        Self { manager, definition }
    }

    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.definition = self.definition.with_propagation(propagation);
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.definition = self.definition.with_isolation(isolation);
        self
    }

    pub fn with_timeout(mut self, seconds: i32) -> Result<Self, TransactionError> {
        self.definition = self.definition.with_timeout(seconds)?;
        Ok(self)
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.definition = self.definition.with_read_only(read_only);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.definition = self.definition.with_name(name);
        self
    }

    pub fn definition(&self) -> &DefaultTransactionDefinition {
        &self.definition
    }

    pub fn transaction_manager(&self) -> &Arc<dyn PlatformTransactionManager> {
        &self.manager
    }

    pub fn execute<T, E, F>(&self, action: F) -> Result<T, E>
    where
        F: FnOnce(&TransactionStatus) -> Result<T, E>,
        E: From<TransactionError> + fmt::Display,
    {
        let status = self.manager.get_transaction(&self.definition)?;
        match action(&status) {
            Ok(value) => {
                self.manager.commit(&status)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_error) = self.manager.rollback(&status) {
                    error!("Application exception overridden by rollback exception: {}", err);
                    return Err(rollback_error.into());
                }
                Err(err)
            }
        }
    }

    /// Run `action` for its side effects only
    pub fn execute_without_result<F>(&self, action: F) -> Result<(), TransactionError>
    where
        F: FnOnce(&TransactionStatus) -> Result<(), TransactionError>,
    {
        self.execute(action)
    }
}

impl TransactionDefinition for TransactionTemplate {
    fn propagation(&self) -> Propagation {
        self.definition.propagation
    }

    fn isolation(&self) -> Isolation {
        self.definition.isolation
    }

    fn timeout(&self) -> i32 {
        self.definition.timeout
    }

    fn is_read_only(&self) -> bool {
        self.definition.read_only
    }

    fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }
}

impl fmt::Debug for TransactionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionTemplate")
            .field("definition", &self.definition.describe())
            .finish_non_exhaustive()
    }
}
