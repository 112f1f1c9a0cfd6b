//! Status handles for running transactions.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::TransactionError;
use crate::suspended::SuspendedResourcesHolder;

/// Marker for a point inside a transaction that can be rolled back to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    id: Uuid,
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Manager-specific transaction object carried by a status.
///
/// Backends that can detect a rollback-only mark on the shared resource
/// report it through [`is_rollback_only`](Self::is_rollback_only), which makes
/// the mark visible to every participant. Savepoint support is optional.
pub trait TransactionObject: Any + Send + Sync {
    /// Whether the shared resource has been marked rollback-only
    fn is_rollback_only(&self) -> bool {
        false
    }

    fn flush(&self) -> Result<(), TransactionError> {
        Ok(())
    }

    fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
        Err(TransactionError::nested_not_supported(
            "Transaction object does not support savepoints",
        ))
    }

    fn rollback_to_savepoint(&self, _savepoint: &Savepoint) -> Result<(), TransactionError> {
        Err(TransactionError::nested_not_supported(
            "Transaction object does not support savepoints",
        ))
    }

    fn release_savepoint(&self, _savepoint: &Savepoint) -> Result<(), TransactionError> {
        Err(TransactionError::nested_not_supported(
            "Transaction object does not support savepoints",
        ))
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Default)]
struct StatusState {
    rollback_only: bool,
    completed: bool,
    savepoint: Option<Savepoint>,
    suspended: Option<SuspendedResourcesHolder>,
}

struct StatusInner {
    id: Uuid,
    name: Option<String>,
    transaction: Option<Arc<dyn TransactionObject>>,
    new_transaction: bool,
    new_synchronization: bool,
    nested: bool,
    read_only: bool,
    state: Mutex<StatusState>,
}

/// Handle on one `get_transaction` call.
///
/// Cloning shares the handle. A status is completed exactly once, by
/// passing it to `commit` or `rollback` on the manager that created it.
#[derive(Clone)]
pub struct TransactionStatus {
    inner: Arc<StatusInner>,
}

pub(crate) struct StatusSettings {
    pub(crate) name: Option<String>,
    pub(crate) transaction: Option<Arc<dyn TransactionObject>>,
    pub(crate) new_transaction: bool,
    pub(crate) new_synchronization: bool,
    pub(crate) nested: bool,
    pub(crate) read_only: bool,
    pub(crate) suspended: Option<SuspendedResourcesHolder>,
}

impl TransactionStatus {
    pub(crate) fn new(settings: StatusSettings) -> Self {
        Self {
            inner: Arc::new(StatusInner {
                id: Uuid::new_v4(),
                name: settings.name,
                transaction: settings.transaction,
                new_transaction: settings.new_transaction,
                new_synchronization: settings.new_synchronization,
                nested: settings.nested,
                read_only: settings.read_only,
                state: Mutex::new(StatusState {
                    suspended: settings.suspended,
                    ..StatusState::default()
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Whether a real transaction backs this status
    pub fn has_transaction(&self) -> bool {
        self.inner.transaction.is_some()
    }

    pub fn transaction(&self) -> Option<&Arc<dyn TransactionObject>> {
        self.inner.transaction.as_ref()
    }

    /// Whether this status started the transaction rather than joining one
    pub fn is_new_transaction(&self) -> bool {
        self.inner.transaction.is_some() && self.inner.new_transaction
    }

    pub fn is_new_synchronization(&self) -> bool {
        self.inner.new_synchronization
    }

    pub fn is_nested(&self) -> bool {
        self.inner.nested
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    /// Mark the transaction so that the only possible outcome is a rollback
    pub fn set_rollback_only(&self) {
        self.inner.state.lock().rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }

    /// Rollback-only mark set on this status itself
    pub fn is_local_rollback_only(&self) -> bool {
        self.inner.state.lock().rollback_only
    }

    /// Rollback-only mark set on the shared transaction by any participant
    pub fn is_global_rollback_only(&self) -> bool {
        self.inner
            .transaction
            .as_ref()
            .map(|transaction| transaction.is_rollback_only())
            .unwrap_or(false)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().completed
    }

    pub(crate) fn set_completed(&self) {
        self.inner.state.lock().completed = true;
    }

    pub fn flush(&self) -> Result<(), TransactionError> {
        match &self.inner.transaction {
            Some(transaction) => transaction.flush(),
            None => Ok(()),
        }
    }

    pub fn has_savepoint(&self) -> bool {
        self.inner.state.lock().savepoint.is_some()
    }

    fn savepoint_target(&self) -> Result<&Arc<dyn TransactionObject>, TransactionError> {
        self.inner.transaction.as_ref().ok_or_else(|| {
            TransactionError::nested_not_supported("Transaction status has no transaction object to hold savepoints")
        })
    }

    pub fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
        self.savepoint_target()?.create_savepoint()
    }

    pub fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        self.savepoint_target()?.rollback_to_savepoint(savepoint)
    }

    pub fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        self.savepoint_target()?.release_savepoint(savepoint)
    }

    pub(crate) fn create_and_hold_savepoint(&self) -> Result<(), TransactionError> {
        let savepoint = self.create_savepoint()?;
        self.inner.state.lock().savepoint = Some(savepoint);
        Ok(())
    }

    pub(crate) fn rollback_to_held_savepoint(&self) -> Result<(), TransactionError> {
        let savepoint = self.inner.state.lock().savepoint.clone().ok_or_else(|| {
            TransactionError::usage("Cannot roll back to savepoint - no savepoint associated with current transaction")
        })?;
        self.rollback_to_savepoint(&savepoint)?;
        self.release_savepoint(&savepoint)?;
        self.inner.state.lock().savepoint = None;
        Ok(())
    }

    pub(crate) fn release_held_savepoint(&self) -> Result<(), TransactionError> {
        let savepoint = self.inner.state.lock().savepoint.clone().ok_or_else(|| {
            TransactionError::usage("Cannot release savepoint - no savepoint associated with current transaction")
        })?;
        self.release_savepoint(&savepoint)?;
        self.inner.state.lock().savepoint = None;
        Ok(())
    }

    pub fn has_suspended_resources(&self) -> bool {
        self.inner.state.lock().suspended.is_some()
    }

    pub(crate) fn take_suspended_resources(&self) -> Option<SuspendedResourcesHolder> {
        self.inner.state.lock().suspended.take()
    }

    pub fn ptr_eq(&self, other: &TransactionStatus) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("TransactionStatus")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("has_transaction", &self.inner.transaction.is_some())
            .field("new_transaction", &self.inner.new_transaction)
            .field("nested", &self.inner.nested)
            .field("rollback_only", &state.rollback_only)
            .field("completed", &state.completed)
            .field("savepoint", &state.savepoint)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagTransaction {
        rollback_only: AtomicBool,
        savepoints: Mutex<Vec<String>>,
    }

    impl TransactionObject for FlagTransaction {
        fn is_rollback_only(&self) -> bool {
            self.rollback_only.load(Ordering::SeqCst)
        }

        fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
            let mut savepoints = self.savepoints.lock();
            let savepoint = Savepoint::new(format!("SAVEPOINT_{}", savepoints.len() + 1));
            savepoints.push(savepoint.name().to_string());
            Ok(savepoint)
        }

        fn rollback_to_savepoint(&self, _savepoint: &Savepoint) -> Result<(), TransactionError> {
            Ok(())
        }

        fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
            self.savepoints.lock().retain(|name| name != savepoint.name());
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn status_for(transaction: Option<Arc<dyn TransactionObject>>) -> TransactionStatus {
        TransactionStatus::new(StatusSettings {
            name: Some("test".into()),
            transaction,
            new_transaction: true,
            new_synchronization: false,
            nested: false,
            read_only: false,
            suspended: None,
        })
    }

    #[test]
    fn test_local_and_global_rollback_only() {
        let transaction = Arc::new(FlagTransaction::default());
        let status = status_for(Some(transaction.clone()));
        assert!(!status.is_rollback_only());

        transaction.rollback_only.store(true, Ordering::SeqCst);
        assert!(status.is_global_rollback_only());
        assert!(!status.is_local_rollback_only());
        assert!(status.is_rollback_only());

        let other = status_for(None);
        other.set_rollback_only();
        assert!(other.is_local_rollback_only());
        assert!(!other.is_global_rollback_only());
        assert!(!other.is_new_transaction());
    }

    #[test]
    fn test_held_savepoint_lifecycle() {
        let transaction = Arc::new(FlagTransaction::default());
        let status = status_for(Some(transaction.clone()));
        status.create_and_hold_savepoint().unwrap();
        assert!(status.has_savepoint());
        assert_eq!(transaction.savepoints.lock().len(), 1);

        status.rollback_to_held_savepoint().unwrap();
        assert!(!status.has_savepoint());
        assert!(transaction.savepoints.lock().is_empty());
        assert!(status.release_held_savepoint().is_err());
    }

    #[test]
    fn test_savepoints_need_a_transaction() {
        let status = status_for(None);
        assert!(matches!(
            status.create_savepoint(),
            Err(TransactionError::NestedTransactionNotSupported { .. })
        ));
    }
}
