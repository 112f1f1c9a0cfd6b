//! Per-thread transaction synchronization state.
//!
//! Resource-management code binds its resources (sessions, connections) to
//! the current thread here, keyed by the id of the resource factory, and
//! registers [`TransactionSynchronization`] callbacks that run around the
//! completion of the current transaction. The transaction manager
//! initializes the callback set when a transaction begins and clears it when
//! the transaction completes; everything here is thread-confined.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::error;
use trellis_aop::LOWEST_PRECEDENCE;
use trellis_core::InvocationError;
use uuid::Uuid;

use crate::definition::Isolation;
use crate::error::TransactionError;

/// Outcome reported to `after_completion` callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// Heuristic outcome or failure during completion
    Unknown,
}

/// Callbacks around the completion of the current transaction.
///
/// `before_commit` and `after_commit` errors propagate to the committing
/// caller. `before_completion` and `after_completion` errors are logged and
/// ignored.
pub trait TransactionSynchronization: Send + Sync {
    /// Callbacks run in ascending order
    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }

    /// The transaction is being suspended; unbind resources from the thread
    fn suspend(&self) {}

    /// The transaction is being resumed; rebind resources to the thread
    fn resume(&self) {}

    fn flush(&self) {}

    fn before_commit(&self, _read_only: bool) -> Result<(), InvocationError> {
        Ok(())
    }

    fn before_completion(&self) -> Result<(), InvocationError> {
        Ok(())
    }

    fn after_commit(&self) -> Result<(), InvocationError> {
        Ok(())
    }

    fn after_completion(&self, _status: CompletionStatus) -> Result<(), InvocationError> {
        Ok(())
    }
}

type Resource = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct SynchronizationState {
    resources: HashMap<Uuid, Resource>,
    synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    name: Option<String>,
    read_only: bool,
    isolation: Option<Isolation>,
    actual_active: bool,
}

thread_local! {
    static STATE: RefCell<SynchronizationState> = RefCell::new(SynchronizationState::default());
}

fn with_state<R>(f: impl FnOnce(&mut SynchronizationState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Access to the synchronization state of the current thread
pub struct TransactionSynchronizationManager;

impl TransactionSynchronizationManager {
    pub fn has_resource(key: Uuid) -> bool {
        with_state(|state| state.resources.contains_key(&key))
    }

    pub fn get_resource(key: Uuid) -> Option<Resource> {
        with_state(|state| state.resources.get(&key).cloned())
    }

    /// Typed lookup; `None` when nothing or something of another type is bound
    pub fn get_resource_as<T: Any + Send + Sync>(key: Uuid) -> Option<Arc<T>> {
        Self::get_resource(key).and_then(|resource| resource.downcast::<T>().ok())
    }

    pub fn bind_resource(key: Uuid, value: Resource) -> Result<(), TransactionError> {
        with_state(|state| {
            if state.resources.contains_key(&key) {
                return Err(TransactionError::illegal_state(format!(
                    "Already value bound for key [{}] on thread",
                    key
                )));
            }
            state.resources.insert(key, value);
            Ok(())
        })
    }

    pub fn unbind_resource(key: Uuid) -> Result<Resource, TransactionError> {
        Self::unbind_resource_if_possible(key).ok_or_else(|| {
            TransactionError::illegal_state(format!("No value for key [{}] bound to thread", key))
        })
    }

    pub fn unbind_resource_if_possible(key: Uuid) -> Option<Resource> {
        with_state(|state| state.resources.remove(&key))
    }

    /// Keys of every resource bound to the current thread
    pub fn resource_keys() -> Vec<Uuid> {
        with_state(|state| state.resources.keys().copied().collect())
    }

    pub fn is_synchronization_active() -> bool {
        with_state(|state| state.synchronizations.is_some())
    }

    pub fn init_synchronization() -> Result<(), TransactionError> {
        with_state(|state| {
            if state.synchronizations.is_some() {
                return Err(TransactionError::illegal_state(
                    "Cannot activate transaction synchronization - already active",
                ));
            }
            state.synchronizations = Some(Vec::new());
            Ok(())
        })
    }

    pub fn register_synchronization(synchronization: Arc<dyn TransactionSynchronization>) -> Result<(), TransactionError> {
        with_state(|state| match state.synchronizations.as_mut() {
            Some(synchronizations) => {
                synchronizations.push(synchronization);
                Ok(())
            }
            None => Err(TransactionError::illegal_state("Transaction synchronization is not active")),
        })
    }

    /// Snapshot of the registered callbacks, sorted by order
    pub fn synchronizations() -> Result<Vec<Arc<dyn TransactionSynchronization>>, TransactionError> {
        let mut snapshot = with_state(|state| state.synchronizations.clone())
            .ok_or_else(|| TransactionError::illegal_state("Transaction synchronization is not active"))?;
        snapshot.sort_by_key(|synchronization| synchronization.order());
        Ok(snapshot)
    }

    pub fn clear_synchronization() -> Result<(), TransactionError> {
        with_state(|state| {
            if state.synchronizations.take().is_none() {
                return Err(TransactionError::illegal_state(
                    "Cannot deactivate transaction synchronization - not active",
                ));
            }
            Ok(())
        })
    }

    pub fn set_current_transaction_name(name: Option<String>) {
        with_state(|state| state.name = name);
    }

    pub fn current_transaction_name() -> Option<String> {
        with_state(|state| state.name.clone())
    }

    pub fn set_current_transaction_read_only(read_only: bool) {
        with_state(|state| state.read_only = read_only);
    }

    pub fn is_current_transaction_read_only() -> bool {
        with_state(|state| state.read_only)
    }

    pub fn set_current_transaction_isolation_level(isolation: Option<Isolation>) {
        with_state(|state| state.isolation = isolation);
    }

    pub fn current_transaction_isolation_level() -> Option<Isolation> {
        with_state(|state| state.isolation)
    }

    /// Whether a real transaction (not just synchronization) is active
    pub fn set_actual_transaction_active(active: bool) {
        with_state(|state| state.actual_active = active);
    }

    pub fn is_actual_transaction_active() -> bool {
        with_state(|state| state.actual_active)
    }

    /// Reset synchronization and the current transaction attributes.
    ///
    /// Bound resources are left alone; their owners unbind them.
    pub fn clear() {
        with_state(|state| {
            state.synchronizations = None;
            state.name = None;
            state.read_only = false;
            state.isolation = None;
            state.actual_active = false;
        });
    }
}

fn active_synchronizations() -> Vec<Arc<dyn TransactionSynchronization>> {
    TransactionSynchronizationManager::synchronizations().unwrap_or_default()
}

pub fn trigger_flush() {
    for synchronization in active_synchronizations() {
        synchronization.flush();
    }
}

pub fn trigger_before_commit(read_only: bool) -> Result<(), TransactionError> {
    for synchronization in active_synchronizations() {
        synchronization.before_commit(read_only)?;
    }
    Ok(())
}

pub fn trigger_before_completion() {
    for synchronization in active_synchronizations() {
        if let Err(err) = synchronization.before_completion() {
            error!("TransactionSynchronization.before_completion threw exception: {}", err);
        }
    }
}

pub fn trigger_after_commit() -> Result<(), TransactionError> {
    invoke_after_commit(&active_synchronizations())
}

pub fn invoke_after_commit(synchronizations: &[Arc<dyn TransactionSynchronization>]) -> Result<(), TransactionError> {
    for synchronization in synchronizations {
        synchronization.after_commit()?;
    }
    Ok(())
}

pub fn trigger_after_completion(status: CompletionStatus) {
    invoke_after_completion(&active_synchronizations(), status);
}

pub fn invoke_after_completion(synchronizations: &[Arc<dyn TransactionSynchronization>], status: CompletionStatus) {
    for synchronization in synchronizations {
        if let Err(err) = synchronization.after_completion(status) {
            error!("TransactionSynchronization.after_completion threw exception: {}", err);
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Unknown => "unknown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        order: i32,
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl TransactionSynchronization for Recording {
        fn order(&self) -> i32 {
            self.order
        }

        fn before_commit(&self, _read_only: bool) -> Result<(), InvocationError> {
            self.log.lock().push(format!("before_commit:{}", self.label));
            Ok(())
        }

        fn after_completion(&self, status: CompletionStatus) -> Result<(), InvocationError> {
            self.log.lock().push(format!("after_completion:{}:{}", self.label, status));
            Err(InvocationError::unchecked(TransactionError::system("ignored")))
        }
    }

    #[test]
    fn test_init_twice_fails_and_register_needs_active() {
        TransactionSynchronizationManager::clear();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sync = Arc::new(Recording {
            order: 0,
            label: "a",
            log,
        });
        assert!(TransactionSynchronizationManager::register_synchronization(sync.clone()).is_err());

        TransactionSynchronizationManager::init_synchronization().unwrap();
        assert!(TransactionSynchronizationManager::init_synchronization()
            .unwrap_err()
            .is_illegal_state());
        TransactionSynchronizationManager::register_synchronization(sync).unwrap();
        assert_eq!(TransactionSynchronizationManager::synchronizations().unwrap().len(), 1);

        TransactionSynchronizationManager::clear_synchronization().unwrap();
        assert!(!TransactionSynchronizationManager::is_synchronization_active());
        assert!(TransactionSynchronizationManager::clear_synchronization().is_err());
    }

    #[test]
    fn test_snapshot_is_sorted_and_after_completion_errors_are_swallowed() {
        TransactionSynchronizationManager::clear();
        let log = Arc::new(Mutex::new(Vec::new()));
        TransactionSynchronizationManager::init_synchronization().unwrap();
        for (order, label) in [(10, "late"), (-5, "early"), (10, "late2")] {
            TransactionSynchronizationManager::register_synchronization(Arc::new(Recording {
                order,
                label,
                log: log.clone(),
            }))
            .unwrap();
        }

        trigger_before_commit(false).unwrap();
        trigger_after_completion(CompletionStatus::Committed);
        TransactionSynchronizationManager::clear();

        assert_eq!(
            *log.lock(),
            vec![
                "before_commit:early",
                "before_commit:late",
                "before_commit:late2",
                "after_completion:early:committed",
                "after_completion:late:committed",
                "after_completion:late2:committed",
            ]
        );
    }

    #[test]
    fn test_resources_bind_once_per_key() {
        let key = Uuid::new_v4();
        TransactionSynchronizationManager::bind_resource(key, Arc::new(7u32)).unwrap();
        assert!(TransactionSynchronizationManager::bind_resource(key, Arc::new(8u32)).is_err());
        assert_eq!(
            TransactionSynchronizationManager::get_resource_as::<u32>(key).map(|value| *value),
            Some(7)
        );
        assert!(TransactionSynchronizationManager::get_resource_as::<String>(key).is_none());

        TransactionSynchronizationManager::unbind_resource(key).unwrap();
        assert!(!TransactionSynchronizationManager::has_resource(key));
        assert!(TransactionSynchronizationManager::unbind_resource(key).is_err());
    }

    #[test]
    fn test_state_is_thread_confined() {
        TransactionSynchronizationManager::set_current_transaction_name(Some("outer".into()));
        TransactionSynchronizationManager::set_actual_transaction_active(true);
        let seen = std::thread::spawn(|| {
            (
                TransactionSynchronizationManager::current_transaction_name(),
                TransactionSynchronizationManager::is_actual_transaction_active(),
            )
        })
        .join()
        .unwrap();
        assert_eq!(seen, (None, false));
        TransactionSynchronizationManager::clear();
        assert_eq!(TransactionSynchronizationManager::current_transaction_name(), None);
    }
}
