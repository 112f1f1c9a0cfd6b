//! Integration tests for propagation behavior
//!
//! Runs the propagation rules against the in-memory store: joining,
//! suspension, savepoint nesting, rollback-only marks and the
//! synchronization callback sequence.

use parking_lot::Mutex;
use std::sync::Arc;

use trellis_core::InvocationError;
use trellis_tx::{
    CompletionStatus, DefaultTransactionDefinition, Isolation, MemoryStore, MemoryStoreBackend,
    MemoryStoreTransactionManager, PlatformTransactionManager, Propagation, TransactionError,
    TransactionExecutionListener, TransactionManagerConfig, TransactionStatus, TransactionSynchronization,
    TransactionSynchronizationManager as Tsm,
};

fn setup() -> (Arc<MemoryStore>, MemoryStoreTransactionManager) {
    let store = MemoryStore::new("orders");
    let manager = MemoryStoreTransactionManager::for_store(store.clone());
    (store, manager)
}

fn definition(propagation: Propagation) -> DefaultTransactionDefinition {
    DefaultTransactionDefinition::for_propagation(propagation)
}

struct RecordingSynchronization {
    label: &'static str,
    order: i32,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingSynchronization {
    fn register(label: &'static str, order: i32, log: &Arc<Mutex<Vec<String>>>) {
        Tsm::register_synchronization(Arc::new(Self {
            label,
            order,
            log: log.clone(),
        }))
        .unwrap();
    }

    fn record(&self, event: impl Into<String>) {
        self.log.lock().push(format!("{}:{}", self.label, event.into()));
    }
}

impl TransactionSynchronization for RecordingSynchronization {
    fn order(&self) -> i32 {
        self.order
    }

    fn suspend(&self) {
        self.record("suspend");
    }

    fn resume(&self) {
        self.record("resume");
    }

    fn before_commit(&self, read_only: bool) -> Result<(), InvocationError> {
        self.record(format!("before_commit({})", read_only));
        Ok(())
    }

    fn before_completion(&self) -> Result<(), InvocationError> {
        self.record("before_completion");
        Ok(())
    }

    fn after_commit(&self) -> Result<(), InvocationError> {
        self.record("after_commit");
        Ok(())
    }

    fn after_completion(&self, status: CompletionStatus) -> Result<(), InvocationError> {
        self.record(format!("after_completion({})", status));
        Ok(())
    }
}

#[derive(Default)]
struct BoundaryListener {
    events: Mutex<Vec<String>>,
}

impl TransactionExecutionListener for BoundaryListener {
    fn after_begin(&self, status: &TransactionStatus, error: Option<&TransactionError>) {
        self.events
            .lock()
            .push(format!("begin:{}:{}", status.name().unwrap_or("-"), error.is_none()));
    }

    fn after_commit(&self, status: &TransactionStatus, error: Option<&TransactionError>) {
        self.events
            .lock()
            .push(format!("commit:{}:{}", status.name().unwrap_or("-"), error.is_none()));
    }

    fn after_rollback(&self, status: &TransactionStatus, error: Option<&TransactionError>) {
        self.events
            .lock()
            .push(format!("rollback:{}:{}", status.name().unwrap_or("-"), error.is_none()));
    }
}

#[test]
fn test_required_joins_existing_transaction() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    assert!(outer.is_new_transaction());
    assert!(Tsm::is_actual_transaction_active());

    let inner = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    assert!(inner.has_transaction());
    assert!(!inner.is_new_transaction());
    assert!(!inner.is_new_synchronization());

    store.put("order-1", "pending").unwrap();
    manager.commit(&inner).unwrap();
    assert!(store.committed().is_empty());

    manager.commit(&outer).unwrap();
    assert_eq!(store.committed().get("order-1").map(String::as_str), Some("pending"));
    assert!(!Tsm::is_synchronization_active());
    assert!(!Tsm::is_actual_transaction_active());
}

#[test]
fn test_supports_without_transaction_runs_non_transactionally() {
    let (store, manager) = setup();
    let status = manager.get_transaction(&definition(Propagation::Supports)).unwrap();
    assert!(!status.has_transaction());
    assert!(status.is_new_synchronization());
    assert!(Tsm::is_synchronization_active());
    assert!(!Tsm::is_actual_transaction_active());

    store.put("k", "v").unwrap();
    assert_eq!(store.committed().len(), 1);
    manager.commit(&status).unwrap();
    assert!(!Tsm::is_synchronization_active());
}

#[test]
fn test_supports_joins_existing_transaction() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    let inner = manager.get_transaction(&definition(Propagation::Supports)).unwrap();
    assert!(inner.has_transaction());
    assert!(!inner.is_new_transaction());

    store.put("joined", "1").unwrap();
    manager.commit(&inner).unwrap();
    assert!(store.committed().is_empty());
    manager.commit(&outer).unwrap();
    assert!(store.committed().contains_key("joined"));
}

#[test]
fn test_mandatory_requires_existing_transaction() {
    let (_, manager) = setup();
    let err = manager.get_transaction(&definition(Propagation::Mandatory)).unwrap_err();
    assert!(err.is_illegal_state());

    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    let inner = manager.get_transaction(&definition(Propagation::Mandatory)).unwrap();
    assert!(inner.has_transaction());
    manager.commit(&inner).unwrap();
    manager.commit(&outer).unwrap();
}

#[test]
fn test_never_rejects_existing_transaction() {
    let (_, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    let err = manager.get_transaction(&definition(Propagation::Never)).unwrap_err();
    assert!(err.is_illegal_state());
    manager.rollback(&outer).unwrap();

    let standalone = manager.get_transaction(&definition(Propagation::Never)).unwrap();
    assert!(!standalone.has_transaction());
    manager.commit(&standalone).unwrap();
}

#[test]
fn test_requires_new_suspends_and_restores_outer_state() {
    let (store, manager) = setup();
    let outer_definition = definition(Propagation::Required)
        .with_name("outer")
        .with_isolation(Isolation::Serializable);
    let outer = manager.get_transaction(&outer_definition).unwrap();
    store.put("outer-key", "1").unwrap();

    let inner_definition = definition(Propagation::RequiresNew).with_name("inner").with_read_only(true);
    let inner = manager.get_transaction(&inner_definition).unwrap();
    assert!(inner.is_new_transaction());
    assert!(inner.has_suspended_resources());
    assert_eq!(Tsm::current_transaction_name().as_deref(), Some("inner"));
    assert!(Tsm::is_current_transaction_read_only());
    assert_eq!(Tsm::current_transaction_isolation_level(), None);
    // the outer session is not visible to the inner transaction
    assert_eq!(store.get("outer-key").unwrap(), None);
    manager.commit(&inner).unwrap();

    assert_eq!(Tsm::current_transaction_name().as_deref(), Some("outer"));
    assert!(!Tsm::is_current_transaction_read_only());
    assert_eq!(Tsm::current_transaction_isolation_level(), Some(Isolation::Serializable));
    assert!(Tsm::is_actual_transaction_active());
    assert_eq!(store.get("outer-key").unwrap().as_deref(), Some("1"));

    manager.commit(&outer).unwrap();
    assert_eq!(store.committed().get("outer-key").map(String::as_str), Some("1"));
}

#[test]
fn test_requires_new_without_outer_starts_plain_transaction() {
    let (store, manager) = setup();
    let status = manager.get_transaction(&definition(Propagation::RequiresNew)).unwrap();
    assert!(status.is_new_transaction());
    assert!(status.is_new_synchronization());
    assert!(!status.has_suspended_resources());
    assert!(Tsm::is_actual_transaction_active());

    store.put("fresh", "1").unwrap();
    assert!(store.committed().is_empty());
    manager.commit(&status).unwrap();
    assert!(store.committed().contains_key("fresh"));
}

#[test]
fn test_requires_new_commit_survives_outer_rollback() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    store.put("draft", "x").unwrap();

    let audit = manager.get_transaction(&definition(Propagation::RequiresNew)).unwrap();
    store.put("audit", "attempted").unwrap();
    manager.commit(&audit).unwrap();

    manager.rollback(&outer).unwrap();
    let committed = store.committed();
    assert_eq!(committed.get("audit").map(String::as_str), Some("attempted"));
    assert!(!committed.contains_key("draft"));
}

#[test]
fn test_not_supported_suspends_transaction() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    store.put("in-tx", "1").unwrap();

    let plain = manager.get_transaction(&definition(Propagation::NotSupported)).unwrap();
    assert!(!plain.has_transaction());
    assert!(plain.has_suspended_resources());
    assert!(!Tsm::is_actual_transaction_active());
    store.put("immediate", "1").unwrap();
    assert!(store.committed().contains_key("immediate"));
    manager.commit(&plain).unwrap();

    assert!(Tsm::is_actual_transaction_active());
    manager.rollback(&outer).unwrap();
    let committed = store.committed();
    assert!(committed.contains_key("immediate"));
    assert!(!committed.contains_key("in-tx"));
}

#[test]
fn test_not_supported_without_outer_gives_empty_status() {
    let (store, manager) = setup();
    let status = manager.get_transaction(&definition(Propagation::NotSupported)).unwrap();
    assert!(!status.has_transaction());
    assert!(!status.is_new_transaction());
    assert!(!status.has_suspended_resources());
    assert!(status.is_new_synchronization());
    assert!(!Tsm::is_actual_transaction_active());

    store.put("direct", "1").unwrap();
    assert!(store.committed().contains_key("direct"));
    manager.commit(&status).unwrap();
    assert!(!Tsm::is_synchronization_active());
}

fn validating_manager(store: &Arc<MemoryStore>) -> MemoryStoreTransactionManager {
    let config = TransactionManagerConfig {
        validate_existing_transaction: true,
        ..TransactionManagerConfig::with_savepoints()
    };
    MemoryStoreTransactionManager::with_config(MemoryStoreBackend::new(store.clone()), config).unwrap()
}

#[test]
fn test_validation_rejects_incompatible_isolation() {
    let store = MemoryStore::new("ledger");
    let manager = validating_manager(&store);
    let outer = manager
        .get_transaction(&definition(Propagation::Required).with_isolation(Isolation::Serializable))
        .unwrap();

    let same = manager
        .get_transaction(&definition(Propagation::Required).with_isolation(Isolation::Serializable))
        .unwrap();
    manager.commit(&same).unwrap();

    let err = manager
        .get_transaction(&definition(Propagation::Required).with_isolation(Isolation::ReadCommitted))
        .unwrap_err();
    assert!(err.is_illegal_state());
    assert!(err.to_string().contains("isolation level"));

    manager.rollback(&outer).unwrap();
}

#[test]
fn test_validation_rejects_writer_joining_read_only_transaction() {
    let store = MemoryStore::new("ledger");
    let manager = validating_manager(&store);
    let outer = manager
        .get_transaction(&definition(Propagation::Required).with_read_only(true))
        .unwrap();

    let reader = manager
        .get_transaction(&definition(Propagation::Supports).with_read_only(true))
        .unwrap();
    manager.commit(&reader).unwrap();

    let err = manager.get_transaction(&definition(Propagation::Required)).unwrap_err();
    assert!(err.is_illegal_state());
    assert!(err.to_string().contains("read-only"));

    manager.rollback(&outer).unwrap();
}

#[test]
fn test_nested_rollback_returns_to_savepoint() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    store.put("kept", "1").unwrap();

    let nested = manager.get_transaction(&definition(Propagation::Nested)).unwrap();
    assert!(nested.is_nested());
    assert!(nested.has_savepoint());
    assert!(!nested.is_new_transaction());
    store.put("discarded", "1").unwrap();
    manager.rollback(&nested).unwrap();

    assert_eq!(store.get("discarded").unwrap(), None);
    assert!(!outer.is_global_rollback_only());
    manager.commit(&outer).unwrap();
    assert_eq!(store.committed().keys().cloned().collect::<Vec<_>>(), vec!["kept".to_string()]);
}

#[test]
fn test_nested_commit_releases_savepoint() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    let nested = manager.get_transaction(&definition(Propagation::Nested)).unwrap();
    store.put("child", "1").unwrap();
    manager.commit(&nested).unwrap();
    assert!(!nested.has_savepoint());
    assert!(store.committed().is_empty());

    manager.commit(&outer).unwrap();
    assert!(store.committed().contains_key("child"));
}

#[test]
fn test_nested_without_outer_starts_new_transaction() {
    let (store, manager) = setup();
    let status = manager.get_transaction(&definition(Propagation::Nested)).unwrap();
    assert!(status.is_new_transaction());
    assert!(!status.has_savepoint());
    store.put("solo", "1").unwrap();
    manager.commit(&status).unwrap();
    assert!(store.committed().contains_key("solo"));
}

#[test]
fn test_inner_rollback_marks_outer_for_unexpected_rollback() {
    let (store, manager) = setup();
    let listener = Arc::new(BoundaryListener::default());
    manager.add_listener(listener.clone());

    let outer = manager
        .get_transaction(&definition(Propagation::Required).with_name("checkout"))
        .unwrap();
    store.put("cart", "3 items").unwrap();

    let inner = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    manager.rollback(&inner).unwrap();
    assert!(outer.is_global_rollback_only());
    assert!(!outer.is_local_rollback_only());

    let err = manager.commit(&outer).unwrap_err();
    assert!(err.is_unexpected_rollback());
    assert!(store.committed().is_empty());
    assert!(outer.is_completed());
    assert_eq!(
        *listener.events.lock(),
        vec!["begin:checkout:true".to_string(), "rollback:checkout:true".to_string()]
    );
}

#[test]
fn test_participant_marked_rollback_only_in_nested_scope_keeps_outer_clean() {
    let (store, manager) = setup();
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    let nested = manager.get_transaction(&definition(Propagation::Nested)).unwrap();
    let participant = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    store.put("temp", "1").unwrap();
    manager.rollback(&participant).unwrap();
    manager.rollback(&nested).unwrap();

    assert!(!outer.is_global_rollback_only());
    manager.commit(&outer).unwrap();
    assert!(store.committed().is_empty());
}

#[test]
fn test_completed_status_cannot_complete_again() {
    let (_, manager) = setup();
    let status = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    manager.commit(&status).unwrap();
    assert!(manager.commit(&status).unwrap_err().is_illegal_state());
    assert!(manager.rollback(&status).unwrap_err().is_illegal_state());
}

#[test]
fn test_synchronization_callbacks_on_commit() {
    let (store, manager) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let status = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    RecordingSynchronization::register("late", 10, &log);
    RecordingSynchronization::register("early", 1, &log);
    store.put("k", "v").unwrap();
    manager.commit(&status).unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "early:before_commit(false)",
            "late:before_commit(false)",
            "early:before_completion",
            "late:before_completion",
            "early:after_commit",
            "late:after_commit",
            "early:after_completion(committed)",
            "late:after_completion(committed)",
        ]
    );
}

#[test]
fn test_synchronization_callbacks_on_rollback() {
    let (_, manager) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let status = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    RecordingSynchronization::register("sync", 0, &log);
    manager.rollback(&status).unwrap();

    assert_eq!(*log.lock(), vec!["sync:before_completion", "sync:after_completion(rolled back)"]);
}

#[test]
fn test_synchronizations_suspend_with_their_transaction() {
    let (_, manager) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let outer = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    RecordingSynchronization::register("outer", 0, &log);

    let inner = manager.get_transaction(&definition(Propagation::RequiresNew)).unwrap();
    RecordingSynchronization::register("inner", 0, &log);
    manager.commit(&inner).unwrap();
    manager.commit(&outer).unwrap();

    let log = log.lock();
    assert_eq!(log[0], "outer:suspend");
    assert!(log.contains(&"inner:after_completion(committed)".to_string()));
    let resume_at = log.iter().position(|event| event == "outer:resume").unwrap();
    let inner_done = log
        .iter()
        .position(|event| event == "inner:after_completion(committed)")
        .unwrap();
    assert!(resume_at > inner_done);
    assert_eq!(log.last().map(String::as_str), Some("outer:after_completion(committed)"));
}

#[test]
fn test_read_only_reaches_before_commit() {
    let (_, manager) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let status = manager
        .get_transaction(&definition(Propagation::Required).with_read_only(true))
        .unwrap();
    RecordingSynchronization::register("sync", 0, &log);
    manager.commit(&status).unwrap();
    assert_eq!(log.lock()[0], "sync:before_commit(true)");
}

struct LateRegistration {
    log: Arc<Mutex<Vec<String>>>,
}

impl TransactionSynchronization for LateRegistration {
    fn after_completion(&self, status: CompletionStatus) -> Result<(), InvocationError> {
        let registered = Tsm::register_synchronization(Arc::new(RecordingSynchronization {
            label: "late",
            order: 0,
            log: self.log.clone(),
        }));
        self.log
            .lock()
            .push(format!("after_completion({}):active={}", status, registered.is_ok()));
        Ok(())
    }
}

#[test]
fn test_synchronization_stays_active_during_after_completion() {
    let (_, manager) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));
    let status = manager.get_transaction(&definition(Propagation::Required)).unwrap();
    Tsm::register_synchronization(Arc::new(LateRegistration { log: log.clone() })).unwrap();
    manager.commit(&status).unwrap();

    assert_eq!(*log.lock(), vec!["after_completion(committed):active=true"]);
    assert!(!Tsm::is_synchronization_active());
}
