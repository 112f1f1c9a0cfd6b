//! Transactional in-memory key/value store.
//!
//! Work done inside a transaction goes to a session bound to the current
//! thread and only reaches the shared store on commit. Outside a transaction
//! every operation applies to the store immediately.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::config::TransactionManagerConfig;
use crate::definition::{Isolation, TransactionDefinition, TIMEOUT_DEFAULT};
use crate::error::TransactionError;
use crate::manager::{AbstractTransactionManager, TransactionBackend};
use crate::status::{Savepoint, TransactionObject, TransactionStatus};
use crate::synchronization::{self, TransactionSynchronizationManager as Tsm};

type Changes = BTreeMap<String, Option<String>>;

/// Shared key/value store taking part in transactions
pub struct MemoryStore {
    id: Uuid,
    name: String,
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            data: RwLock::new(BTreeMap::new()),
        })
    }

    /// Key under which sessions of this store are bound to a thread
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn bound_holder(&self) -> Option<Arc<SessionHolder>> {
        Tsm::get_resource_as::<SessionHolder>(self.id)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, TransactionError> {
        match self.bound_holder() {
            Some(holder) => {
                holder.check_deadline()?;
                Ok(match holder.session.changes.lock().get(key) {
                    Some(change) => change.clone(),
                    None => self.data.read().get(key).cloned(),
                })
            }
            None => Ok(self.data.read().get(key).cloned()),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) -> Result<Option<String>, TransactionError> {
        self.write(key.into(), Some(value.into()))
    }

    pub fn remove(&self, key: &str) -> Result<Option<String>, TransactionError> {
        self.write(key.to_string(), None)
    }

    fn write(&self, key: String, value: Option<String>) -> Result<Option<String>, TransactionError> {
        match self.bound_holder() {
            Some(holder) => {
                holder.check_deadline()?;
                holder.session.check_writable()?;
                let previous = self.get(&key)?;
                holder.session.changes.lock().insert(key, value);
                Ok(previous)
            }
            None => {
                let mut data = self.data.write();
                Ok(match value {
                    Some(value) => data.insert(key, value),
                    None => data.remove(&key),
                })
            }
        }
    }

    /// Keys visible to the current thread, in order
    pub fn keys(&self) -> Result<Vec<String>, TransactionError> {
        let mut visible: BTreeMap<String, bool> = self.data.read().keys().map(|key| (key.clone(), true)).collect();
        if let Some(holder) = self.bound_holder() {
            holder.check_deadline()?;
            for (key, change) in holder.session.changes.lock().iter() {
                visible.insert(key.clone(), change.is_some());
            }
        }
        Ok(visible.into_iter().filter(|(_, present)| *present).map(|(key, _)| key).collect())
    }

    /// Committed contents, ignoring any session bound to this thread
    pub fn committed(&self) -> BTreeMap<String, String> {
        self.data.read().clone()
    }

    fn apply(&self, changes: Changes) {
        let mut data = self.data.write();
        for (key, change) in changes {
            match change {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("entries", &self.data.read().len())
            .finish()
    }
}

/// Pending changes of one transaction
pub struct MemorySession {
    id: Uuid,
    changes: Mutex<Changes>,
    savepoints: Mutex<Vec<(Savepoint, Changes)>>,
    read_only: AtomicBool,
    isolation: Mutex<Option<Isolation>>,
}

impl MemorySession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            changes: Mutex::new(Changes::new()),
            savepoints: Mutex::new(Vec::new()),
            read_only: AtomicBool::new(false),
            isolation: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }

    pub fn isolation(&self) -> Option<Isolation> {
        *self.isolation.lock()
    }

    pub fn pending_changes(&self) -> usize {
        self.changes.lock().len()
    }

    fn check_writable(&self) -> Result<(), TransactionError> {
        if self.is_read_only() {
            return Err(TransactionError::read_only_violation(
                "Session is read-only. Modifications are not allowed",
            ));
        }
        Ok(())
    }

    fn take_changes(&self) -> Changes {
        self.savepoints.lock().clear();
        std::mem::take(&mut *self.changes.lock())
    }

    fn create_savepoint(&self, savepoint: Savepoint) -> Savepoint {
        let snapshot = self.changes.lock().clone();
        self.savepoints.lock().push((savepoint.clone(), snapshot));
        savepoint
    }

    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        let mut savepoints = self.savepoints.lock();
        let position = savepoints
            .iter()
            .position(|(held, _)| held.id() == savepoint.id())
            .ok_or_else(|| TransactionError::usage(format!("Unknown savepoint '{}'", savepoint.name())))?;
        let (_, snapshot) = &savepoints[position];
        *self.changes.lock() = snapshot.clone();
        savepoints.truncate(position + 1);
        Ok(())
    }

    fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        let mut savepoints = self.savepoints.lock();
        let position = savepoints
            .iter()
            .position(|(held, _)| held.id() == savepoint.id())
            .ok_or_else(|| TransactionError::usage(format!("Unknown savepoint '{}'", savepoint.name())))?;
        savepoints.truncate(position);
        Ok(())
    }
}

/// Session bound to a thread, plus the transaction state around it
pub struct SessionHolder {
    session: MemorySession,
    rollback_only: AtomicBool,
    transaction_active: AtomicBool,
    synchronized_with_transaction: AtomicBool,
    savepoint_counter: AtomicUsize,
    deadline: Mutex<Option<DateTime<Utc>>>,
}

impl SessionHolder {
    fn new() -> Self {
        Self {
            session: MemorySession::new(),
            rollback_only: AtomicBool::new(false),
            transaction_active: AtomicBool::new(false),
            synchronized_with_transaction: AtomicBool::new(false),
            savepoint_counter: AtomicUsize::new(0),
            deadline: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &MemorySession {
        &self.session
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    pub fn set_rollback_only(&self) {
        self.rollback_only.store(true, Ordering::SeqCst);
    }

    fn reset_rollback_only(&self) {
        self.rollback_only.store(false, Ordering::SeqCst);
    }

    pub fn is_transaction_active(&self) -> bool {
        self.transaction_active.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        *self.deadline.lock()
    }

    fn set_timeout_in_seconds(&self, seconds: i32) {
        *self.deadline.lock() = Some(Utc::now() + ChronoDuration::seconds(i64::from(seconds)));
    }

    /// Fail once the deadline has passed; the transaction becomes rollback-only
    fn check_deadline(&self) -> Result<(), TransactionError> {
        if let Some(deadline) = self.deadline() {
            if Utc::now() >= deadline {
                self.set_rollback_only();
                return Err(TransactionError::timed_out(format!(
                    "Transaction timed out: deadline was {}",
                    deadline.to_rfc3339()
                )));
            }
        }
        Ok(())
    }

    fn clear(&self) {
        self.rollback_only.store(false, Ordering::SeqCst);
        self.transaction_active.store(false, Ordering::SeqCst);
        self.synchronized_with_transaction.store(false, Ordering::SeqCst);
        *self.deadline.lock() = None;
    }
}

/// Transaction object of [`MemoryStoreBackend`]
pub struct MemoryTransaction {
    holder: Mutex<Option<Arc<SessionHolder>>>,
    new_holder: AtomicBool,
}

impl MemoryTransaction {
    fn new(holder: Option<Arc<SessionHolder>>) -> Self {
        Self {
            holder: Mutex::new(holder),
            new_holder: AtomicBool::new(false),
        }
    }

    pub fn holder(&self) -> Option<Arc<SessionHolder>> {
        self.holder.lock().clone()
    }

    fn required_holder(&self) -> Result<Arc<SessionHolder>, TransactionError> {
        self.holder()
            .ok_or_else(|| TransactionError::illegal_state("No session bound to memory store transaction"))
    }

    fn set_holder(&self, holder: Option<Arc<SessionHolder>>, new_holder: bool) {
        *self.holder.lock() = holder;
        self.new_holder.store(new_holder, Ordering::SeqCst);
    }

    fn is_new_holder(&self) -> bool {
        self.new_holder.load(Ordering::SeqCst)
    }
}

impl TransactionObject for MemoryTransaction {
    fn is_rollback_only(&self) -> bool {
        self.holder().map(|holder| holder.is_rollback_only()).unwrap_or(false)
    }

    fn flush(&self) -> Result<(), TransactionError> {
        if Tsm::is_synchronization_active() {
            synchronization::trigger_flush();
        }
        Ok(())
    }

    fn create_savepoint(&self) -> Result<Savepoint, TransactionError> {
        let holder = self.required_holder()?;
        let sequence = holder.savepoint_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(holder.session.create_savepoint(Savepoint::new(format!("SAVEPOINT_{}", sequence))))
    }

    fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        let holder = self.required_holder()?;
        holder.session.rollback_to_savepoint(savepoint)?;
        holder.reset_rollback_only();
        Ok(())
    }

    fn release_savepoint(&self, savepoint: &Savepoint) -> Result<(), TransactionError> {
        self.required_holder()?.session.release_savepoint(savepoint)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Backend running transactions against one [`MemoryStore`]
pub struct MemoryStoreBackend {
    store: Arc<MemoryStore>,
}

impl MemoryStoreBackend {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    fn open_session(&self, transaction: &MemoryTransaction) -> Arc<SessionHolder> {
        match transaction.holder() {
            Some(holder) if !holder.synchronized_with_transaction.load(Ordering::SeqCst) => holder,
            _ => {
                let holder = Arc::new(SessionHolder::new());
                debug!(
                    "Acquired session [{}] of memory store '{}' for transaction",
                    holder.session.id, self.store.name
                );
                transaction.set_holder(Some(holder.clone()), true);
                holder
            }
        }
    }
}

impl TransactionBackend for MemoryStoreBackend {
    type Transaction = MemoryTransaction;
    type Suspended = Arc<SessionHolder>;

    fn do_get_transaction(&self) -> Result<Arc<MemoryTransaction>, TransactionError> {
        Ok(Arc::new(MemoryTransaction::new(Tsm::get_resource_as::<SessionHolder>(
            self.store.id,
        ))))
    }

    fn is_existing_transaction(&self, transaction: &MemoryTransaction) -> bool {
        transaction
            .holder()
            .map(|holder| holder.is_transaction_active())
            .unwrap_or(false)
    }

    fn do_begin(
        &self,
        transaction: &MemoryTransaction,
        definition: &dyn TransactionDefinition,
        timeout: i32,
    ) -> Result<(), TransactionError> {
        let holder = self.open_session(transaction);
        holder.synchronized_with_transaction.store(true, Ordering::SeqCst);
        holder.session.read_only.store(definition.is_read_only(), Ordering::SeqCst);
        *holder.session.isolation.lock() = match definition.isolation() {
            Isolation::Default => None,
            isolation => Some(isolation),
        };
        if timeout != TIMEOUT_DEFAULT {
            holder.set_timeout_in_seconds(timeout);
        }
        holder.transaction_active.store(true, Ordering::SeqCst);

        if transaction.is_new_holder() {
            if let Err(err) = Tsm::bind_resource(self.store.id, holder.clone()) {
                holder.clear();
                transaction.set_holder(None, false);
                return Err(TransactionError::cannot_create(
                    format!("Could not open session of memory store '{}' for transaction", self.store.name),
                    Some(err),
                ));
            }
        }
        Ok(())
    }

    fn do_suspend(&self, transaction: &MemoryTransaction) -> Result<Arc<SessionHolder>, TransactionError> {
        transaction.set_holder(None, false);
        Tsm::unbind_resource(self.store.id)?
            .downcast::<SessionHolder>()
            .map_err(|_| TransactionError::illegal_state("Unexpected resource bound for memory store"))
    }

    fn do_resume(
        &self,
        _transaction: Option<&MemoryTransaction>,
        suspended: Arc<SessionHolder>,
    ) -> Result<(), TransactionError> {
        Tsm::bind_resource(self.store.id, suspended)
    }

    fn do_commit(&self, _status: &TransactionStatus, transaction: &MemoryTransaction) -> Result<(), TransactionError> {
        let holder = transaction.required_holder()?;
        debug!("Committing memory store session [{}]", holder.session.id);
        self.store.apply(holder.session.take_changes());
        Ok(())
    }

    fn do_rollback(&self, _status: &TransactionStatus, transaction: &MemoryTransaction) -> Result<(), TransactionError> {
        let holder = transaction.required_holder()?;
        debug!("Rolling back memory store session [{}]", holder.session.id);
        holder.session.take_changes();
        Ok(())
    }

    fn do_set_rollback_only(&self, _status: &TransactionStatus, transaction: &MemoryTransaction) -> Result<(), TransactionError> {
        let holder = transaction.required_holder()?;
        debug!("Setting memory store session [{}] rollback-only", holder.session.id);
        holder.set_rollback_only();
        Ok(())
    }

    fn do_cleanup_after_completion(&self, transaction: &MemoryTransaction) {
        if transaction.is_new_holder() {
            Tsm::unbind_resource_if_possible(self.store.id);
        }
        if let Some(holder) = transaction.holder() {
            if transaction.is_new_holder() {
                debug!("Releasing memory store session [{}] after transaction", holder.session.id);
            }
            holder.clear();
        }
        transaction.set_holder(None, false);
    }
}

/// Transaction manager for a [`MemoryStore`]
pub type MemoryStoreTransactionManager = AbstractTransactionManager<MemoryStoreBackend>;

impl AbstractTransactionManager<MemoryStoreBackend> {
    /// Manager for `store` with savepoint-based nesting enabled
    pub fn for_store(store: Arc<MemoryStore>) -> Self {
        Self::with_trusted_config(MemoryStoreBackend::new(store), TransactionManagerConfig::with_savepoints())
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        self.backend().store()
    }
}
