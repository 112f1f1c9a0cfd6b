//! Propagation-aware transaction management.
//!
//! [`AbstractTransactionManager`] implements the propagation rules, the
//! suspension of outer transactions, rollback-only handling and the
//! synchronization callbacks once. A [`TransactionBackend`] supplies the
//! resource-specific steps: detecting a running transaction, beginning,
//! committing and rolling back, and suspending or resuming thread-bound
//! resources.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, trace, warn};
use trellis_core::config::ConfigTrait;

use crate::config::{SynchronizationPolicy, TransactionManagerConfig};
use crate::definition::{Isolation, Propagation, TransactionDefinition, TIMEOUT_DEFAULT};
use crate::error::TransactionError;
use crate::status::{StatusSettings, TransactionObject, TransactionStatus};
use crate::suspended::SuspendedResourcesHolder;
use crate::synchronization::{
    self, invoke_after_completion, CompletionStatus, TransactionSynchronization,
    TransactionSynchronizationManager as Tsm,
};

/// Central transaction API
pub trait PlatformTransactionManager: Send + Sync {
    /// Return a running transaction or create a new one, according to the
    /// propagation of `definition`
    fn get_transaction(&self, definition: &dyn TransactionDefinition) -> Result<TransactionStatus, TransactionError>;

    /// Commit the transaction of `status`, or roll it back if it was marked
    /// rollback-only
    fn commit(&self, status: &TransactionStatus) -> Result<(), TransactionError>;

    fn rollback(&self, status: &TransactionStatus) -> Result<(), TransactionError>;
}

/// Observer of transaction boundaries.
///
/// Begin callbacks fire for new transactions and savepoints, commit and
/// rollback callbacks for the status that performs the actual completion.
pub trait TransactionExecutionListener: Send + Sync {
    fn before_begin(&self, _status: &TransactionStatus) {}

    fn after_begin(&self, _status: &TransactionStatus, _error: Option<&TransactionError>) {}

    fn before_commit(&self, _status: &TransactionStatus) {}

    fn after_commit(&self, _status: &TransactionStatus, _error: Option<&TransactionError>) {}

    fn before_rollback(&self, _status: &TransactionStatus) {}

    fn after_rollback(&self, _status: &TransactionStatus, _error: Option<&TransactionError>) {}
}

/// Resource-specific steps driven by [`AbstractTransactionManager`]
pub trait TransactionBackend: Send + Sync {
    type Transaction: TransactionObject;
    type Suspended: Send + Sync + 'static;

    /// Transaction object for the current thread state
    fn do_get_transaction(&self) -> Result<Arc<Self::Transaction>, TransactionError>;

    /// Whether `transaction` represents a transaction that is already running
    fn is_existing_transaction(&self, transaction: &Self::Transaction) -> bool;

    /// Nest through savepoints on the existing transaction rather than
    /// through a new low-level transaction
    fn use_savepoint_for_nested_transaction(&self) -> bool {
        true
    }

    /// Begin a transaction; `timeout` is in seconds, -1 for none
    fn do_begin(
        &self,
        transaction: &Self::Transaction,
        definition: &dyn TransactionDefinition,
        timeout: i32,
    ) -> Result<(), TransactionError>;

    fn do_suspend(&self, _transaction: &Self::Transaction) -> Result<Self::Suspended, TransactionError> {
        Err(TransactionError::suspension_not_supported(
            "Transaction manager does not support transaction suspension",
        ))
    }

    fn do_resume(
        &self,
        _transaction: Option<&Self::Transaction>,
        _suspended: Self::Suspended,
    ) -> Result<(), TransactionError> {
        Err(TransactionError::suspension_not_supported(
            "Transaction manager does not support transaction suspension",
        ))
    }

    /// Commit even when the shared transaction has been marked rollback-only
    fn should_commit_on_global_rollback_only(&self) -> bool {
        false
    }

    /// Runs before the commit callbacks, e.g. to flush pending work
    fn prepare_for_commit(&self, _status: &TransactionStatus) -> Result<(), TransactionError> {
        Ok(())
    }

    fn do_commit(&self, status: &TransactionStatus, transaction: &Self::Transaction) -> Result<(), TransactionError>;

    fn do_rollback(&self, status: &TransactionStatus, transaction: &Self::Transaction) -> Result<(), TransactionError>;

    /// Mark the shared transaction rollback-only after a participant failed
    fn do_set_rollback_only(
        &self,
        _status: &TransactionStatus,
        _transaction: &Self::Transaction,
    ) -> Result<(), TransactionError> {
        Err(TransactionError::illegal_state(
            "Participating in existing transactions is not supported - when 'is_existing_transaction' returns true, 'do_set_rollback_only' must be implemented",
        ))
    }

    /// Hand callbacks of a participating scope to the outer transaction.
    ///
    /// Without backend support they run immediately with an unknown outcome.
    fn register_after_completion_with_existing_transaction(
        &self,
        _transaction: &Self::Transaction,
        synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
    ) -> Result<(), TransactionError> {
        debug!("Cannot register after-completion callbacks with existing transaction - invoking them immediately with unknown outcome");
        invoke_after_completion(&synchronizations, CompletionStatus::Unknown);
        Ok(())
    }

    fn do_cleanup_after_completion(&self, _transaction: &Self::Transaction) {}
}

const ALREADY_COMPLETED: &str =
    "Transaction is already completed - do not call commit or rollback more than once per transaction";

#[derive(Default)]
struct CommitProgress {
    before_completion_invoked: bool,
    commit_listener_invoked: bool,
}

/// Transaction manager implementing propagation on top of a backend
pub struct AbstractTransactionManager<B: TransactionBackend> {
    backend: B,
    config: TransactionManagerConfig,
    listeners: RwLock<Vec<Arc<dyn TransactionExecutionListener>>>,
}

impl<B: TransactionBackend> AbstractTransactionManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: TransactionManagerConfig::default(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn with_config(backend: B, config: TransactionManagerConfig) -> Result<Self, TransactionError> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Settings known to be valid, e.g. built from [`TransactionManagerConfig`] presets
    pub(crate) fn with_trusted_config(backend: B, config: TransactionManagerConfig) -> Self {
        Self {
            backend,
            config,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    pub fn add_listener(&self, listener: Arc<dyn TransactionExecutionListener>) {
        self.listeners.write().push(listener);
    }

    fn each_listener(&self, f: impl Fn(&dyn TransactionExecutionListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(listener.as_ref());
        }
    }

    fn determine_timeout(&self, definition: &dyn TransactionDefinition) -> i32 {
        if definition.timeout() != TIMEOUT_DEFAULT {
            definition.timeout()
        } else {
            self.config.default_timeout
        }
    }

    fn backend_transaction<'s>(&self, status: &'s TransactionStatus) -> Result<&'s B::Transaction, TransactionError> {
        status
            .transaction()
            .and_then(|transaction| transaction.as_any().downcast_ref::<B::Transaction>())
            .ok_or_else(|| {
                TransactionError::illegal_state("Transaction status does not carry a transaction of this transaction manager")
            })
    }

    fn handle_existing_transaction(
        &self,
        definition: &dyn TransactionDefinition,
        transaction: Arc<B::Transaction>,
    ) -> Result<TransactionStatus, TransactionError> {
        let name = definition.name().unwrap_or_default();
        match definition.propagation() {
            Propagation::Never => Err(TransactionError::illegal_state(
                "Existing transaction found for transaction marked with propagation 'never'",
            )),
            Propagation::NotSupported => {
                debug!("Suspending current transaction");
                let suspended = self.suspend(Some(transaction.as_ref()))?;
                let new_synchronization = self.config.transaction_synchronization == SynchronizationPolicy::Always;
                self.prepare_transaction_status(definition, None, false, new_synchronization, suspended)
            }
            Propagation::RequiresNew => {
                debug!("Suspending current transaction, creating new transaction with name [{}]", name);
                let suspended = self.suspend(Some(transaction.as_ref()))?;
                self.start_transaction(definition, transaction, false, suspended, true)
            }
            Propagation::Nested => {
                if !self.config.nested_transaction_allowed {
                    return Err(TransactionError::nested_not_supported(
                        "Transaction manager does not allow nested transactions by default - specify 'nested_transaction_allowed' with value 'true'",
                    ));
                }
                debug!("Creating nested transaction with name [{}]", name);
                if self.backend.use_savepoint_for_nested_transaction() {
                    let status = self.new_transaction_status(definition, Some(transaction), false, false, true, None);
                    self.each_listener(|listener| listener.before_begin(&status));
                    if let Err(err) = status.create_and_hold_savepoint() {
                        self.each_listener(|listener| listener.after_begin(&status, Some(&err)));
                        return Err(err);
                    }
                    self.each_listener(|listener| listener.after_begin(&status, None));
                    Ok(status)
                } else {
                    self.start_transaction(definition, transaction, true, None, false)
                }
            }
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                debug!("Participating in existing transaction");
                if self.config.validate_existing_transaction {
                    self.validate_participation(definition)?;
                }
                let new_synchronization = self.config.transaction_synchronization != SynchronizationPolicy::Never;
                self.prepare_transaction_status(definition, Some(transaction), false, new_synchronization, None)
            }
        }
    }

    fn validate_participation(&self, definition: &dyn TransactionDefinition) -> Result<(), TransactionError> {
        if definition.isolation() != Isolation::Default {
            let current = Tsm::current_transaction_isolation_level();
            if current != Some(definition.isolation()) {
                return Err(TransactionError::illegal_state(format!(
                    "Participating transaction with definition [{}] specifies isolation level which is incompatible with existing transaction: {}",
                    definition.describe(),
                    current.map(|isolation| isolation.to_string()).unwrap_or_else(|| "(unknown)".to_string())
                )));
            }
        }
        if !definition.is_read_only() && Tsm::is_current_transaction_read_only() {
            return Err(TransactionError::illegal_state(format!(
                "Participating transaction with definition [{}] is not marked as read-only but existing transaction is",
                definition.describe()
            )));
        }
        Ok(())
    }

    fn start_transaction(
        &self,
        definition: &dyn TransactionDefinition,
        transaction: Arc<B::Transaction>,
        nested: bool,
        suspended: Option<SuspendedResourcesHolder>,
        resume_into_transaction: bool,
    ) -> Result<TransactionStatus, TransactionError> {
        let new_synchronization = self.config.transaction_synchronization != SynchronizationPolicy::Never;
        let status = self.new_transaction_status(
            definition,
            Some(transaction.clone()),
            true,
            new_synchronization,
            nested,
            suspended,
        );
        self.each_listener(|listener| listener.before_begin(&status));
        if let Err(err) = self
            .backend
            .do_begin(&transaction, definition, self.determine_timeout(definition))
        {
            self.each_listener(|listener| listener.after_begin(&status, Some(&err)));
            let outer = if resume_into_transaction { Some(transaction.as_ref()) } else { None };
            return Err(self.resume_after_begin_failure(outer, status.take_suspended_resources(), err));
        }
        self.prepare_synchronization(&status, definition)?;
        self.each_listener(|listener| listener.after_begin(&status, None));
        Ok(status)
    }

    fn resume_after_begin_failure(
        &self,
        transaction: Option<&B::Transaction>,
        suspended: Option<SuspendedResourcesHolder>,
        begin_error: TransactionError,
    ) -> TransactionError {
        match self.resume(transaction, suspended) {
            Ok(()) => begin_error,
            Err(resume_error) => {
                error!(
                    "Inner transaction begin exception overridden by outer transaction resume exception: {}",
                    begin_error
                );
                resume_error
            }
        }
    }

    fn new_transaction_status(
        &self,
        definition: &dyn TransactionDefinition,
        transaction: Option<Arc<B::Transaction>>,
        new_transaction: bool,
        new_synchronization: bool,
        nested: bool,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TransactionStatus {
        let actual_new_synchronization = new_synchronization && !Tsm::is_synchronization_active();
        TransactionStatus::new(StatusSettings {
            name: definition.name().map(str::to_string),
            transaction: transaction.map(|transaction| transaction as Arc<dyn TransactionObject>),
            new_transaction,
            new_synchronization: actual_new_synchronization,
            nested,
            read_only: definition.is_read_only(),
            suspended,
        })
    }

    fn prepare_transaction_status(
        &self,
        definition: &dyn TransactionDefinition,
        transaction: Option<Arc<B::Transaction>>,
        new_transaction: bool,
        new_synchronization: bool,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> Result<TransactionStatus, TransactionError> {
        let status = self.new_transaction_status(
            definition,
            transaction,
            new_transaction,
            new_synchronization,
            false,
            suspended,
        );
        self.prepare_synchronization(&status, definition)?;
        Ok(status)
    }

    fn prepare_synchronization(
        &self,
        status: &TransactionStatus,
        definition: &dyn TransactionDefinition,
    ) -> Result<(), TransactionError> {
        if status.is_new_synchronization() {
            Tsm::set_actual_transaction_active(status.has_transaction());
            Tsm::set_current_transaction_isolation_level(match definition.isolation() {
                Isolation::Default => None,
                isolation => Some(isolation),
            });
            Tsm::set_current_transaction_read_only(definition.is_read_only());
            Tsm::set_current_transaction_name(definition.name().map(str::to_string));
            Tsm::init_synchronization()?;
        }
        Ok(())
    }

    fn suspend(&self, transaction: Option<&B::Transaction>) -> Result<Option<SuspendedResourcesHolder>, TransactionError> {
        if Tsm::is_synchronization_active() {
            let synchronizations = self.do_suspend_synchronization()?;
            let resources = match transaction {
                Some(transaction) => match self.backend.do_suspend(transaction) {
                    Ok(resources) => Some(Box::new(resources) as Box<dyn Any + Send + Sync>),
                    Err(err) => {
                        self.do_resume_synchronization(synchronizations)?;
                        return Err(err);
                    }
                },
                None => None,
            };
            let name = Tsm::current_transaction_name();
            Tsm::set_current_transaction_name(None);
            let read_only = Tsm::is_current_transaction_read_only();
            Tsm::set_current_transaction_read_only(false);
            let isolation = Tsm::current_transaction_isolation_level();
            Tsm::set_current_transaction_isolation_level(None);
            let was_active = Tsm::is_actual_transaction_active();
            Tsm::set_actual_transaction_active(false);
            Ok(Some(SuspendedResourcesHolder {
                resources,
                synchronizations: Some(synchronizations),
                name,
                read_only,
                isolation,
                was_active,
            }))
        } else if let Some(transaction) = transaction {
            let resources = self.backend.do_suspend(transaction)?;
            Ok(Some(SuspendedResourcesHolder::for_resources(Box::new(resources))))
        } else {
            Ok(None)
        }
    }

    fn resume(
        &self,
        transaction: Option<&B::Transaction>,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> Result<(), TransactionError> {
        let holder = match suspended {
            Some(holder) => holder,
            None => return Ok(()),
        };
        if let Some(resources) = holder.resources {
            let resources = resources.downcast::<B::Suspended>().map_err(|_| {
                TransactionError::illegal_state("Suspended resources were not created by this transaction manager")
            })?;
            self.backend.do_resume(transaction, *resources)?;
        }
        if let Some(synchronizations) = holder.synchronizations {
            Tsm::set_actual_transaction_active(holder.was_active);
            Tsm::set_current_transaction_isolation_level(holder.isolation);
            Tsm::set_current_transaction_read_only(holder.read_only);
            Tsm::set_current_transaction_name(holder.name);
            self.do_resume_synchronization(synchronizations)?;
        }
        Ok(())
    }

    fn do_suspend_synchronization(&self) -> Result<Vec<Arc<dyn TransactionSynchronization>>, TransactionError> {
        let synchronizations = Tsm::synchronizations()?;
        for synchronization in &synchronizations {
            synchronization.suspend();
        }
        Tsm::clear_synchronization()?;
        Ok(synchronizations)
    }

    fn do_resume_synchronization(
        &self,
        synchronizations: Vec<Arc<dyn TransactionSynchronization>>,
    ) -> Result<(), TransactionError> {
        Tsm::init_synchronization()?;
        for synchronization in synchronizations {
            synchronization.resume();
            Tsm::register_synchronization(synchronization)?;
        }
        Ok(())
    }

    fn process_commit(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        let mut progress = CommitProgress::default();
        let outcome = match self.commit_steps(status, &mut progress) {
            Ok(()) => self.after_successful_commit(status, &progress),
            Err(err) => Err(self.handle_commit_failure(status, &progress, err)),
        };
        self.finish(status, outcome)
    }

    fn commit_steps(&self, status: &TransactionStatus, progress: &mut CommitProgress) -> Result<(), TransactionError> {
        let mut unexpected_rollback = false;
        self.backend.prepare_for_commit(status)?;
        self.trigger_before_commit(status)?;
        self.trigger_before_completion(status);
        progress.before_completion_invoked = true;

        if status.has_savepoint() {
            debug!("Releasing transaction savepoint");
            unexpected_rollback = status.is_global_rollback_only();
            self.each_listener(|listener| listener.before_commit(status));
            progress.commit_listener_invoked = true;
            status.release_held_savepoint()?;
        } else if status.is_new_transaction() {
            debug!("Initiating transaction commit");
            unexpected_rollback = status.is_global_rollback_only();
            self.each_listener(|listener| listener.before_commit(status));
            progress.commit_listener_invoked = true;
            let transaction = self.backend_transaction(status)?;
            self.backend.do_commit(status, transaction)?;
        } else if self.config.fail_early_on_global_rollback_only {
            unexpected_rollback = status.is_global_rollback_only();
        }

        if unexpected_rollback {
            return Err(TransactionError::unexpected_rollback(
                "Transaction silently rolled back because it has been marked as rollback-only",
            ));
        }
        Ok(())
    }

    fn after_successful_commit(&self, status: &TransactionStatus, progress: &CommitProgress) -> Result<(), TransactionError> {
        // afterCommit errors reach the caller; the transaction stays committed
        let after_commit = self.trigger_after_commit(status);
        self.trigger_after_completion(status, CompletionStatus::Committed);
        if progress.commit_listener_invoked {
            self.each_listener(|listener| listener.after_commit(status, None));
        }
        after_commit
    }

    fn handle_commit_failure(
        &self,
        status: &TransactionStatus,
        progress: &CommitProgress,
        err: TransactionError,
    ) -> TransactionError {
        if err.is_unexpected_rollback() {
            self.trigger_after_completion(status, CompletionStatus::RolledBack);
            self.each_listener(|listener| listener.after_rollback(status, None));
            return err;
        }
        if err.is_application() {
            if !progress.before_completion_invoked {
                self.trigger_before_completion(status);
            }
            return self.rollback_on_commit_exception(status, err);
        }
        if self.config.rollback_on_commit_failure {
            self.rollback_on_commit_exception(status, err)
        } else {
            self.trigger_after_completion(status, CompletionStatus::Unknown);
            if progress.commit_listener_invoked {
                self.each_listener(|listener| listener.after_commit(status, Some(&err)));
            }
            err
        }
    }

    fn rollback_on_commit_exception(&self, status: &TransactionStatus, err: TransactionError) -> TransactionError {
        let rollback = if status.is_new_transaction() {
            debug!("Initiating transaction rollback after commit exception");
            self.backend_transaction(status)
                .and_then(|transaction| self.backend.do_rollback(status, transaction))
        } else if status.has_transaction() && self.config.global_rollback_on_participation_failure {
            debug!("Marking existing transaction as rollback-only after commit exception");
            self.backend_transaction(status)
                .and_then(|transaction| self.backend.do_set_rollback_only(status, transaction))
        } else {
            Ok(())
        };
        match rollback {
            Ok(()) => {
                self.trigger_after_completion(status, CompletionStatus::RolledBack);
                self.each_listener(|listener| listener.after_rollback(status, None));
                err
            }
            Err(rollback_error) => {
                error!("Commit exception overridden by rollback exception: {}", err);
                self.trigger_after_completion(status, CompletionStatus::Unknown);
                self.each_listener(|listener| listener.after_rollback(status, Some(&rollback_error)));
                rollback_error
            }
        }
    }

    fn process_rollback(&self, status: &TransactionStatus, unexpected: bool) -> Result<(), TransactionError> {
        let outcome = self.rollback_outcome(status, unexpected);
        self.finish(status, outcome)
    }

    fn rollback_outcome(&self, status: &TransactionStatus, unexpected: bool) -> Result<(), TransactionError> {
        let mut unexpected_rollback = unexpected;
        let mut listener_invoked = false;
        if let Err(err) = self.rollback_steps(status, &mut unexpected_rollback, &mut listener_invoked) {
            self.trigger_after_completion(status, CompletionStatus::Unknown);
            if listener_invoked {
                self.each_listener(|listener| listener.after_rollback(status, Some(&err)));
            }
            return Err(err);
        }
        self.trigger_after_completion(status, CompletionStatus::RolledBack);
        if listener_invoked {
            self.each_listener(|listener| listener.after_rollback(status, None));
        }
        if unexpected_rollback {
            return Err(TransactionError::unexpected_rollback(
                "Transaction rolled back because it has been marked as rollback-only",
            ));
        }
        Ok(())
    }

    fn rollback_steps(
        &self,
        status: &TransactionStatus,
        unexpected_rollback: &mut bool,
        listener_invoked: &mut bool,
    ) -> Result<(), TransactionError> {
        self.trigger_before_completion(status);

        if status.has_savepoint() {
            debug!("Rolling back transaction to savepoint");
            self.each_listener(|listener| listener.before_rollback(status));
            *listener_invoked = true;
            status.rollback_to_held_savepoint()?;
        } else if status.is_new_transaction() {
            debug!("Initiating transaction rollback");
            self.each_listener(|listener| listener.before_rollback(status));
            *listener_invoked = true;
            let transaction = self.backend_transaction(status)?;
            self.backend.do_rollback(status, transaction)?;
        } else {
            if status.has_transaction() {
                if status.is_local_rollback_only() || self.config.global_rollback_on_participation_failure {
                    debug!("Participating transaction failed - marking existing transaction as rollback-only");
                    let transaction = self.backend_transaction(status)?;
                    self.backend.do_set_rollback_only(status, transaction)?;
                } else {
                    debug!("Participating transaction failed - letting transaction originator decide on rollback");
                }
            } else {
                debug!("Should roll back transaction but cannot - no transaction available");
            }
            // only the outermost scope reports the rollback unless failing early
            if !self.config.fail_early_on_global_rollback_only {
                *unexpected_rollback = false;
            }
        }
        Ok(())
    }

    fn trigger_before_commit(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        if status.is_new_synchronization() {
            trace!("Triggering before_commit synchronization");
            synchronization::trigger_before_commit(status.is_read_only())?;
        }
        Ok(())
    }

    fn trigger_before_completion(&self, status: &TransactionStatus) {
        if status.is_new_synchronization() {
            trace!("Triggering before_completion synchronization");
            synchronization::trigger_before_completion();
        }
    }

    fn trigger_after_commit(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        if status.is_new_synchronization() {
            trace!("Triggering after_commit synchronization");
            synchronization::trigger_after_commit()?;
        }
        Ok(())
    }

    fn trigger_after_completion(&self, status: &TransactionStatus, completion: CompletionStatus) {
        if !status.is_new_synchronization() {
            return;
        }
        // stays active until cleanup so callbacks may still register
        let synchronizations = match Tsm::synchronizations() {
            Ok(synchronizations) => synchronizations,
            Err(_) => return,
        };
        if !status.has_transaction() || status.is_new_transaction() {
            trace!("Triggering after_completion synchronization");
            invoke_after_completion(&synchronizations, completion);
        } else if !synchronizations.is_empty() {
            let registered = self.backend_transaction(status).and_then(|transaction| {
                self.backend
                    .register_after_completion_with_existing_transaction(transaction, synchronizations)
            });
            if let Err(err) = registered {
                error!("Could not hand after-completion callbacks to the existing transaction: {}", err);
            }
        }
    }

    /// Run cleanup and merge its outcome with the completion outcome
    fn finish(&self, status: &TransactionStatus, outcome: Result<(), TransactionError>) -> Result<(), TransactionError> {
        match self.cleanup_after_completion(status) {
            Ok(()) => outcome,
            Err(resume_error) => {
                if let Err(err) = &outcome {
                    error!("Transaction completion exception overridden by resume exception: {}", err);
                }
                Err(resume_error)
            }
        }
    }

    fn cleanup_after_completion(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        status.set_completed();
        if status.is_new_synchronization() {
            Tsm::clear();
        }
        if status.is_new_transaction() {
            if let Ok(transaction) = self.backend_transaction(status) {
                self.backend.do_cleanup_after_completion(transaction);
            }
        }
        if let Some(suspended) = status.take_suspended_resources() {
            debug!("Resuming suspended transaction after completion of inner transaction");
            let transaction = status
                .transaction()
                .and_then(|transaction| transaction.as_any().downcast_ref::<B::Transaction>());
            self.resume(transaction, Some(suspended))?;
        }
        Ok(())
    }
}

impl<B: TransactionBackend> PlatformTransactionManager for AbstractTransactionManager<B> {
    fn get_transaction(&self, definition: &dyn TransactionDefinition) -> Result<TransactionStatus, TransactionError> {
        let transaction = self.backend.do_get_transaction()?;
        if self.backend.is_existing_transaction(&transaction) {
            return self.handle_existing_transaction(definition, transaction);
        }

        if definition.timeout() < TIMEOUT_DEFAULT {
            return Err(TransactionError::InvalidTimeout {
                timeout: definition.timeout(),
            });
        }

        match definition.propagation() {
            Propagation::Mandatory => Err(TransactionError::illegal_state(
                "No existing transaction found for transaction marked with propagation 'mandatory'",
            )),
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                let suspended = self.suspend(None)?;
                debug!(
                    "Creating new transaction with name [{}]: {}",
                    definition.name().unwrap_or_default(),
                    definition.describe()
                );
                self.start_transaction(definition, transaction, false, suspended, false)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                if definition.isolation() != Isolation::Default {
                    warn!(
                        "Custom isolation level specified but no actual transaction initiated; isolation level will effectively be ignored: {}",
                        definition.describe()
                    );
                }
                let new_synchronization = self.config.transaction_synchronization == SynchronizationPolicy::Always;
                self.prepare_transaction_status(definition, None, true, new_synchronization, None)
            }
        }
    }

    fn commit(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(ALREADY_COMPLETED));
        }
        if status.is_local_rollback_only() {
            debug!("Transactional code has requested rollback");
            return self.process_rollback(status, false);
        }
        if !self.backend.should_commit_on_global_rollback_only() && status.is_global_rollback_only() {
            debug!("Global transaction is marked as rollback-only but transactional code requested commit");
            return self.process_rollback(status, true);
        }
        self.process_commit(status)
    }

    fn rollback(&self, status: &TransactionStatus) -> Result<(), TransactionError> {
        if status.is_completed() {
            return Err(TransactionError::illegal_state(ALREADY_COMPLETED));
        }
        self.process_rollback(status, false)
    }
}
