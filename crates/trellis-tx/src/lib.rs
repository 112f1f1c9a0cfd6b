//! Transaction management for trellis beans.
//!
//! A [`PlatformTransactionManager`] begins, commits and rolls back
//! transactions according to a [`TransactionDefinition`]'s propagation.
//! [`AbstractTransactionManager`] implements the propagation rules once and
//! delegates resource work to a [`TransactionBackend`]; [`memory`] provides a
//! backend over an in-memory key/value store.
//!
//! Transactions are demarcated either programmatically with a
//! [`TransactionTemplate`], or declaratively by advising beans with a
//! [`TransactionAttributeSourceAdvisor`] through `trellis-aop` proxies.
//!
//! Thread-bound state (bound resources, synchronization callbacks, current
//! transaction characteristics) lives in [`TransactionSynchronizationManager`].

pub mod config;
pub mod definition;
pub mod error;
pub mod interceptor;
pub mod manager;
pub mod memory;
pub mod status;
pub mod suspended;
pub mod synchronization;
pub mod template;

pub use config::{SynchronizationPolicy, TransactionManagerConfig};
pub use definition::{DefaultTransactionDefinition, Isolation, Propagation, TransactionDefinition, TIMEOUT_DEFAULT};
pub use error::TransactionError;
pub use interceptor::{
    current_transaction_status, NameMatchTransactionAttributeSource, RollbackRule, RuleBasedTransactionAttribute,
    TransactionAttribute, TransactionAttributeSource, TransactionAttributeSourceAdvisor,
    TransactionAttributeSourcePointcut, TransactionInterceptor,
};
pub use manager::{
    AbstractTransactionManager, PlatformTransactionManager, TransactionBackend, TransactionExecutionListener,
};
pub use memory::{MemoryStore, MemoryStoreBackend, MemoryStoreTransactionManager};
pub use status::{Savepoint, TransactionObject, TransactionStatus};
pub use suspended::SuspendedResourcesHolder;
pub use synchronization::{CompletionStatus, TransactionSynchronization, TransactionSynchronizationManager};
pub use template::TransactionTemplate;
