//! # Prelude
//!
//! Convenient imports for common trellis functionality.
//!
//! ```rust
//! use trellis::prelude::*;
//! ```

// Container
pub use crate::{BeanDefinition, BeanFactory, ContainerConfig, CoreError, Instance, Method, TypeInfo};
pub use trellis_core::{BeanPostProcessor, BeanScope, ConstructorCandidate, ValueSource};

// Interception
pub use crate::{Advice, Advisor, AopError, AutoProxyCreator, MethodInterceptor, MethodInvocation, ProxyFactory};
pub use crate::{InvocationError, InvocationResult};

// Transactions
pub use crate::{PlatformTransactionManager, Propagation, TransactionDefinition, TransactionError, TransactionStatus};
pub use crate::TransactionTemplate;
pub use trellis_tx::{
    DefaultTransactionDefinition, Isolation, MemoryStore, MemoryStoreTransactionManager,
    NameMatchTransactionAttributeSource, TransactionAttributeSourceAdvisor, TransactionInterceptor,
};

// Configuration
pub use crate::{ConfigError, ConfigTrait};
pub use crate::logging::{init_logging, LoggingConfig};

// Common derives
pub use serde::{Deserialize, Serialize};
