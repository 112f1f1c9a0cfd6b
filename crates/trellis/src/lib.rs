//! # trellis
//!
//! A component container with singleton management, constructor resolution,
//! method-interception proxies and transaction propagation.
//!
//! This is the umbrella package: it re-exports the sub-crates and offers a
//! [`prelude`] plus logging initialisation for applications.

// Re-export all sub-packages as modules
pub use trellis_aop as aop;
pub use trellis_core as core;
pub use trellis_tx as tx;

// Re-export common types at root level for convenience
pub use trellis_aop::{Advice, Advisor, AopError, AutoProxyCreator, MethodInterceptor, MethodInvocation, ProxyFactory};
pub use trellis_core::{
    BeanDefinition, BeanFactory, ConfigError, ConfigSource, ConfigTrait, ContainerConfig, CoreError, Instance,
    InvocationError, InvocationResult, Method, TypeInfo,
};
pub use trellis_tx::{
    PlatformTransactionManager, Propagation, TransactionDefinition, TransactionError, TransactionStatus,
    TransactionTemplate,
};

pub mod logging;
pub mod prelude;

pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Current version of trellis
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework information
pub const FRAMEWORK_NAME: &str = "trellis";

/// Get framework version
pub fn version() -> &'static str {
    VERSION
}

/// Get framework name
pub fn name() -> &'static str {
    FRAMEWORK_NAME
}
