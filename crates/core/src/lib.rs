//! Core of the trellis component container.
//!
//! [`types`] models the runtime type metadata beans are described with,
//! [`container`] holds the singleton registry, the constructor resolver and
//! the [`BeanFactory`] that drives the bean lifecycle.

pub mod config;
pub mod container;
pub mod errors;
pub mod types;

pub use config::{ConfigError, ConfigSource, ConfigTrait, ContainerConfig};
pub use container::{
    BeanDefinition, BeanFactory, BeanPostProcessor, BeanScope, ConstructorCandidate, DependencyDescriptor,
    DependencyResolver, FactoryMethodCandidate, ParameterDescriptor, Scope, SingletonRegistry, ValueHolder,
    ValueSource,
};
pub use errors::CoreError;
pub use types::{Instance, InvocationError, InvocationResult, Method, ReturnType, TypeInfo, TypeKind};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Framework name
pub const FRAMEWORK_NAME: &str = "trellis";

/// Get framework version
pub fn version() -> &'static str {
    VERSION
}
