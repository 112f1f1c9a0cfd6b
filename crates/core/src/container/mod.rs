pub mod alias;
pub mod autowiring;
pub mod dependents;
pub mod descriptor;
pub mod factory;
pub mod lifecycle;
pub mod registry;
pub mod resolver;
pub mod scope;

pub use alias::AliasRegistry;
pub use autowiring::{DependencyDescriptor, DependencyResolver};
pub use dependents::DependencyGraph;
pub use descriptor::{
    AutowireMode, BeanDefinition, ConstructorArgumentValues, ConstructorCandidate, FactoryMethodCandidate,
    ParameterDescriptor, PropertyValue, ValueHolder, ValueSource, Visibility, PRESERVE_TARGET_CLASS_ATTRIBUTE,
};
pub use factory::BeanFactory;
pub use lifecycle::{BeanPostProcessor, DisposableBean, DisposableBeanAdapter};
pub use registry::{SingletonFactory, SingletonRegistry};
pub use resolver::ConstructorResolver;
pub use scope::{BeanScope, Scope, ThreadScope};
