//! Method interception for trellis beans.
//!
//! Advice is attached to beans through [`Advisor`]s, which pair it with a
//! [`pointcut`](pointcut::Pointcut) choosing the methods it applies to. A
//! [`ProxyFactory`] builds proxy objects whose methods run the matching
//! advice chain before reaching the target, and an [`AutoProxyCreator`]
//! registered as a bean post-processor does the same for beans as the
//! factory creates them.

pub mod adapter;
pub mod advice;
pub mod advisor;
pub mod auto_proxy;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod invocation;
pub mod pointcut;
pub mod proxy;
pub mod support;
pub mod target;

pub use adapter::{global_adapter_registry, AdvisorAdapter, AdvisorAdapterRegistry, DefaultAdvisorAdapterRegistry};
pub use advice::{
    AfterReturningAdvice, Advice, DelegatingIntroductionInterceptor, IntroductionInterceptor, MethodBeforeAdvice,
    MethodInterceptor, ThrowsAdvice,
};
pub use advisor::{
    Advisor, DefaultIntroductionAdvisor, DefaultPointcutAdvisor, IntroductionAdvisor, PointcutAdvisor,
    HIGHEST_PRECEDENCE, LOWEST_PRECEDENCE,
};
pub use auto_proxy::{
    AdvisorSelector, AutoProxyCreator, BeanNameSelector, FactoryAdvisorSelector, PooledTargetSourceCreator,
    PrototypeTargetSourceCreator, TargetSourceCreator,
};
pub use chain::{AdvisorChainFactory, DefaultAdvisorChainFactory, InterceptorChainElement};
pub use config::{AdvisedSupport, AdvisedSupportListener, ProxyConfig};
pub use context::AopContext;
pub use error::AopError;
pub use invocation::{MethodInvocation, ReflectiveMethodInvocation};
pub use proxy::{AopProxy, AopProxyFactory, DefaultAopProxyFactory, ProxyFactory};
pub use target::{EmptyTargetSource, PooledTargetSource, PrototypeTargetSource, SingletonTargetSource, TargetSource};
