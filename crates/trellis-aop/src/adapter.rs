//! Turning advice of any shape into interceptors the chain can run.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use trellis_core::{Instance, InvocationResult};

use crate::advice::{
    Advice, AfterReturningAdvice, IntroductionInterceptor, MethodBeforeAdvice, MethodInterceptor, ThrowsAdvice,
};
use crate::advisor::{Advisor, DefaultIntroductionAdvisor, DefaultPointcutAdvisor};
use crate::error::AopError;
use crate::invocation::MethodInvocation;

/// Adapts one non-interceptor advice shape
pub trait AdvisorAdapter: Send + Sync {
    fn supports_advice(&self, advice: &Advice) -> bool;
    fn interceptor(&self, advisor: &Advisor) -> Result<Arc<dyn MethodInterceptor>, AopError>;
}

pub trait AdvisorAdapterRegistry: Send + Sync {
    /// Wrap bare advice into an advisor applying to every method
    fn wrap(&self, advice: Advice) -> Result<Advisor, AopError>;

    /// Wrap a container object holding an [`Advisor`] or an [`Advice`]
    fn wrap_instance(&self, candidate: &Instance) -> Result<Advisor, AopError>;

    /// Interceptors implementing `advisor`, in chain order
    fn interceptors(&self, advisor: &Advisor) -> Result<Vec<Arc<dyn MethodInterceptor>>, AopError>;

    fn register_adapter(&self, adapter: Arc<dyn AdvisorAdapter>);
}

/// Runs before advice, then proceeds
pub struct MethodBeforeAdviceInterceptor {
    advice: Arc<dyn MethodBeforeAdvice>,
}

impl MethodBeforeAdviceInterceptor {
    pub fn new(advice: Arc<dyn MethodBeforeAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for MethodBeforeAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        self.advice
            .before(invocation.method(), invocation.arguments(), invocation.this())?;
        invocation.proceed()
    }

    fn name(&self) -> &str {
        "MethodBeforeAdviceInterceptor"
    }
}

/// Proceeds, then runs after-returning advice on success
pub struct AfterReturningAdviceInterceptor {
    advice: Arc<dyn AfterReturningAdvice>,
}

impl AfterReturningAdviceInterceptor {
    pub fn new(advice: Arc<dyn AfterReturningAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for AfterReturningAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        let value = invocation.proceed()?;
        self.advice.after_returning(
            value.as_ref(),
            invocation.method(),
            invocation.arguments(),
            invocation.this(),
        )?;
        Ok(value)
    }

    fn name(&self) -> &str {
        "AfterReturningAdviceInterceptor"
    }
}

/// Proceeds, running throws advice for errors it handles
pub struct ThrowsAdviceInterceptor {
    advice: Arc<dyn ThrowsAdvice>,
}

impl ThrowsAdviceInterceptor {
    pub fn new(advice: Arc<dyn ThrowsAdvice>) -> Self {
        Self { advice }
    }
}

impl MethodInterceptor for ThrowsAdviceInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        match invocation.proceed() {
            Err(err) if self.advice.handles(&err) => {
                self.advice.after_throwing(
                    invocation.method(),
                    invocation.arguments(),
                    invocation.this(),
                    &err,
                )?;
                Err(err)
            }
            other => other,
        }
    }

    fn name(&self) -> &str {
        "ThrowsAdviceInterceptor"
    }
}

/// Lets an introduction interceptor sit in the chain like any other interceptor
struct IntroductionChainLink(Arc<dyn IntroductionInterceptor>);

impl MethodInterceptor for IntroductionChainLink {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        self.0.invoke(invocation)
    }

    fn name(&self) -> &str {
        self.0.name()
    }
}

struct MethodBeforeAdviceAdapter;

impl AdvisorAdapter for MethodBeforeAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Before(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Result<Arc<dyn MethodInterceptor>, AopError> {
        match advisor.advice() {
            Advice::Before(advice) => Ok(Arc::new(MethodBeforeAdviceInterceptor::new(advice))),
            other => Err(AopError::UnknownAdviceType {
                kind: other.kind().to_string(),
            }),
        }
    }
}

struct AfterReturningAdviceAdapter;

impl AdvisorAdapter for AfterReturningAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::AfterReturning(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Result<Arc<dyn MethodInterceptor>, AopError> {
        match advisor.advice() {
            Advice::AfterReturning(advice) => Ok(Arc::new(AfterReturningAdviceInterceptor::new(advice))),
            other => Err(AopError::UnknownAdviceType {
                kind: other.kind().to_string(),
            }),
        }
    }
}

struct ThrowsAdviceAdapter;

impl AdvisorAdapter for ThrowsAdviceAdapter {
    fn supports_advice(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Throws(_))
    }

    fn interceptor(&self, advisor: &Advisor) -> Result<Arc<dyn MethodInterceptor>, AopError> {
        match advisor.advice() {
            Advice::Throws(advice) => Ok(Arc::new(ThrowsAdviceInterceptor::new(advice))),
            other => Err(AopError::UnknownAdviceType {
                kind: other.kind().to_string(),
            }),
        }
    }
}

/// Registry knowing the built-in advice shapes plus any registered adapters
pub struct DefaultAdvisorAdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn AdvisorAdapter>>>,
}

impl DefaultAdvisorAdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(vec![
                Arc::new(MethodBeforeAdviceAdapter),
                Arc::new(AfterReturningAdviceAdapter),
                Arc::new(ThrowsAdviceAdapter),
            ]),
        }
    }

    fn is_supported(&self, advice: &Advice) -> bool {
        matches!(advice, Advice::Interceptor(_) | Advice::Introduction(_))
            || self.adapters.read().iter().any(|a| a.supports_advice(advice))
    }
}

impl Default for DefaultAdvisorAdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorAdapterRegistry for DefaultAdvisorAdapterRegistry {
    fn wrap(&self, advice: Advice) -> Result<Advisor, AopError> {
        match advice {
            Advice::Introduction(interceptor) => Ok(Advisor::Introduction(Arc::new(
                DefaultIntroductionAdvisor::new(interceptor),
            ))),
            advice if self.is_supported(&advice) => {
                Ok(Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(advice))))
            }
            other => Err(AopError::UnknownAdviceType {
                kind: other.kind().to_string(),
            }),
        }
    }

    fn wrap_instance(&self, candidate: &Instance) -> Result<Advisor, AopError> {
        if let Some(advisor) = candidate.downcast_ref::<Advisor>() {
            return Ok(advisor.clone());
        }
        if let Some(advice) = candidate.downcast_ref::<Advice>() {
            return self.wrap(advice.clone());
        }
        Err(AopError::UnknownAdviceType {
            kind: candidate.type_info().name().to_string(),
        })
    }

    fn interceptors(&self, advisor: &Advisor) -> Result<Vec<Arc<dyn MethodInterceptor>>, AopError> {
        let advice = advisor.advice();
        let mut interceptors: Vec<Arc<dyn MethodInterceptor>> = Vec::new();
        match &advice {
            Advice::Interceptor(interceptor) => interceptors.push(interceptor.clone()),
            Advice::Introduction(interceptor) => {
                interceptors.push(Arc::new(IntroductionChainLink(interceptor.clone())))
            }
            _ => {}
        }
        for adapter in self.adapters.read().iter() {
            if adapter.supports_advice(&advice) {
                interceptors.push(adapter.interceptor(advisor)?);
            }
        }
        if interceptors.is_empty() {
            return Err(AopError::UnknownAdviceType {
                kind: advice.kind().to_string(),
            });
        }
        Ok(interceptors)
    }

    fn register_adapter(&self, adapter: Arc<dyn AdvisorAdapter>) {
        self.adapters.write().push(adapter);
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<DefaultAdvisorAdapterRegistry>> =
    Lazy::new(|| Arc::new(DefaultAdvisorAdapterRegistry::new()));

/// Process-wide registry used by chain factories and auto-proxying unless configured otherwise
pub fn global_adapter_registry() -> Arc<dyn AdvisorAdapterRegistry> {
    GLOBAL_REGISTRY.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::TypeInfo;

    struct Marker;

    struct MarkerInterceptor;

    impl MethodInterceptor for MarkerInterceptor {
        fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
            invocation.proceed()
        }
    }

    struct MarkerAdapter;

    impl AdvisorAdapter for MarkerAdapter {
        fn supports_advice(&self, advice: &Advice) -> bool {
            matches!(advice, Advice::Custom { kind, .. } if kind == "marker")
        }

        fn interceptor(&self, _advisor: &Advisor) -> Result<Arc<dyn MethodInterceptor>, AopError> {
            Ok(Arc::new(MarkerInterceptor))
        }
    }

    #[test]
    fn test_custom_advice_needs_registered_adapter() {
        let registry = DefaultAdvisorAdapterRegistry::new();
        let custom = Advice::custom("marker", Marker);

        let err = registry.wrap(custom.clone()).unwrap_err();
        assert!(matches!(err, AopError::UnknownAdviceType { ref kind } if kind == "marker"));

        registry.register_adapter(Arc::new(MarkerAdapter));
        let advisor = registry.wrap(custom).unwrap();
        assert_eq!(registry.interceptors(&advisor).unwrap().len(), 1);
    }

    #[test]
    fn test_wrap_instance_accepts_advisors_and_advice() {
        let registry = DefaultAdvisorAdapterRegistry::new();
        let advice = Advice::around(|invocation| invocation.proceed());
        let advisor = Advisor::for_advice(advice.clone());

        let holder = Instance::new(advisor.clone(), TypeInfo::class("AdvisorHolder").build());
        assert!(registry.wrap_instance(&holder).unwrap().ptr_eq(&advisor));

        let bare = Instance::new(advice.clone(), TypeInfo::class("AdviceHolder").build());
        assert!(registry.wrap_instance(&bare).unwrap().advice().ptr_eq(&advice));

        let neither = Instance::string("nope");
        assert!(registry.wrap_instance(&neither).is_err());
    }
}
