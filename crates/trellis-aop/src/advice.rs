//! Advice shapes: the behaviour an advisor injects around a method call.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use trellis_core::{Instance, InvocationError, InvocationResult, Method, TypeInfo};

use crate::invocation::MethodInvocation;

/// Around advice: full control over the invocation.
///
/// Implementations call `invocation.proceed()` to run the rest of the chain
/// and the target method; not calling it short-circuits the call.
pub trait MethodInterceptor: Send + Sync {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Advice run before the method; an error aborts the call
pub trait MethodBeforeAdvice: Send + Sync {
    fn before(&self, method: &Method, args: &[Instance], target: Option<&Instance>) -> Result<(), InvocationError>;
}

/// Advice run after the method returned normally
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(
        &self,
        return_value: Option<&Instance>,
        method: &Method,
        args: &[Instance],
        target: Option<&Instance>,
    ) -> Result<(), InvocationError>;
}

/// Advice run when the method fails with an error it `handles`.
///
/// The original error is rethrown afterwards unless `after_throwing` itself
/// fails, in which case its error replaces the original.
pub trait ThrowsAdvice: Send + Sync {
    fn handles(&self, error: &InvocationError) -> bool;

    fn after_throwing(
        &self,
        method: &Method,
        args: &[Instance],
        target: Option<&Instance>,
        error: &InvocationError,
    ) -> Result<(), InvocationError>;
}

/// Interceptor that adds interface implementations to the proxy
pub trait IntroductionInterceptor: MethodInterceptor {
    /// Interfaces introduced to the proxy
    fn interfaces(&self) -> Vec<TypeInfo>;

    fn implements_interface(&self, interface: &TypeInfo) -> bool {
        self.interfaces().iter().any(|introduced| interface.is_assignable_from(introduced))
    }
}

/// One piece of advice, tagged by shape
#[derive(Clone)]
pub enum Advice {
    Interceptor(Arc<dyn MethodInterceptor>),
    Before(Arc<dyn MethodBeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    Throws(Arc<dyn ThrowsAdvice>),
    Introduction(Arc<dyn IntroductionInterceptor>),
    /// Advice shape understood only by a registered adapter
    Custom {
        kind: String,
        advice: Arc<dyn Any + Send + Sync>,
    },
}

impl Advice {
    pub fn interceptor<I: MethodInterceptor + 'static>(interceptor: I) -> Self {
        Self::Interceptor(Arc::new(interceptor))
    }

    /// Around advice from a closure
    pub fn around<F>(f: F) -> Self
    where
        F: Fn(&mut dyn MethodInvocation) -> InvocationResult + Send + Sync + 'static,
    {
        Self::Interceptor(Arc::new(FnInterceptor(f)))
    }

    pub fn before<A: MethodBeforeAdvice + 'static>(advice: A) -> Self {
        Self::Before(Arc::new(advice))
    }

    pub fn after_returning<A: AfterReturningAdvice + 'static>(advice: A) -> Self {
        Self::AfterReturning(Arc::new(advice))
    }

    pub fn throws<A: ThrowsAdvice + 'static>(advice: A) -> Self {
        Self::Throws(Arc::new(advice))
    }

    pub fn introduction<I: IntroductionInterceptor + 'static>(interceptor: I) -> Self {
        Self::Introduction(Arc::new(interceptor))
    }

    pub fn custom<T: Any + Send + Sync>(kind: impl Into<String>, advice: T) -> Self {
        Self::Custom {
            kind: kind.into(),
            advice: Arc::new(advice),
        }
    }

    /// Short name of the advice shape
    pub fn kind(&self) -> &str {
        match self {
            Self::Interceptor(_) => "interceptor",
            Self::Before(_) => "before",
            Self::AfterReturning(_) => "after-returning",
            Self::Throws(_) => "throws",
            Self::Introduction(_) => "introduction",
            Self::Custom { kind, .. } => kind,
        }
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Self::Introduction(_))
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::Interceptor(a) => Arc::as_ptr(a) as *const (),
            Self::Before(a) => Arc::as_ptr(a) as *const (),
            Self::AfterReturning(a) => Arc::as_ptr(a) as *const (),
            Self::Throws(a) => Arc::as_ptr(a) as *const (),
            Self::Introduction(a) => Arc::as_ptr(a) as *const (),
            Self::Custom { advice, .. } => Arc::as_ptr(advice) as *const (),
        }
    }

    /// Identity comparison: both handles share the same advice object
    pub fn ptr_eq(&self, other: &Advice) -> bool {
        self.data_ptr() == other.data_ptr()
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice({}@{:p})", self.kind(), self.data_ptr())
    }
}

struct FnInterceptor<F>(F);

impl<F> MethodInterceptor for FnInterceptor<F>
where
    F: Fn(&mut dyn MethodInvocation) -> InvocationResult + Send + Sync,
{
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        (self.0)(invocation)
    }

    fn name(&self) -> &str {
        "around"
    }
}

/// Introduction that forwards introduced interface methods to a delegate object
pub struct DelegatingIntroductionInterceptor {
    delegate: Instance,
    interfaces: Vec<TypeInfo>,
}

impl DelegatingIntroductionInterceptor {
    /// Introduce every interface the delegate implements
    pub fn new(delegate: Instance) -> Self {
        let interfaces = delegate.type_info().all_interfaces();
        Self { delegate, interfaces }
    }

    pub fn with_interfaces(delegate: Instance, interfaces: Vec<TypeInfo>) -> Self {
        Self { delegate, interfaces }
    }

    /// Stop introducing `interface`
    pub fn suppress_interface(&mut self, interface: &TypeInfo) {
        self.interfaces.retain(|i| i != interface);
    }

    pub fn delegate(&self) -> &Instance {
        &self.delegate
    }

    fn is_method_on_introduced_interface(&self, method: &Method) -> bool {
        let declaring = method.declaring_type();
        !declaring.is_empty()
            && declaring != TypeInfo::object().name()
            && self.interfaces.iter().any(|i| i.is_subtype_of(declaring))
    }
}

impl MethodInterceptor for DelegatingIntroductionInterceptor {
    fn invoke(&self, invocation: &mut dyn MethodInvocation) -> InvocationResult {
        if !self.is_method_on_introduced_interface(invocation.method()) {
            return invocation.proceed();
        }
        let result = self
            .delegate
            .invoke_method(invocation.method(), invocation.arguments())?;
        // keep fluent calls on the delegate going through the proxy
        match result {
            Some(value) if value.ptr_eq(&self.delegate) => Ok(Some(invocation.proxy().clone())),
            other => Ok(other),
        }
    }

    fn name(&self) -> &str {
        "DelegatingIntroductionInterceptor"
    }
}

impl IntroductionInterceptor for DelegatingIntroductionInterceptor {
    fn interfaces(&self) -> Vec<TypeInfo> {
        self.interfaces.clone()
    }
}

impl fmt::Debug for DelegatingIntroductionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatingIntroductionInterceptor")
            .field("delegate", &self.delegate)
            .field("interfaces", &self.interfaces)
            .finish()
    }
}
