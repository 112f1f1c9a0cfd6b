//! Advisors pair a piece of advice with the filter deciding where it applies.

use std::fmt;
use std::sync::Arc;

use trellis_core::TypeInfo;

use crate::advice::{Advice, IntroductionInterceptor};
use crate::error::AopError;
use crate::pointcut::{ClassFilter, Pointcut, TrueClassFilter, TruePointcut};

pub const HIGHEST_PRECEDENCE: i32 = i32::MIN;
pub const LOWEST_PRECEDENCE: i32 = i32::MAX;

/// Advisor driven by a pointcut
pub trait PointcutAdvisor: Send + Sync {
    fn pointcut(&self) -> Arc<dyn Pointcut>;
    fn advice(&self) -> Advice;

    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }
}

/// Advisor adding interfaces to proxies of matching classes
pub trait IntroductionAdvisor: Send + Sync {
    fn class_filter(&self) -> Arc<dyn ClassFilter>;
    fn advice(&self) -> Advice;
    fn interfaces(&self) -> Vec<TypeInfo>;

    /// Check the introduced interfaces before the advisor is added to a proxy
    fn validate_interfaces(&self) -> Result<(), AopError>;

    fn order(&self) -> i32 {
        LOWEST_PRECEDENCE
    }
}

#[derive(Clone)]
pub enum Advisor {
    Pointcut(Arc<dyn PointcutAdvisor>),
    Introduction(Arc<dyn IntroductionAdvisor>),
    /// Applies to every method without a pointcut
    Plain(Advice),
}

impl Advisor {
    /// Advisor applying `advice` to every method
    pub fn for_advice(advice: Advice) -> Self {
        Self::Pointcut(Arc::new(DefaultPointcutAdvisor::new(advice)))
    }

    pub fn with_pointcut(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Self::Pointcut(Arc::new(DefaultPointcutAdvisor::with_pointcut(pointcut, advice)))
    }

    pub fn advice(&self) -> Advice {
        match self {
            Self::Pointcut(a) => a.advice(),
            Self::Introduction(a) => a.advice(),
            Self::Plain(advice) => advice.clone(),
        }
    }

    pub fn order(&self) -> i32 {
        match self {
            Self::Pointcut(a) => a.order(),
            Self::Introduction(a) => a.order(),
            Self::Plain(_) => LOWEST_PRECEDENCE,
        }
    }

    pub fn is_introduction(&self) -> bool {
        matches!(self, Self::Introduction(_))
    }

    pub fn ptr_eq(&self, other: &Advisor) -> bool {
        match (self, other) {
            (Self::Pointcut(a), Self::Pointcut(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Self::Introduction(a), Self::Introduction(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            }
            (Self::Plain(a), Self::Plain(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Whether this advisor could apply to any method of `target_class`
    pub fn can_apply(&self, target_class: &TypeInfo, has_introductions: bool) -> bool {
        match self {
            Self::Introduction(advisor) => advisor.class_filter().matches(target_class),
            Self::Pointcut(advisor) => {
                can_apply_pointcut(advisor.pointcut().as_ref(), target_class, has_introductions)
            }
            Self::Plain(_) => true,
        }
    }
}

impl fmt::Debug for Advisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Self::Pointcut(_) => "Pointcut",
            Self::Introduction(_) => "Introduction",
            Self::Plain(_) => "Plain",
        };
        write!(f, "Advisor::{}({:?}, order={})", shape, self.advice(), self.order())
    }
}

/// Whether `pointcut` matches at least one method visible on `target_class`
pub fn can_apply_pointcut(pointcut: &dyn Pointcut, target_class: &TypeInfo, has_introductions: bool) -> bool {
    if !pointcut.class_filter().matches(target_class) {
        return false;
    }
    let matcher = pointcut.method_matcher();
    target_class.all_methods().iter().any(|method| {
        if matcher.is_introduction_aware() {
            matcher.matches_with_introductions(method, target_class, has_introductions)
        } else {
            matcher.matches(method, target_class)
        }
    })
}

/// The candidates that apply to `target_class`, introductions first
pub fn find_advisors_that_can_apply(candidates: &[Advisor], target_class: &TypeInfo) -> Vec<Advisor> {
    let mut eligible: Vec<Advisor> = candidates
        .iter()
        .filter(|a| a.is_introduction() && a.can_apply(target_class, false))
        .cloned()
        .collect();
    let has_introductions = !eligible.is_empty();
    eligible.extend(
        candidates
            .iter()
            .filter(|a| !a.is_introduction() && a.can_apply(target_class, has_introductions))
            .cloned(),
    );
    eligible
}

/// Stable sort by order; equal orders keep their registration order
pub fn sort_advisors(advisors: &mut [Advisor]) {
    advisors.sort_by_key(Advisor::order);
}

/// Pointcut advisor holding its pointcut and advice directly
pub struct DefaultPointcutAdvisor {
    pointcut: Arc<dyn Pointcut>,
    advice: Advice,
    order: i32,
}

impl DefaultPointcutAdvisor {
    /// Applies to every method
    pub fn new(advice: Advice) -> Self {
        Self::with_pointcut(Arc::new(TruePointcut), advice)
    }

    pub fn with_pointcut(pointcut: Arc<dyn Pointcut>, advice: Advice) -> Self {
        Self {
            pointcut,
            advice,
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl PointcutAdvisor for DefaultPointcutAdvisor {
    fn pointcut(&self) -> Arc<dyn Pointcut> {
        self.pointcut.clone()
    }

    fn advice(&self) -> Advice {
        self.advice.clone()
    }

    fn order(&self) -> i32 {
        self.order
    }
}

/// Introduction advisor around an [`IntroductionInterceptor`]
pub struct DefaultIntroductionAdvisor {
    interceptor: Arc<dyn IntroductionInterceptor>,
    interfaces: Vec<TypeInfo>,
    class_filter: Arc<dyn ClassFilter>,
    order: i32,
}

impl DefaultIntroductionAdvisor {
    /// Introduce every interface the interceptor declares
    pub fn new(interceptor: Arc<dyn IntroductionInterceptor>) -> Self {
        let interfaces = interceptor.interfaces();
        Self {
            interceptor,
            interfaces,
            class_filter: Arc::new(TrueClassFilter),
            order: LOWEST_PRECEDENCE,
        }
    }

    /// Introduce only `interface`
    pub fn for_interface(interceptor: Arc<dyn IntroductionInterceptor>, interface: TypeInfo) -> Self {
        Self {
            interceptor,
            interfaces: vec![interface],
            class_filter: Arc::new(TrueClassFilter),
            order: LOWEST_PRECEDENCE,
        }
    }

    pub fn with_class_filter(mut self, class_filter: Arc<dyn ClassFilter>) -> Self {
        self.class_filter = class_filter;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl IntroductionAdvisor for DefaultIntroductionAdvisor {
    fn class_filter(&self) -> Arc<dyn ClassFilter> {
        self.class_filter.clone()
    }

    fn advice(&self) -> Advice {
        Advice::Introduction(self.interceptor.clone())
    }

    fn interfaces(&self) -> Vec<TypeInfo> {
        self.interfaces.clone()
    }

    fn validate_interfaces(&self) -> Result<(), AopError> {
        for interface in &self.interfaces {
            if !interface.is_interface() {
                return Err(AopError::config(format!(
                    "Class [{}] is not an interface; cannot be used in an introduction",
                    interface
                )));
            }
            if !self.interceptor.implements_interface(interface) {
                return Err(AopError::config(format!(
                    "Introduction interceptor [{}] does not implement interface [{}] specified for introduction",
                    self.interceptor.name(),
                    interface
                )));
            }
        }
        Ok(())
    }

    fn order(&self) -> i32 {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::DelegatingIntroductionInterceptor;
    use crate::pointcut::{NameMatchMethodPointcut, RootClassFilter};
    use trellis_core::{Instance, Method};

    fn noop() -> Advice {
        Advice::around(|invocation| invocation.proceed())
    }

    #[test]
    fn test_can_apply_checks_class_and_methods() {
        let account = TypeInfo::class("Account")
            .method(Method::new("withdraw").param(TypeInfo::int()))
            .build();
        let other = TypeInfo::class("Ledger").build();

        let withdraw_only = Advisor::with_pointcut(
            Arc::new(
                NameMatchMethodPointcut::new(["withdraw"])
                    .with_class_filter(Arc::new(RootClassFilter::new(account.clone()))),
            ),
            noop(),
        );
        assert!(withdraw_only.can_apply(&account, false));
        assert!(!withdraw_only.can_apply(&other, false));

        let everything = Advisor::for_advice(noop());
        assert!(everything.can_apply(&other, false));
    }

    #[test]
    fn test_sort_is_stable_for_equal_orders() {
        let first = Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(noop()).with_order(5)));
        let second = Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(noop()).with_order(5)));
        let early = Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(noop()).with_order(1)));

        let mut advisors = vec![first.clone(), second.clone(), early.clone()];
        sort_advisors(&mut advisors);

        assert!(advisors[0].ptr_eq(&early));
        assert!(advisors[1].ptr_eq(&first));
        assert!(advisors[2].ptr_eq(&second));
    }

    #[test]
    fn test_introduction_interfaces_are_validated() {
        let lockable = TypeInfo::interface("Lockable")
            .method(Method::new("lock"))
            .build();
        let mixin_type = TypeInfo::class("LockMixin").implements(&lockable).build();
        let mixin = Instance::new((), mixin_type.clone());
        let interceptor = Arc::new(DelegatingIntroductionInterceptor::new(mixin));

        let advisor = DefaultIntroductionAdvisor::new(interceptor.clone());
        assert!(advisor.validate_interfaces().is_ok());
        assert_eq!(advisor.interfaces(), vec![lockable]);

        let not_interface = DefaultIntroductionAdvisor::for_interface(interceptor.clone(), mixin_type);
        assert!(not_interface.validate_interfaces().unwrap_err().is_config());

        let unrelated = TypeInfo::interface("Auditable").build();
        let unimplemented = DefaultIntroductionAdvisor::for_interface(interceptor, unrelated);
        let err = unimplemented.validate_interfaces().unwrap_err();
        assert!(err.to_string().contains("does not implement interface [Auditable]"));
    }
}
