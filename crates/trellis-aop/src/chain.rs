//! Building the interceptor chain for one method of one target class.

use std::fmt;
use std::sync::Arc;

use trellis_core::{Method, TypeInfo};
use tracing::trace;

use crate::adapter::{global_adapter_registry, AdvisorAdapterRegistry};
use crate::advice::MethodInterceptor;
use crate::advisor::Advisor;
use crate::config::AdvisedSupport;
use crate::error::AopError;
use crate::pointcut::MethodMatcher;

#[derive(Clone)]
pub enum InterceptorChainElement {
    Static(Arc<dyn MethodInterceptor>),
    /// Runs only when `matcher` accepts the actual arguments of the call
    Dynamic {
        interceptor: Arc<dyn MethodInterceptor>,
        matcher: Arc<dyn MethodMatcher>,
    },
}

impl InterceptorChainElement {
    pub fn interceptor(&self) -> &Arc<dyn MethodInterceptor> {
        match self {
            Self::Static(interceptor) => interceptor,
            Self::Dynamic { interceptor, .. } => interceptor,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic { .. })
    }
}

impl fmt::Debug for InterceptorChainElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(i) => write!(f, "Static({})", i.name()),
            Self::Dynamic { interceptor, .. } => write!(f, "Dynamic({})", interceptor.name()),
        }
    }
}

pub trait AdvisorChainFactory: Send + Sync {
    fn interceptors_and_dynamic_interception_advice(
        &self,
        config: &AdvisedSupport,
        method: &Method,
        target_class: &TypeInfo,
    ) -> Result<Vec<InterceptorChainElement>, AopError>;
}

/// Chain factory filtering the configured advisors against the method
pub struct DefaultAdvisorChainFactory {
    registry: Arc<dyn AdvisorAdapterRegistry>,
}

impl DefaultAdvisorChainFactory {
    pub fn new() -> Self {
        Self {
            registry: global_adapter_registry(),
        }
    }

    pub fn with_registry(registry: Arc<dyn AdvisorAdapterRegistry>) -> Self {
        Self { registry }
    }
}

impl Default for DefaultAdvisorChainFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisorChainFactory for DefaultAdvisorChainFactory {
    fn interceptors_and_dynamic_interception_advice(
        &self,
        config: &AdvisedSupport,
        method: &Method,
        target_class: &TypeInfo,
    ) -> Result<Vec<InterceptorChainElement>, AopError> {
        let advisors = config.advisors();
        let pre_filtered = config.is_pre_filtered();
        let mut chain = Vec::with_capacity(advisors.len());
        let mut has_introductions: Option<bool> = None;

        for advisor in &advisors {
            match advisor {
                Advisor::Pointcut(pointcut_advisor) => {
                    let pointcut = pointcut_advisor.pointcut();
                    if !pre_filtered && !pointcut.class_filter().matches(target_class) {
                        continue;
                    }
                    let matcher = pointcut.method_matcher();
                    let matches = if matcher.is_introduction_aware() {
                        let introductions = *has_introductions
                            .get_or_insert_with(|| has_matching_introduction(&advisors, target_class));
                        matcher.matches_with_introductions(method, target_class, introductions)
                    } else {
                        matcher.matches(method, target_class)
                    };
                    if !matches {
                        continue;
                    }
                    let interceptors = self.registry.interceptors(advisor)?;
                    if matcher.is_runtime() {
                        chain.extend(interceptors.into_iter().map(|interceptor| {
                            InterceptorChainElement::Dynamic {
                                interceptor,
                                matcher: matcher.clone(),
                            }
                        }));
                    } else {
                        chain.extend(interceptors.into_iter().map(InterceptorChainElement::Static));
                    }
                }
                Advisor::Introduction(introduction) => {
                    if pre_filtered || introduction.class_filter().matches(target_class) {
                        chain.extend(
                            self.registry
                                .interceptors(advisor)?
                                .into_iter()
                                .map(InterceptorChainElement::Static),
                        );
                    }
                }
                Advisor::Plain(_) => {
                    chain.extend(
                        self.registry
                            .interceptors(advisor)?
                            .into_iter()
                            .map(InterceptorChainElement::Static),
                    );
                }
            }
        }

        trace!(method = %method, target = %target_class, links = chain.len(), "Built interceptor chain");
        Ok(chain)
    }
}

fn has_matching_introduction(advisors: &[Advisor], target_class: &TypeInfo) -> bool {
    advisors.iter().any(|advisor| match advisor {
        Advisor::Introduction(introduction) => introduction.class_filter().matches(target_class),
        _ => false,
    })
}
