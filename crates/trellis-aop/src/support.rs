//! Runtime types for AOP infrastructure and helpers to register advisors as beans.

use once_cell::sync::Lazy;
use trellis_core::{BeanDefinition, ConstructorCandidate, Instance, Method, TypeInfo};

use crate::advice::Advice;
use crate::advisor::Advisor;

static INFRASTRUCTURE: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::interface("trellis.aop.AopInfrastructureBean").build());
static ADVICE: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::interface("trellis.aop.Advice").build());
static ADVISOR: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::interface("trellis.aop.Advisor").build());
static POINTCUT: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::interface("trellis.aop.Pointcut").build());

static ADVICE_CLASS: Lazy<TypeInfo> = Lazy::new(|| {
    TypeInfo::class("trellis.aop.AdviceHolder")
        .implements(&ADVICE)
        .final_class()
        .build()
});
static ADVISOR_CLASS: Lazy<TypeInfo> = Lazy::new(|| {
    TypeInfo::class("trellis.aop.AdvisorHolder")
        .implements(&ADVISOR)
        .final_class()
        .build()
});

static TRELLIS_PROXY: Lazy<TypeInfo> = Lazy::new(|| TypeInfo::interface("trellis.aop.TrellisProxy").build());
static TARGET_CLASS_AWARE: Lazy<TypeInfo> = Lazy::new(|| {
    TypeInfo::interface("trellis.aop.TargetClassAware")
        .method(Method::new("getTargetClass").returns(TypeInfo::string()))
        .build()
});
static ADVISED: Lazy<TypeInfo> = Lazy::new(|| {
    TypeInfo::interface("trellis.aop.Advised")
        .extends(&TARGET_CLASS_AWARE)
        .method(Method::new("isFrozen").returns(TypeInfo::boolean()))
        .method(Method::new("isProxyTargetClass").returns(TypeInfo::boolean()))
        .method(Method::new("isExposeProxy").returns(TypeInfo::boolean()))
        .method(Method::new("isPreFiltered").returns(TypeInfo::boolean()))
        .method(Method::new("getAdvisorCount").returns(TypeInfo::int()))
        .method(Method::new("toProxyConfigString").returns(TypeInfo::string()))
        .build()
});

/// Marker for beans that make up the AOP machinery and must never be proxied
pub fn infrastructure_type() -> TypeInfo {
    INFRASTRUCTURE.clone()
}

pub fn advice_type() -> TypeInfo {
    ADVICE.clone()
}

pub fn advisor_type() -> TypeInfo {
    ADVISOR.clone()
}

pub fn pointcut_type() -> TypeInfo {
    POINTCUT.clone()
}

/// Marker implemented by every proxy
pub fn trellis_proxy_type() -> TypeInfo {
    TRELLIS_PROXY.clone()
}

/// Interface exposing the proxy configuration through the proxy itself
pub fn advised_type() -> TypeInfo {
    ADVISED.clone()
}

/// Interface reporting the class behind a proxy
pub fn target_class_aware_type() -> TypeInfo {
    TARGET_CLASS_AWARE.clone()
}

/// Whether beans of this type are part of the AOP machinery
pub fn is_infrastructure_class(bean_type: &TypeInfo) -> bool {
    [&*ADVICE, &*ADVISOR, &*POINTCUT, &*INFRASTRUCTURE]
        .iter()
        .any(|marker| marker.is_assignable_from(bean_type))
}

/// Whether `bean_type` is a synthesized proxy type
pub fn is_proxy_type(bean_type: &TypeInfo) -> bool {
    bean_type.is_subtype_of(TRELLIS_PROXY.name()) && !bean_type.is_interface()
}

/// Hold an advisor in a container object
pub fn advisor_instance(advisor: Advisor) -> Instance {
    Instance::new(advisor, ADVISOR_CLASS.clone())
}

/// Hold bare advice in a container object
pub fn advice_instance(advice: Advice) -> Instance {
    Instance::new(advice, ADVICE_CLASS.clone())
}

/// Singleton definition producing `advisor`; picked up by advisor lookups by type
pub fn advisor_definition(advisor: Advisor) -> BeanDefinition {
    BeanDefinition::new(ADVISOR_CLASS.clone())
        .constructor(ConstructorCandidate::no_arg(move || Ok(advisor_instance(advisor.clone()))))
}

/// Singleton definition producing bare `advice`, usable as a common interceptor
pub fn advice_definition(advice: Advice) -> BeanDefinition {
    BeanDefinition::new(ADVICE_CLASS.clone())
        .constructor(ConstructorCandidate::no_arg(move || Ok(advice_instance(advice.clone()))))
}
