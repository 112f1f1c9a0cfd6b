//! Proxy objects: synthesized types whose methods route through an advice chain.

pub mod factory;
mod handler;
mod types;

pub use factory::{AopProxy, AopProxyFactory, DefaultAopProxyFactory, ProxyFactory};

use std::sync::Arc;

use trellis_core::{Instance, TypeInfo};

use crate::config::AdvisedSupport;
use handler::{ProxyHandle, ProxyKind};

/// Whether `candidate` is a proxy created by this crate
pub fn is_aop_proxy(candidate: &Instance) -> bool {
    candidate.is::<ProxyHandle>()
}

pub fn is_interface_proxy(candidate: &Instance) -> bool {
    matches!(
        candidate.downcast_ref::<ProxyHandle>().map(ProxyHandle::kind),
        Some(ProxyKind::Interface { .. })
    )
}

pub fn is_subclass_proxy(candidate: &Instance) -> bool {
    matches!(
        candidate.downcast_ref::<ProxyHandle>().map(ProxyHandle::kind),
        Some(ProxyKind::Subclass)
    )
}

/// Configuration behind a proxy; `None` for plain objects and opaque proxies
pub fn advised(candidate: &Instance) -> Option<Arc<AdvisedSupport>> {
    candidate
        .downcast_ref::<ProxyHandle>()
        .map(|handle| handle.advised().clone())
        .filter(|advised| !advised.is_opaque())
}

/// Class of the object behind `candidate`: the target class for proxies,
/// the runtime type otherwise
pub fn target_class(candidate: &Instance) -> TypeInfo {
    candidate
        .downcast_ref::<ProxyHandle>()
        .and_then(|handle| handle.advised().target_class())
        .unwrap_or_else(|| candidate.type_info().clone())
}

/// Fixed target behind a proxy with a static target source
pub fn singleton_target(candidate: &Instance) -> Option<Instance> {
    candidate
        .downcast_ref::<ProxyHandle>()
        .and_then(|handle| handle.advised().target_source().static_target())
}

/// Target class behind any number of nested proxies
pub fn ultimate_target_class(candidate: &Instance) -> TypeInfo {
    let mut current = candidate.clone();
    while let Some(target) = singleton_target(&current) {
        current = target;
    }
    target_class(&current)
}
