//! Synthesis of proxy types: interface proxies and subclass proxies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;
use trellis_core::{Method, TypeInfo};

use super::handler::{dispatch, dispatch_unadvised, ProxyKind};
use crate::config::AdvisedSupport;
use crate::error::AopError;
use crate::support::{advised_type, is_proxy_type, target_class_aware_type, trellis_proxy_type};

static PROXY_SEQUENCE: AtomicUsize = AtomicUsize::new(0);

fn next_sequence() -> usize {
    PROXY_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// User interfaces plus the proxy marker interfaces
pub(crate) fn complete_proxied_interfaces(advised: &AdvisedSupport, for_interface_proxy: bool) -> Vec<TypeInfo> {
    let mut interfaces = advised.interfaces();
    if interfaces.is_empty() && for_interface_proxy {
        if let Some(target_class) = advised.target_class() {
            if target_class.is_interface() {
                interfaces.push(target_class);
            } else if is_proxy_type(&target_class) {
                interfaces.extend(target_class.interfaces().iter().cloned());
            }
        }
    }
    let mut markers = vec![trellis_proxy_type()];
    if !advised.is_opaque() {
        markers.push(advised_type());
    }
    markers.push(target_class_aware_type());
    for marker in markers {
        if !interfaces.iter().any(|i| i.is_subtype_of(marker.name())) {
            interfaces.push(marker);
        }
    }
    interfaces
}

fn advised_method(original: &Method) -> Method {
    let target_method = original.clone();
    Method::new(original.name())
        .params(original.parameter_types())
        .with_return_type(original.return_type().clone())
        .body(move |proxy, args| dispatch(proxy, &target_method, args))
}

fn pass_through_method(original: &Method) -> Method {
    let target_method = original.clone();
    Method::new(original.name())
        .params(original.parameter_types())
        .with_return_type(original.return_type().clone())
        .body(move |proxy, args| dispatch_unadvised(proxy, &target_method, args))
}

/// A final type implementing every proxied interface
pub(crate) fn interface_proxy_type(advised: &AdvisedSupport) -> Result<(TypeInfo, ProxyKind), AopError> {
    let interfaces = complete_proxied_interfaces(advised, true);
    let mut builder = TypeInfo::class(format!("$Proxy{}", next_sequence())).final_class();
    for interface in &interfaces {
        builder = builder.implements(interface);
    }

    let mut seen = HashSet::new();
    let mut equals_defined = false;
    let mut hash_code_defined = false;
    for interface in &interfaces {
        for method in interface.all_methods() {
            if !seen.insert(method.signature()) {
                continue;
            }
            equals_defined |= method.is_equals_method();
            hash_code_defined |= method.is_hash_code_method();
            builder = builder.method(advised_method(&method));
        }
    }
    for method in TypeInfo::object().declared_methods() {
        if seen.insert(method.signature()) {
            builder = builder.method(advised_method(method));
        }
    }

    Ok((
        builder.build(),
        ProxyKind::Interface {
            equals_defined,
            hash_code_defined,
        },
    ))
}

/// A type extending the target class and overriding every overridable method
pub(crate) fn subclass_proxy_type(advised: &AdvisedSupport) -> Result<(TypeInfo, ProxyKind), AopError> {
    let target_class = advised.target_class().ok_or_else(|| {
        AopError::config("TargetSource cannot determine target class: either an interface or a target is required for proxy creation")
    })?;
    if target_class.is_final() || target_class.is_interface() || target_class.is_primitive() || target_class.is_container() {
        return Err(AopError::config(format!(
            "Could not generate subclass of class [{}]: common causes of this problem include using a final class or a non-visible class",
            target_class
        )));
    }

    let extra_interfaces: Vec<TypeInfo> = complete_proxied_interfaces(advised, false)
        .into_iter()
        .filter(|i| !target_class.is_subtype_of(i.name()))
        .collect();
    let mut builder = TypeInfo::class(format!("{}$$TrellisProxy$${}", target_class.name(), next_sequence()))
        .extends(&target_class);
    for interface in &extra_interfaces {
        builder = builder.implements(interface);
    }

    let mut seen = HashSet::new();
    let methods = target_class
        .all_methods()
        .into_iter()
        .chain(extra_interfaces.iter().flat_map(TypeInfo::all_methods));
    for method in methods {
        if !seen.insert(method.signature()) {
            continue;
        }
        if method.is_final() || !method.is_public() {
            debug!(
                "Method [{}] cannot be overridden by a subclass proxy; calls go straight to the target without advice",
                method
            );
            builder = builder.method(pass_through_method(&method));
        } else {
            builder = builder.method(advised_method(&method));
        }
    }

    Ok((builder.build(), ProxyKind::Subclass))
}
