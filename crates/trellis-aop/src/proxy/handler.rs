//! Call dispatch for synthesized proxy types.

use std::sync::Arc;

use tracing::{trace, warn};
use trellis_core::{Instance, InvocationError, InvocationResult, Method};

use crate::config::{equals_in_proxy, AdvisedSupport};
use crate::context::ProxyExposure;
use crate::error::AopError;
use crate::invocation::{MethodInvocation, ReflectiveMethodInvocation};
use crate::support::{advised_type, target_class_aware_type};
use crate::target::TargetSource;

const INTERFACE_PROXY_SEED: i64 = 0x4A44_4B50;
const SUBCLASS_PROXY_SEED: i64 = 0x4347_4C42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProxyKind {
    /// Implements the proxied interfaces; equals/hashCode go through the
    /// chain only when an interface declares them
    Interface {
        equals_defined: bool,
        hash_code_defined: bool,
    },
    /// Extends the target class
    Subclass,
}

/// State carried by every proxy object
pub(crate) struct ProxyHandle {
    kind: ProxyKind,
    advised: Arc<AdvisedSupport>,
}

impl ProxyHandle {
    pub(crate) fn new(kind: ProxyKind, advised: Arc<AdvisedSupport>) -> Self {
        Self { kind, advised }
    }

    pub(crate) fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub(crate) fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    fn same_variant(&self, other: &ProxyHandle) -> bool {
        matches!(
            (self.kind, other.kind),
            (ProxyKind::Interface { .. }, ProxyKind::Interface { .. }) | (ProxyKind::Subclass, ProxyKind::Subclass)
        )
    }

    fn proxy_equals(&self, this: &Instance, other: Option<&Instance>) -> bool {
        match other {
            None => false,
            Some(other) if other.ptr_eq(this) => true,
            Some(other) => match other.downcast_ref::<ProxyHandle>() {
                Some(handle) if self.same_variant(handle) => equals_in_proxy(&self.advised, &handle.advised),
                _ => false,
            },
        }
    }

    fn proxy_hash_code(&self) -> i64 {
        let seed = match self.kind {
            ProxyKind::Interface { .. } => INTERFACE_PROXY_SEED,
            ProxyKind::Subclass => SUBCLASS_PROXY_SEED,
        };
        let source = self.advised.target_source();
        let target_identity = match source.static_target() {
            Some(target) => target.identity(),
            None => Arc::as_ptr(&source) as *const () as usize,
        };
        seed.wrapping_mul(13).wrapping_add(target_identity as i64)
    }
}

/// Hands a borrowed target back to a dynamic target source when the call ends
struct TargetRelease {
    source: Arc<dyn TargetSource>,
    target: Option<Instance>,
}

impl TargetRelease {
    fn new(source: &Arc<dyn TargetSource>, target: Option<Instance>) -> Self {
        Self {
            source: source.clone(),
            target,
        }
    }
}

impl Drop for TargetRelease {
    fn drop(&mut self) {
        if self.source.is_static() {
            return;
        }
        if let Some(target) = self.target.take() {
            if let Err(err) = self.source.release_target(&target) {
                warn!(error = %err, "Failed to release target to {}", self.source.kind());
            }
        }
    }
}

fn handle_of(proxy: &Instance) -> Result<&ProxyHandle, InvocationError> {
    proxy.downcast_ref::<ProxyHandle>().ok_or_else(|| {
        AopError::invocation(format!("[{}] is not a proxy object", proxy.type_info())).into()
    })
}

/// Answer methods of the proxy marker interfaces from the configuration
fn answer_marker_method(advised: &AdvisedSupport, method: &Method) -> Option<Option<Instance>> {
    let declaring = method.declaring_type();
    if declaring == target_class_aware_type().name() {
        return Some(advised.target_class().map(|class| Instance::string(class.name())));
    }
    if declaring != advised_type().name() {
        return None;
    }
    let config = advised.proxy_config();
    let value = match method.name() {
        "isFrozen" => Instance::boolean(config.frozen),
        "isProxyTargetClass" => Instance::boolean(config.proxy_target_class),
        "isExposeProxy" => Instance::boolean(config.expose_proxy),
        "isPreFiltered" => Instance::boolean(advised.is_pre_filtered()),
        "getAdvisorCount" => Instance::int(advised.advisor_count() as i64),
        "toProxyConfigString" => Instance::string(advised.to_proxy_config_string()),
        _ => return None,
    };
    Some(Some(value))
}

/// Run `method` on `proxy` through the advice chain
pub(crate) fn dispatch(proxy: &Instance, method: &Method, args: &[Instance]) -> InvocationResult {
    let handle = handle_of(proxy)?;
    let advised = handle.advised();

    let (own_equals, own_hash_code) = match handle.kind() {
        ProxyKind::Interface {
            equals_defined,
            hash_code_defined,
        } => (!equals_defined, !hash_code_defined),
        ProxyKind::Subclass => (true, true),
    };
    if own_equals && method.is_equals_method() {
        return Ok(Some(Instance::boolean(handle.proxy_equals(proxy, args.first()))));
    }
    if own_hash_code && method.is_hash_code_method() {
        return Ok(Some(Instance::int(handle.proxy_hash_code())));
    }
    if let Some(answer) = answer_marker_method(advised, method) {
        return Ok(answer);
    }

    let _exposure = advised.is_expose_proxy().then(|| ProxyExposure::enter(proxy));
    let target_source = advised.target_source();
    let target = target_source.get_target()?;
    let _release = TargetRelease::new(&target_source, target.clone());

    let target_class = target.as_ref().map(|t| t.type_info().clone());
    let chain_class = target_class.clone().unwrap_or_else(|| proxy.type_info().clone());
    let chain = advised.interceptors_and_dynamic_interception_advice(method, &chain_class)?;

    let result = if chain.is_empty() {
        invoke_target(target.as_ref(), method, args)?
    } else {
        trace!(method = %method, interceptors = chain.len(), "Proceeding through interceptor chain");
        let mut invocation = ReflectiveMethodInvocation::new(
            proxy.clone(),
            target.clone(),
            method.clone(),
            args.to_vec(),
            target_class,
            chain,
        );
        invocation.proceed()?
    };
    massage_return(proxy, target.as_ref(), method, result)
}

/// Forward straight to the target, bypassing advice (methods a subclass proxy cannot override)
pub(crate) fn dispatch_unadvised(proxy: &Instance, method: &Method, args: &[Instance]) -> InvocationResult {
    let handle = handle_of(proxy)?;
    let target_source = handle.advised().target_source();
    let target = target_source.get_target()?;
    let _release = TargetRelease::new(&target_source, target.clone());
    invoke_target(target.as_ref(), method, args)
}

fn invoke_target(target: Option<&Instance>, method: &Method, args: &[Instance]) -> InvocationResult {
    match target {
        Some(target) => target.invoke_method(method, args),
        None => Err(AopError::invocation(format!("No target available to invoke method [{}] on", method)).into()),
    }
}

/// Replace a returned `this` with the proxy when the declared return type allows it
fn massage_return(proxy: &Instance, target: Option<&Instance>, method: &Method, result: Option<Instance>) -> InvocationResult {
    match result {
        Some(value) => {
            let return_type = method.return_type();
            let returns_target = target.map(|t| value.ptr_eq(t)).unwrap_or(false);
            if returns_target
                && !return_type.is_object()
                && return_type.accepts(method.declaring_type(), proxy.type_info())
            {
                return Ok(Some(proxy.clone()));
            }
            Ok(Some(value))
        }
        None if method.return_type().is_primitive() => Err(AopError::invocation(format!(
            "Null return value from advice does not match primitive return type for: {}",
            method
        ))
        .into()),
        None => Ok(None),
    }
}
