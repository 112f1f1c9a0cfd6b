use std::sync::Arc;

use tracing::debug;
use trellis_core::{Instance, TypeInfo};

use super::handler::{ProxyHandle, ProxyKind};
use super::types::{interface_proxy_type, subclass_proxy_type};
use crate::advice::Advice;
use crate::advisor::Advisor;
use crate::config::{AdvisedSupport, AdvisedSupportListener, ProxyConfig};
use crate::error::AopError;
use crate::support::{is_proxy_type, trellis_proxy_type};
use crate::target::TargetSource;

const PROXY_MARKER_PREFIX: &str = "trellis.aop.";

/// A configured proxy strategy, ready to produce proxy objects
#[derive(Clone)]
pub enum AopProxy {
    Interface(Arc<AdvisedSupport>),
    Subclass(Arc<AdvisedSupport>),
}

impl AopProxy {
    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        match self {
            Self::Interface(advised) | Self::Subclass(advised) => advised,
        }
    }

    pub fn is_subclass_proxy(&self) -> bool {
        matches!(self, Self::Subclass(_))
    }

    fn synthesize(&self) -> Result<(TypeInfo, ProxyKind), AopError> {
        match self {
            Self::Interface(advised) => interface_proxy_type(advised),
            Self::Subclass(advised) => subclass_proxy_type(advised),
        }
    }

    /// Type a proxy would have, without creating one
    pub fn proxy_type(&self) -> Result<TypeInfo, AopError> {
        self.synthesize().map(|(proxy_type, _)| proxy_type)
    }

    pub fn get_proxy(&self) -> Result<Instance, AopError> {
        let (proxy_type, kind) = self.synthesize()?;
        debug!(
            proxy_type = %proxy_type,
            target = %self.advised().target_source().describe(),
            "Creating {} proxy",
            if self.is_subclass_proxy() { "subclass" } else { "interface" }
        );
        Ok(Instance::new(ProxyHandle::new(kind, self.advised().clone()), proxy_type))
    }
}

/// Chooses the proxy strategy for a configuration
pub trait AopProxyFactory: Send + Sync {
    fn create_aop_proxy(&self, config: Arc<AdvisedSupport>) -> Result<AopProxy, AopError>;
}

/// Subclass proxies when asked for (or when there is no interface to
/// implement), interface proxies otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAopProxyFactory;

impl DefaultAopProxyFactory {
    fn has_no_user_supplied_interfaces(config: &AdvisedSupport) -> bool {
        let marker = trellis_proxy_type();
        let interfaces = config.interfaces();
        interfaces.is_empty() || (interfaces.len() == 1 && interfaces[0] == marker)
    }
}

impl AopProxyFactory for DefaultAopProxyFactory {
    fn create_aop_proxy(&self, config: Arc<AdvisedSupport>) -> Result<AopProxy, AopError> {
        if config.is_optimize() || config.is_proxy_target_class() || Self::has_no_user_supplied_interfaces(&config) {
            let target_class = config.target_class().ok_or_else(|| {
                AopError::config(
                    "TargetSource cannot determine target class: either an interface or a target is required for proxy creation",
                )
            })?;
            if target_class.is_interface() || is_proxy_type(&target_class) {
                return Ok(AopProxy::Interface(config));
            }
            return Ok(AopProxy::Subclass(config));
        }
        Ok(AopProxy::Interface(config))
    }
}

/// Programmatic proxy creation.
///
/// ```ignore
/// let factory = ProxyFactory::for_target(service);
/// factory.add_advice(Advice::around(|invocation| invocation.proceed()))?;
/// let proxy = factory.get_proxy()?;
/// ```
pub struct ProxyFactory {
    advised: Arc<AdvisedSupport>,
    aop_proxy_factory: Arc<dyn AopProxyFactory>,
}

impl Default for ProxyFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self {
            advised: Arc::new(AdvisedSupport::new()),
            aop_proxy_factory: Arc::new(DefaultAopProxyFactory),
        }
    }

    pub fn with_config(config: ProxyConfig) -> Self {
        Self {
            advised: Arc::new(AdvisedSupport::with_config(config)),
            aop_proxy_factory: Arc::new(DefaultAopProxyFactory),
        }
    }

    /// Proxy `target`, implementing every interface its type implements
    pub fn for_target(target: Instance) -> Self {
        let factory = Self::new();
        let user_interfaces = target
            .type_info()
            .all_interfaces()
            .into_iter()
            .filter(|i| !i.name().starts_with(PROXY_MARKER_PREFIX));
        for interface in user_interfaces {
            if let Err(err) = factory.advised.add_interface(interface) {
                debug!(error = %err, "Skipping interface of proxy target");
            }
        }
        factory.advised.set_target(target);
        factory
    }

    /// Proxy with no target: `advice` has to answer every call
    pub fn for_interface(interface: TypeInfo, advice: Advice) -> Result<Self, AopError> {
        let factory = Self::new();
        factory.advised.add_interface(interface)?;
        factory.advised.add_advice(advice)?;
        Ok(factory)
    }

    pub fn for_interface_with_target_source(
        interface: TypeInfo,
        target_source: Arc<dyn TargetSource>,
    ) -> Result<Self, AopError> {
        let factory = Self::new();
        factory.advised.add_interface(interface)?;
        factory.advised.set_target_source(target_source);
        Ok(factory)
    }

    /// The live configuration shared with every proxy this factory creates
    pub fn advised(&self) -> &Arc<AdvisedSupport> {
        &self.advised
    }

    pub fn set_aop_proxy_factory(&mut self, factory: Arc<dyn AopProxyFactory>) {
        self.aop_proxy_factory = factory;
    }

    pub fn add_advice(&self, advice: Advice) -> Result<(), AopError> {
        self.advised.add_advice(advice)
    }

    pub fn add_advisor(&self, advisor: Advisor) -> Result<(), AopError> {
        self.advised.add_advisor(advisor)
    }

    pub fn add_advisors(&self, advisors: Vec<Advisor>) -> Result<(), AopError> {
        self.advised.add_advisors(advisors)
    }

    pub fn add_interface(&self, interface: TypeInfo) -> Result<(), AopError> {
        self.advised.add_interface(interface)
    }

    pub fn set_target(&self, target: Instance) {
        self.advised.set_target(target);
    }

    pub fn set_target_source(&self, target_source: Arc<dyn TargetSource>) {
        self.advised.set_target_source(target_source);
    }

    pub fn set_proxy_target_class(&self, value: bool) {
        self.advised.set_proxy_target_class(value);
    }

    pub fn set_expose_proxy(&self, value: bool) {
        self.advised.set_expose_proxy(value);
    }

    pub fn set_opaque(&self, value: bool) {
        self.advised.set_opaque(value);
    }

    pub fn set_optimize(&self, value: bool) {
        self.advised.set_optimize(value);
    }

    pub fn set_frozen(&self, value: bool) {
        self.advised.set_frozen(value);
    }

    pub fn set_pre_filtered(&self, value: bool) {
        self.advised.set_pre_filtered(value);
    }

    pub fn add_listener(&self, listener: Arc<dyn AdvisedSupportListener>) {
        self.advised.add_listener(listener);
    }

    /// Pick the proxy strategy, activating the configuration on first use
    pub fn create_aop_proxy(&self) -> Result<AopProxy, AopError> {
        self.advised.activate();
        self.aop_proxy_factory.create_aop_proxy(self.advised.clone())
    }

    pub fn get_proxy(&self) -> Result<Instance, AopError> {
        self.create_aop_proxy()?.get_proxy()
    }

    pub fn proxy_type(&self) -> Result<TypeInfo, AopError> {
        self.create_aop_proxy()?.proxy_type()
    }
}
