//! Proxy configuration: flags, advisors, interfaces and the target source.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trellis_core::config::{env_flag, ConfigError, ConfigSource, ConfigTrait};
use trellis_core::{Instance, Method, TypeInfo};

use crate::advice::Advice;
use crate::advisor::{Advisor, DefaultIntroductionAdvisor, DefaultPointcutAdvisor};
use crate::chain::{AdvisorChainFactory, DefaultAdvisorChainFactory, InterceptorChainElement};
use crate::error::AopError;
use crate::target::{same_target_source, EmptyTargetSource, SingletonTargetSource, TargetSource};

/// Flags shared by every proxy-creating component
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Subclass the target class instead of implementing its interfaces
    pub proxy_target_class: bool,
    /// Allow aggressive optimizations; implies subclass proxies
    pub optimize: bool,
    /// Hide the `Advised` view of the configuration from proxy users
    pub opaque: bool,
    /// Publish the proxy to `AopContext::current_proxy` during calls
    pub expose_proxy: bool,
    /// Reject advisor changes once set
    pub frozen: bool,
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigTrait for ProxyConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = env_flag("TRELLIS_AOP_PROXY_TARGET_CLASS")? {
            config.proxy_target_class = v;
        }
        if let Some(v) = env_flag("TRELLIS_AOP_OPTIMIZE")? {
            config.optimize = v;
        }
        if let Some(v) = env_flag("TRELLIS_AOP_OPAQUE")? {
            config.opaque = v;
        }
        if let Some(v) = env_flag("TRELLIS_AOP_EXPOSE_PROXY")? {
            config.expose_proxy = v;
        }
        if let Some(v) = env_flag("TRELLIS_AOP_FROZEN")? {
            config.frozen = v;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        [
            ("proxy_target_class", "TRELLIS_AOP_PROXY_TARGET_CLASS"),
            ("optimize", "TRELLIS_AOP_OPTIMIZE"),
            ("opaque", "TRELLIS_AOP_OPAQUE"),
            ("expose_proxy", "TRELLIS_AOP_EXPOSE_PROXY"),
            ("frozen", "TRELLIS_AOP_FROZEN"),
        ]
        .into_iter()
        .map(|(field, var)| (field.to_string(), ConfigSource::for_env_var(var, false)))
        .collect()
    }
}

/// Notified when a proxy configuration is first used or its advice changes
pub trait AdvisedSupportListener: Send + Sync {
    fn activated(&self, advised: &AdvisedSupport);
    fn advice_changed(&self, advised: &AdvisedSupport);
}

/// Live configuration behind one or more proxies.
///
/// Proxies hold an `Arc` to this and read it on every call, so advisors added
/// after proxy creation take effect immediately unless the configuration is
/// frozen.
pub struct AdvisedSupport {
    config: RwLock<ProxyConfig>,
    target_source: RwLock<Arc<dyn TargetSource>>,
    pre_filtered: AtomicBool,
    interfaces: RwLock<Vec<TypeInfo>>,
    advisors: RwLock<Vec<Advisor>>,
    chain_factory: RwLock<Arc<dyn AdvisorChainFactory>>,
    method_cache: DashMap<String, Arc<Vec<InterceptorChainElement>>>,
    listeners: RwLock<Vec<Arc<dyn AdvisedSupportListener>>>,
    active: AtomicBool,
}

impl Default for AdvisedSupport {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvisedSupport {
    pub fn new() -> Self {
        Self::with_config(ProxyConfig::default())
    }

    pub fn with_config(config: ProxyConfig) -> Self {
        Self {
            config: RwLock::new(config),
            target_source: RwLock::new(Arc::new(EmptyTargetSource::new())),
            pre_filtered: AtomicBool::new(false),
            interfaces: RwLock::new(Vec::new()),
            advisors: RwLock::new(Vec::new()),
            chain_factory: RwLock::new(Arc::new(DefaultAdvisorChainFactory::new())),
            method_cache: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            active: AtomicBool::new(false),
        }
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        self.config.read().clone()
    }

    /// Copy the flags of `config`
    pub fn set_proxy_config(&self, config: ProxyConfig) {
        *self.config.write() = config;
    }

    pub fn set_proxy_target_class(&self, value: bool) {
        self.config.write().proxy_target_class = value;
    }

    pub fn is_proxy_target_class(&self) -> bool {
        self.config.read().proxy_target_class
    }

    pub fn set_optimize(&self, value: bool) {
        self.config.write().optimize = value;
    }

    pub fn is_optimize(&self) -> bool {
        self.config.read().optimize
    }

    pub fn set_opaque(&self, value: bool) {
        self.config.write().opaque = value;
    }

    pub fn is_opaque(&self) -> bool {
        self.config.read().opaque
    }

    pub fn set_expose_proxy(&self, value: bool) {
        self.config.write().expose_proxy = value;
    }

    pub fn is_expose_proxy(&self) -> bool {
        self.config.read().expose_proxy
    }

    pub fn set_frozen(&self, value: bool) {
        self.config.write().frozen = value;
    }

    pub fn is_frozen(&self) -> bool {
        self.config.read().frozen
    }

    /// Mark the advisors as already matched against the target class
    pub fn set_pre_filtered(&self, value: bool) {
        self.pre_filtered.store(value, Ordering::SeqCst);
    }

    pub fn is_pre_filtered(&self) -> bool {
        self.pre_filtered.load(Ordering::SeqCst)
    }

    pub fn set_target(&self, target: Instance) {
        self.set_target_source(Arc::new(SingletonTargetSource::new(target)));
    }

    pub fn set_target_source(&self, target_source: Arc<dyn TargetSource>) {
        *self.target_source.write() = target_source;
    }

    pub fn target_source(&self) -> Arc<dyn TargetSource> {
        self.target_source.read().clone()
    }

    pub fn target_class(&self) -> Option<TypeInfo> {
        self.target_source.read().target_class()
    }

    /// Use a target source that reports `target_class` but supplies no target
    pub fn set_target_class(&self, target_class: TypeInfo) {
        self.set_target_source(Arc::new(EmptyTargetSource::for_class(target_class)));
    }

    pub fn set_chain_factory(&self, factory: Arc<dyn AdvisorChainFactory>) {
        *self.chain_factory.write() = factory;
        self.advice_changed();
    }

    pub fn add_interface(&self, interface: TypeInfo) -> Result<(), AopError> {
        if !interface.is_interface() {
            return Err(AopError::config(format!("[{}] is not an interface", interface)));
        }
        {
            let mut interfaces = self.interfaces.write();
            if interfaces.contains(&interface) {
                return Ok(());
            }
            interfaces.push(interface);
        }
        self.advice_changed();
        Ok(())
    }

    pub fn remove_interface(&self, interface: &TypeInfo) -> bool {
        let removed = {
            let mut interfaces = self.interfaces.write();
            let before = interfaces.len();
            interfaces.retain(|i| i != interface);
            interfaces.len() != before
        };
        if removed {
            self.advice_changed();
        }
        removed
    }

    pub fn interfaces(&self) -> Vec<TypeInfo> {
        self.interfaces.read().clone()
    }

    /// Whether some proxied interface is `interface` or a subtype of it
    pub fn is_interface_proxied(&self, interface: &TypeInfo) -> bool {
        self.interfaces
            .read()
            .iter()
            .any(|proxied| interface.is_assignable_from(proxied))
    }

    pub fn advisors(&self) -> Vec<Advisor> {
        self.advisors.read().clone()
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().len()
    }

    pub fn add_advisor(&self, advisor: Advisor) -> Result<(), AopError> {
        let position = self.advisor_count();
        self.add_advisor_at(position, advisor)
    }

    pub fn add_advisor_at(&self, position: usize, advisor: Advisor) -> Result<(), AopError> {
        if self.is_frozen() {
            return Err(AopError::frozen("add advisor"));
        }
        if let Advisor::Introduction(introduction) = &advisor {
            introduction.validate_interfaces()?;
            for interface in introduction.interfaces() {
                self.add_interface(interface)?;
            }
        }
        {
            let mut advisors = self.advisors.write();
            if position > advisors.len() {
                return Err(AopError::config(format!(
                    "Illegal position {} in advisor list with size {}",
                    position,
                    advisors.len()
                )));
            }
            advisors.insert(position, advisor);
        }
        self.advice_changed();
        Ok(())
    }

    /// Add several advisors with a single change notification
    pub fn add_advisors(&self, new_advisors: Vec<Advisor>) -> Result<(), AopError> {
        if self.is_frozen() {
            return Err(AopError::frozen("add advisor"));
        }
        for advisor in &new_advisors {
            if let Advisor::Introduction(introduction) = advisor {
                introduction.validate_interfaces()?;
                for interface in introduction.interfaces() {
                    if !interface.is_interface() {
                        return Err(AopError::config(format!("[{}] is not an interface", interface)));
                    }
                    let mut interfaces = self.interfaces.write();
                    if !interfaces.contains(&interface) {
                        interfaces.push(interface);
                    }
                }
            }
        }
        self.advisors.write().extend(new_advisors);
        self.advice_changed();
        Ok(())
    }

    pub fn remove_advisor(&self, advisor: &Advisor) -> Result<bool, AopError> {
        match self.index_of_advisor(advisor) {
            Some(index) => self.remove_advisor_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn remove_advisor_at(&self, index: usize) -> Result<Advisor, AopError> {
        if self.is_frozen() {
            return Err(AopError::frozen("remove advisor"));
        }
        let removed = {
            let mut advisors = self.advisors.write();
            if index >= advisors.len() {
                return Err(AopError::config(format!(
                    "Advisor index {} is out of bounds: only have {} advisors",
                    index,
                    advisors.len()
                )));
            }
            advisors.remove(index)
        };
        if let Advisor::Introduction(introduction) = &removed {
            let mut interfaces = self.interfaces.write();
            for interface in introduction.interfaces() {
                interfaces.retain(|i| i != &interface);
            }
        }
        self.advice_changed();
        Ok(removed)
    }

    /// Swap `old` for `replacement` in place; `false` when `old` is not present
    pub fn replace_advisor(&self, old: &Advisor, replacement: Advisor) -> Result<bool, AopError> {
        match self.index_of_advisor(old) {
            Some(index) => {
                self.remove_advisor_at(index)?;
                self.add_advisor_at(index, replacement)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn index_of_advisor(&self, advisor: &Advisor) -> Option<usize> {
        self.advisors.read().iter().position(|a| a.ptr_eq(advisor))
    }

    pub fn index_of_advice(&self, advice: &Advice) -> Option<usize> {
        self.advisors
            .read()
            .iter()
            .position(|a| a.advice().ptr_eq(advice))
    }

    pub fn is_advice_included(&self, advice: &Advice) -> bool {
        self.index_of_advice(advice).is_some()
    }

    /// Add advice applying to every method, wrapped in a suitable advisor
    pub fn add_advice(&self, advice: Advice) -> Result<(), AopError> {
        let position = self.advisor_count();
        self.add_advice_at(position, advice)
    }

    pub fn add_advice_at(&self, position: usize, advice: Advice) -> Result<(), AopError> {
        let advisor = match advice {
            Advice::Introduction(interceptor) => {
                Advisor::Introduction(Arc::new(DefaultIntroductionAdvisor::new(interceptor)))
            }
            other => Advisor::Pointcut(Arc::new(DefaultPointcutAdvisor::new(other))),
        };
        self.add_advisor_at(position, advisor)
    }

    pub fn remove_advice(&self, advice: &Advice) -> Result<bool, AopError> {
        match self.index_of_advice(advice) {
            Some(index) => self.remove_advisor_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn AdvisedSupportListener>) {
        self.listeners.write().push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn AdvisedSupportListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Called when the first proxy is created from this configuration
    pub(crate) fn activate(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.activated(self);
        }
    }

    fn advice_changed(&self) {
        self.method_cache.clear();
        if self.is_active() {
            let listeners = self.listeners.read().clone();
            for listener in listeners {
                listener.advice_changed(self);
            }
        }
    }

    /// Interceptor chain for `method` on `target_class`, cached per method
    pub fn interceptors_and_dynamic_interception_advice(
        &self,
        method: &Method,
        target_class: &TypeInfo,
    ) -> Result<Arc<Vec<InterceptorChainElement>>, AopError> {
        let key = format!("{}@{}", method.key(), target_class.name());
        if let Some(cached) = self.method_cache.get(&key) {
            return Ok(cached.clone());
        }
        let factory = self.chain_factory.read().clone();
        let chain = Arc::new(factory.interceptors_and_dynamic_interception_advice(self, method, target_class)?);
        self.method_cache.insert(key, chain.clone());
        Ok(chain)
    }

    pub fn cached_chain_count(&self) -> usize {
        self.method_cache.len()
    }

    /// Copy flags, target source, interfaces and advisors from `other`
    pub fn copy_configuration_from(&self, other: &AdvisedSupport) {
        self.set_proxy_config(other.proxy_config());
        self.set_target_source(other.target_source());
        self.set_pre_filtered(other.is_pre_filtered());
        *self.interfaces.write() = other.interfaces();
        *self.advisors.write() = other.advisors();
        self.advice_changed();
        debug!("Copied proxy configuration with {} advisors", self.advisor_count());
    }

    pub fn to_proxy_config_string(&self) -> String {
        let config = self.proxy_config();
        let interfaces: Vec<String> = self.interfaces().iter().map(|i| i.name().to_string()).collect();
        let advisors: Vec<String> = self.advisors().iter().map(|a| format!("{:?}", a)).collect();
        format!(
            "{}: {} interfaces [{}]; {} advisors [{}]; targetSource [{}]; proxyTargetClass={}; optimize={}; opaque={}; exposeProxy={}; frozen={}",
            std::any::type_name::<Self>(),
            interfaces.len(),
            interfaces.join(", "),
            advisors.len(),
            advisors.join(", "),
            self.target_source().describe(),
            config.proxy_target_class,
            config.optimize,
            config.opaque,
            config.expose_proxy,
            config.frozen,
        )
    }
}

impl fmt::Debug for AdvisedSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_proxy_config_string())
    }
}

/// Whether two configurations proxy the same interfaces with the same
/// advisors for the same target
pub fn equals_in_proxy(a: &Arc<AdvisedSupport>, b: &Arc<AdvisedSupport>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    let (a_interfaces, b_interfaces) = (a.interfaces(), b.interfaces());
    let same_interfaces = a_interfaces.len() == b_interfaces.len()
        && a_interfaces.iter().all(|i| b_interfaces.contains(i));
    let (a_advisors, b_advisors) = (a.advisors(), b.advisors());
    let same_advisors = a_advisors.len() == b_advisors.len()
        && a_advisors.iter().zip(b_advisors.iter()).all(|(x, y)| x.ptr_eq(y));
    same_interfaces && same_advisors && same_target_source(&a.target_source(), &b.target_source())
}
