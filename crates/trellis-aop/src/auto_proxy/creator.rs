use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use tracing::{debug, trace};
use trellis_core::container::PRESERVE_TARGET_CLASS_ATTRIBUTE;
use trellis_core::{BeanFactory, BeanPostProcessor, CoreError, Instance, TypeInfo};

use super::selector::{AdvisorSelector, BeanNameSelector, FactoryAdvisorSelector};
use super::target_source_creator::TargetSourceCreator;
use crate::adapter::{global_adapter_registry, AdvisorAdapterRegistry};
use crate::advisor::Advisor;
use crate::config::ProxyConfig;
use crate::error::AopError;
use crate::proxy::ProxyFactory;
use crate::support::is_infrastructure_class;
use crate::target::{SingletonTargetSource, TargetSource};

const ORIGINAL_INSTANCE_SUFFIX: &str = ".ORIGINAL";

/// Post-processor wrapping beans in proxies as the factory creates them.
///
/// Which beans get proxied, and with which advisors, is up to the
/// [`AdvisorSelector`]. Register the creator with
/// [`BeanFactory::add_bean_post_processor`]; it keeps only a weak handle to
/// the factory.
pub struct AutoProxyCreator {
    factory: Weak<BeanFactory>,
    selector: Arc<dyn AdvisorSelector>,
    adapter_registry: Arc<dyn AdvisorAdapterRegistry>,
    config: RwLock<ProxyConfig>,
    interceptor_names: RwLock<Vec<String>>,
    apply_common_interceptors_first: AtomicBool,
    target_source_creators: RwLock<Vec<Arc<dyn TargetSourceCreator>>>,
    target_sourced_beans: DashSet<String>,
    early_proxy_references: DashMap<String, usize>,
    advised_beans: DashMap<String, bool>,
    proxy_types: DashMap<String, TypeInfo>,
}

impl AutoProxyCreator {
    pub fn new(factory: &Arc<BeanFactory>, selector: Arc<dyn AdvisorSelector>) -> Self {
        Self {
            factory: Arc::downgrade(factory),
            selector,
            adapter_registry: global_adapter_registry(),
            config: RwLock::new(ProxyConfig::default()),
            interceptor_names: RwLock::new(Vec::new()),
            apply_common_interceptors_first: AtomicBool::new(true),
            target_source_creators: RwLock::new(Vec::new()),
            target_sourced_beans: DashSet::new(),
            early_proxy_references: DashMap::new(),
            advised_beans: DashMap::new(),
            proxy_types: DashMap::new(),
        }
    }

    /// Proxies every bean that at least one advisor bean of the factory applies to
    pub fn for_advisor_beans(factory: &Arc<BeanFactory>) -> Self {
        Self::new(factory, Arc::new(FactoryAdvisorSelector::new()))
    }

    /// Proxies beans whose names match, using the common interceptors only
    pub fn for_bean_names<I, S>(factory: &Arc<BeanFactory>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(factory, Arc::new(BeanNameSelector::new(patterns)))
    }

    pub fn with_config(self, config: ProxyConfig) -> Self {
        *self.config.write() = config;
        self
    }

    pub fn with_adapter_registry(mut self, registry: Arc<dyn AdvisorAdapterRegistry>) -> Self {
        self.adapter_registry = registry;
        self
    }

    pub fn proxy_config(&self) -> ProxyConfig {
        self.config.read().clone()
    }

    pub fn set_proxy_target_class(&self, value: bool) {
        self.config.write().proxy_target_class = value;
    }

    pub fn set_expose_proxy(&self, value: bool) {
        self.config.write().expose_proxy = value;
    }

    /// Names of advice or advisor beans applied to every proxy this creator makes
    pub fn set_interceptor_names<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.interceptor_names.write() = names.into_iter().map(Into::into).collect();
    }

    /// Whether common interceptors run before bean-specific ones (default `true`)
    pub fn set_apply_common_interceptors_first(&self, value: bool) {
        self.apply_common_interceptors_first.store(value, Ordering::Relaxed);
    }

    pub fn add_target_source_creator(&self, creator: Arc<dyn TargetSourceCreator>) {
        self.target_source_creators.write().push(creator);
    }

    /// Type of the proxy created for `bean_name`, if one was created
    pub fn proxy_type(&self, bean_name: &str) -> Option<TypeInfo> {
        self.proxy_types.get(bean_name).map(|entry| entry.value().clone())
    }

    /// Cached wrap decision for `bean_name`: `Some(true)` if it was proxied
    pub fn is_advised(&self, bean_name: &str) -> Option<bool> {
        self.advised_beans.get(bean_name).map(|entry| *entry.value())
    }

    fn factory(&self) -> Result<Arc<BeanFactory>, AopError> {
        self.factory
            .upgrade()
            .ok_or_else(|| AopError::config("Bean factory of the auto-proxy creator has been dropped"))
    }

    /// Beans created as the raw counterpart of a proxied bean keep their original form
    fn should_skip(&self, bean_type: &TypeInfo, bean_name: &str) -> bool {
        bean_name
            .strip_suffix(ORIGINAL_INSTANCE_SUFFIX)
            .map_or(false, |prefix| prefix == bean_type.name())
    }

    fn custom_target_source(
        &self,
        factory: &Arc<BeanFactory>,
        bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Arc<dyn TargetSource>>, AopError> {
        let creators = self.target_source_creators.read().clone();
        if creators.is_empty() || !factory.contains_bean(bean_name) {
            return Ok(None);
        }
        for creator in creators {
            if let Some(source) = creator.target_source(factory, bean_type, bean_name)? {
                debug!(
                    "TargetSourceCreator found custom TargetSource for bean with name '{}': {}",
                    bean_name,
                    source.describe()
                );
                return Ok(Some(source));
            }
        }
        Ok(None)
    }

    fn wrap_if_necessary(&self, bean: Instance, bean_name: &str) -> Result<Instance, AopError> {
        if self.target_sourced_beans.contains(bean_name) {
            return Ok(bean);
        }
        if self.is_advised(bean_name) == Some(false) {
            return Ok(bean);
        }
        let bean_type = bean.type_info().clone();
        if is_infrastructure_class(&bean_type) || self.should_skip(&bean_type, bean_name) {
            self.advised_beans.insert(bean_name.to_string(), false);
            return Ok(bean);
        }

        let factory = self.factory()?;
        match self.selector.advisors_for_bean(&factory, &bean_type, bean_name)? {
            Some(specific) => {
                self.advised_beans.insert(bean_name.to_string(), true);
                let target_source: Arc<dyn TargetSource> = Arc::new(SingletonTargetSource::new(bean));
                let proxy = self.create_proxy(&factory, &bean_type, bean_name, specific, target_source)?;
                self.proxy_types.insert(bean_name.to_string(), proxy.type_info().clone());
                Ok(proxy)
            }
            None => {
                self.advised_beans.insert(bean_name.to_string(), false);
                Ok(bean)
            }
        }
    }

    fn create_proxy(
        &self,
        factory: &Arc<BeanFactory>,
        bean_type: &TypeInfo,
        bean_name: &str,
        specific: Vec<Advisor>,
        target_source: Arc<dyn TargetSource>,
    ) -> Result<Instance, AopError> {
        let config = self.proxy_config();
        let frozen = config.frozen;
        let proxy_factory = ProxyFactory::with_config(ProxyConfig { frozen: false, ..config });

        if !proxy_factory.advised().is_proxy_target_class() {
            if self.should_proxy_target_class(factory, bean_name) {
                proxy_factory.set_proxy_target_class(true);
            } else {
                self.evaluate_proxy_interfaces(bean_type, &proxy_factory)?;
            }
        }

        let advisors = self.build_advisors(factory, bean_name, specific)?;
        proxy_factory.add_advisors(advisors)?;
        proxy_factory.set_target_source(target_source);
        proxy_factory.set_pre_filtered(self.selector.is_pre_filtered());
        proxy_factory.set_frozen(frozen);
        proxy_factory.get_proxy()
    }

    fn should_proxy_target_class(&self, factory: &BeanFactory, bean_name: &str) -> bool {
        factory
            .bean_definition(bean_name)
            .map_or(false, |definition| definition.attribute(PRESERVE_TARGET_CLASS_ATTRIBUTE) == Some("true"))
    }

    /// Proxy the bean's interfaces when it has any worth proxying, its class otherwise
    fn evaluate_proxy_interfaces(&self, bean_type: &TypeInfo, proxy_factory: &ProxyFactory) -> Result<(), AopError> {
        let candidates: Vec<TypeInfo> = bean_type
            .all_interfaces()
            .into_iter()
            .filter(|interface| !interface.name().starts_with("trellis.") && !interface.all_methods().is_empty())
            .collect();
        if candidates.is_empty() {
            proxy_factory.set_proxy_target_class(true);
            return Ok(());
        }
        for interface in candidates {
            proxy_factory.add_interface(interface)?;
        }
        Ok(())
    }

    /// Common interceptors are looked up on every call: the beans behind them may be prototypes
    fn resolve_interceptor_names(&self, factory: &BeanFactory) -> Result<Vec<Advisor>, AopError> {
        let names = self.interceptor_names.read().clone();
        let mut advisors = Vec::with_capacity(names.len());
        for name in names {
            let bean = factory.get_bean(&name)?;
            advisors.push(self.adapter_registry.wrap_instance(&bean)?);
        }
        Ok(advisors)
    }

    fn build_advisors(
        &self,
        factory: &BeanFactory,
        bean_name: &str,
        specific: Vec<Advisor>,
    ) -> Result<Vec<Advisor>, AopError> {
        let common = self.resolve_interceptor_names(factory)?;
        let specific_count = specific.len();
        let common_count = common.len();
        let advisors = if self.apply_common_interceptors_first.load(Ordering::Relaxed) && specific_count > 0 {
            common.into_iter().chain(specific).collect()
        } else {
            specific.into_iter().chain(common).collect()
        };
        trace!(
            "Creating implicit proxy for bean '{}' with {} common interceptors and {} specific interceptors",
            bean_name,
            common_count,
            specific_count
        );
        Ok(advisors)
    }

    fn before_instantiation(&self, bean_type: &TypeInfo, bean_name: &str) -> Result<Option<Instance>, AopError> {
        if !self.target_sourced_beans.contains(bean_name) {
            if self.advised_beans.contains_key(bean_name) {
                return Ok(None);
            }
            if is_infrastructure_class(bean_type) || self.should_skip(bean_type, bean_name) {
                self.advised_beans.insert(bean_name.to_string(), false);
                return Ok(None);
            }
        }

        let factory = self.factory()?;
        let target_source = match self.custom_target_source(&factory, bean_type, bean_name)? {
            Some(source) => source,
            None => return Ok(None),
        };
        self.target_sourced_beans.insert(bean_name.to_string());
        let specific = self
            .selector
            .advisors_for_bean(&factory, bean_type, bean_name)?
            .unwrap_or_default();
        let proxy = self.create_proxy(&factory, bean_type, bean_name, specific, target_source)?;
        self.proxy_types.insert(bean_name.to_string(), proxy.type_info().clone());
        Ok(Some(proxy))
    }
}

impl BeanPostProcessor for AutoProxyCreator {
    fn post_process_before_instantiation(
        &self,
        bean_type: &TypeInfo,
        bean_name: &str,
    ) -> Result<Option<Instance>, CoreError> {
        self.before_instantiation(bean_type, bean_name)
            .map_err(|err| err.into_core(bean_name))
    }

    fn get_early_bean_reference(&self, bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
        self.early_proxy_references.insert(bean_name.to_string(), bean.identity());
        self.wrap_if_necessary(bean, bean_name)
            .map_err(|err| err.into_core(bean_name))
    }

    fn post_process_after_initialization(&self, bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
        let early = self.early_proxy_references.remove(bean_name).map(|(_, identity)| identity);
        if early == Some(bean.identity()) {
            return Ok(bean);
        }
        self.wrap_if_necessary(bean, bean_name)
            .map_err(|err| err.into_core(bean_name))
    }

    fn is_instantiation_aware(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "AutoProxyCreator"
    }
}
