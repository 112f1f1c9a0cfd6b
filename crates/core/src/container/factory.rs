use parking_lot::RwLock;
use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ContainerConfig;
use crate::container::autowiring::{DependencyDescriptor, DependencyResolver};
use crate::container::descriptor::{AutowireMode, BeanDefinition, ResolvedCandidate, ValueSource};
use crate::container::lifecycle::{BeanPostProcessor, DisposableBean, DisposableBeanAdapter};
use crate::container::registry::SingletonRegistry;
use crate::container::resolver::ConstructorResolver;
use crate::container::scope::{BeanScope, Scope};
use crate::errors::CoreError;
use crate::types::{Instance, SimpleTypeConverter, TypeConverter, TypeInfo, TypeKind};

thread_local! {
    static PROTOTYPES_IN_CREATION: RefCell<HashSet<(Uuid, String)>> = RefCell::new(HashSet::new());
}

/// Bean factory: definition registry plus the full creation lifecycle.
///
/// Always handed out as `Arc<BeanFactory>`; early singleton references call
/// back into the factory through a weak self-reference.
pub struct BeanFactory {
    id: Uuid,
    self_ref: Weak<BeanFactory>,
    config: ContainerConfig,
    registry: SingletonRegistry,
    definitions: RwLock<HashMap<String, Arc<BeanDefinition>>>,
    definition_names: RwLock<Vec<String>>,
    manual_singleton_names: RwLock<Vec<String>>,
    post_processors: RwLock<Vec<Arc<dyn BeanPostProcessor>>>,
    scopes: RwLock<HashMap<String, Arc<dyn Scope>>>,
    type_converter: Arc<dyn TypeConverter>,
    parent: Option<Arc<BeanFactory>>,
}

impl BeanFactory {
    /// Create a factory with default settings
    pub fn new() -> Arc<Self> {
        Self::with_config(ContainerConfig::default())
    }

    pub fn with_config(config: ContainerConfig) -> Arc<Self> {
        Self::build(config, None, Arc::new(SimpleTypeConverter::new()))
    }

    /// Child factory: beans it does not define are looked up in `parent`
    pub fn with_parent(parent: Arc<BeanFactory>, config: ContainerConfig) -> Arc<Self> {
        let converter = parent.type_converter.clone();
        Self::build(config, Some(parent), converter)
    }

    pub fn with_type_converter(config: ContainerConfig, converter: Arc<dyn TypeConverter>) -> Arc<Self> {
        Self::build(config, None, converter)
    }

    fn build(
        config: ContainerConfig,
        parent: Option<Arc<BeanFactory>>,
        type_converter: Arc<dyn TypeConverter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id: Uuid::new_v4(),
            self_ref: self_ref.clone(),
            registry: SingletonRegistry::with_suppressed_limit(config.suppressed_exceptions_limit),
            config,
            definitions: RwLock::new(HashMap::new()),
            definition_names: RwLock::new(Vec::new()),
            manual_singleton_names: RwLock::new(Vec::new()),
            post_processors: RwLock::new(Vec::new()),
            scopes: RwLock::new(HashMap::new()),
            type_converter,
            parent,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn registry(&self) -> &SingletonRegistry {
        &self.registry
    }

    pub fn type_converter(&self) -> &dyn TypeConverter {
        self.type_converter.as_ref()
    }

    pub fn parent(&self) -> Option<&Arc<BeanFactory>> {
        self.parent.as_ref()
    }

    /// Strong handle to this factory, while it is alive
    pub fn self_arc(&self) -> Option<Arc<BeanFactory>> {
        self.self_ref.upgrade()
    }

    // ----- definitions -----

    /// Register a definition under `bean_name`, replacing an existing one if overriding is allowed
    pub fn register_bean_definition(&self, bean_name: &str, definition: BeanDefinition) -> Result<(), CoreError> {
        definition.validate(bean_name)?;
        let definition = Arc::new(definition);

        let existing = self.definitions.read().get(bean_name).cloned();
        match existing {
            Some(existing) => {
                if !self.config.allow_bean_definition_overriding {
                    return Err(CoreError::bean_definition_store(
                        bean_name,
                        format!(
                            "Cannot register bean definition [{:?}] for bean '{}' since there is already [{:?}] bound.",
                            definition, bean_name, existing
                        ),
                    ));
                }
                info!(
                    "Overriding bean definition for bean '{}' with a different definition: replacing [{:?}] with [{:?}]",
                    bean_name, existing, definition
                );
                self.definitions.write().insert(bean_name.to_string(), definition);
                self.reset_bean_definition(bean_name);
            }
            None => {
                if self.registry.is_alias(bean_name) {
                    return Err(CoreError::bean_definition_store(
                        bean_name,
                        format!("Cannot register bean definition under alias '{}'", bean_name),
                    ));
                }
                self.definitions.write().insert(bean_name.to_string(), definition);
                self.definition_names.write().push(bean_name.to_string());
                self.manual_singleton_names.write().retain(|n| n != bean_name);
            }
        }
        Ok(())
    }

    pub fn remove_bean_definition(&self, bean_name: &str) -> Result<(), CoreError> {
        if self.definitions.write().remove(bean_name).is_none() {
            trace!("No bean named '{}' found in {:?}", bean_name, self);
            return Err(CoreError::no_such_bean_named(bean_name));
        }
        self.definition_names.write().retain(|n| n != bean_name);
        self.reset_bean_definition(bean_name);
        Ok(())
    }

    fn reset_bean_definition(&self, bean_name: &str) {
        self.registry.destroy_singleton(bean_name);
    }

    pub fn contains_bean_definition(&self, bean_name: &str) -> bool {
        self.definitions.read().contains_key(bean_name)
    }

    pub fn bean_definition(&self, bean_name: &str) -> Option<Arc<BeanDefinition>> {
        let canonical = self.registry.canonical_name(bean_name);
        self.definitions.read().get(&canonical).cloned()
    }

    /// Definition names in registration order
    pub fn bean_definition_names(&self) -> Vec<String> {
        self.definition_names.read().clone()
    }

    pub fn bean_definition_count(&self) -> usize {
        self.definition_names.read().len()
    }

    /// Register a ready-made object as a singleton
    pub fn register_singleton(&self, bean_name: &str, instance: Instance) -> Result<(), CoreError> {
        self.registry.register_singleton(bean_name, instance)?;
        if !self.contains_bean_definition(bean_name) {
            self.manual_singleton_names.write().push(bean_name.to_string());
        }
        Ok(())
    }

    pub fn register_alias(&self, bean_name: &str, alias: &str) -> Result<(), CoreError> {
        if self.contains_bean_definition(alias) {
            return Err(CoreError::bean_definition_store(
                alias,
                format!("Cannot register alias '{}' for name '{}': a bean definition uses that name", alias, bean_name),
            ));
        }
        self.registry.register_alias(bean_name, alias)
    }

    pub fn aliases(&self, bean_name: &str) -> Vec<String> {
        self.registry.aliases(bean_name)
    }

    // ----- extension points -----

    /// Add a post-processor; re-adding the same processor moves it to the end
    pub fn add_bean_post_processor(&self, processor: Arc<dyn BeanPostProcessor>) {
        let mut processors = self.post_processors.write();
        processors.retain(|existing| !Arc::ptr_eq(existing, &processor));
        debug!("Adding bean post-processor '{}'", processor.name());
        processors.push(processor);
    }

    pub fn bean_post_processor_count(&self) -> usize {
        self.post_processors.read().len()
    }

    fn post_processors(&self) -> Vec<Arc<dyn BeanPostProcessor>> {
        self.post_processors.read().clone()
    }

    pub fn register_scope(&self, scope_name: &str, scope: Arc<dyn Scope>) -> Result<(), CoreError> {
        if scope_name == "singleton" || scope_name == "prototype" {
            return Err(CoreError::configuration(format!(
                "Cannot replace existing scopes 'singleton' and 'prototype' (tried '{}')",
                scope_name
            )));
        }
        if self.scopes.write().insert(scope_name.to_string(), scope).is_some() {
            debug!("Replacing scope '{}'", scope_name);
        }
        Ok(())
    }

    pub fn registered_scope(&self, scope_name: &str) -> Option<Arc<dyn Scope>> {
        self.scopes.read().get(scope_name).cloned()
    }

    // ----- lookup -----

    /// Return the bean registered under `name`, creating it if needed
    pub fn get_bean(&self, name: &str) -> Result<Instance, CoreError> {
        self.do_get_bean(name, None, None)
    }

    /// Create the bean with explicit constructor or factory-method arguments
    pub fn get_bean_with_args(&self, name: &str, args: &[Instance]) -> Result<Instance, CoreError> {
        self.do_get_bean(name, None, Some(args))
    }

    /// Return the bean, checked or converted to `required_type`
    pub fn get_bean_of_type(&self, name: &str, required_type: &TypeInfo) -> Result<Instance, CoreError> {
        self.do_get_bean(name, Some(required_type), None)
    }

    /// Return the single bean matching `required_type`
    pub fn get_bean_by_type(&self, required_type: &TypeInfo) -> Result<Instance, CoreError> {
        let descriptor = DependencyDescriptor::of(required_type.clone());
        let mut names = Vec::new();
        self.resolve_dependency(&descriptor, None, &mut names)?
            .ok_or_else(|| CoreError::no_such_bean_of_type(required_type.name(), "no bean available"))
    }

    /// Return the bean downcast to its concrete Rust type
    pub fn get_typed<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>, CoreError> {
        let bean = self.get_bean(name)?;
        bean.downcast_arc::<T>()
            .ok_or_else(|| CoreError::BeanNotOfRequiredType {
                bean_name: name.to_string(),
                required_type: std::any::type_name::<T>().to_string(),
                actual_type: bean.type_info().name().to_string(),
            })
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        let bean_name = self.registry.canonical_name(name);
        if self.registry.contains_singleton(&bean_name) || self.contains_bean_definition(&bean_name) {
            return true;
        }
        self.parent.as_ref().map_or(false, |parent| parent.contains_bean(name))
    }

    pub fn is_singleton(&self, name: &str) -> Result<bool, CoreError> {
        let bean_name = self.registry.canonical_name(name);
        if self.registry.contains_singleton(&bean_name) && !self.contains_bean_definition(&bean_name) {
            return Ok(true);
        }
        match self.bean_definition(&bean_name) {
            Some(definition) => Ok(definition.is_singleton()),
            None => match &self.parent {
                Some(parent) => parent.is_singleton(name),
                None => Err(CoreError::no_such_bean_named(name)),
            },
        }
    }

    pub fn is_prototype(&self, name: &str) -> Result<bool, CoreError> {
        let bean_name = self.registry.canonical_name(name);
        match self.bean_definition(&bean_name) {
            Some(definition) => Ok(definition.is_prototype()),
            None if self.registry.contains_singleton(&bean_name) => Ok(false),
            None => match &self.parent {
                Some(parent) => parent.is_prototype(name),
                None => Err(CoreError::no_such_bean_named(name)),
            },
        }
    }

    /// Type of the bean: the created singleton's type, else what its definition declares
    pub fn type_of(&self, name: &str) -> Option<TypeInfo> {
        let bean_name = self.registry.canonical_name(name);
        if let Ok(Some(instance)) = self.registry.get_singleton_with(&bean_name, false) {
            return Some(instance.type_info().clone());
        }
        match self.bean_definition(&bean_name) {
            Some(definition) => Some(Self::predicted_type(&definition)),
            None => self.parent.as_ref().and_then(|parent| parent.type_of(name)),
        }
    }

    fn predicted_type(definition: &BeanDefinition) -> TypeInfo {
        if let Some(method_name) = definition.factory_method_name() {
            let mut return_types = definition
                .factory_methods()
                .iter()
                .filter(|m| m.name() == method_name)
                .filter_map(|m| m.return_type().cloned());
            if let Some(first) = return_types.next() {
                if return_types.all(|other| other == first) {
                    return first;
                }
            }
        }
        definition.bean_type().clone()
    }

    pub fn is_type_match(&self, name: &str, required_type: &TypeInfo) -> bool {
        self.type_of(name)
            .map_or(false, |ty| required_type.is_assignable_from(&ty))
    }

    /// Names of beans whose type matches, including those of ancestor factories
    pub fn bean_names_for_type(&self, required_type: &TypeInfo) -> Vec<String> {
        let mut result = Vec::new();
        for name in self.bean_definition_names() {
            if self.is_type_match(&name, required_type) {
                result.push(name);
            }
        }
        for name in self.manual_singleton_names.read().iter() {
            if self.is_type_match(name, required_type) && !result.contains(name) {
                result.push(name.clone());
            }
        }
        if let Some(parent) = &self.parent {
            for name in parent.bean_names_for_type(required_type) {
                if !result.contains(&name) && !self.contains_local_bean(&name) {
                    result.push(name);
                }
            }
        }
        result
    }

    fn contains_local_bean(&self, name: &str) -> bool {
        self.contains_bean_definition(name) || self.registry.contains_singleton(name)
    }

    /// Every bean matching the type, in registration order
    pub fn beans_of_type(&self, required_type: &TypeInfo) -> Result<Vec<(String, Instance)>, CoreError> {
        self.bean_names_for_type(required_type)
            .into_iter()
            .map(|name| self.get_bean(&name).map(|bean| (name, bean)))
            .collect()
    }

    pub fn is_currently_in_creation(&self, name: &str) -> bool {
        let bean_name = self.registry.canonical_name(name);
        self.registry.is_currently_in_creation(&bean_name) || self.is_prototype_currently_in_creation(&bean_name)
    }

    fn do_get_bean(
        &self,
        name: &str,
        required_type: Option<&TypeInfo>,
        args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        let bean_name = self.registry.canonical_name(name);

        if args.is_none() {
            if let Some(shared) = self.registry.get_singleton(&bean_name)? {
                if self.registry.is_singleton_currently_in_creation(&bean_name) {
                    trace!(
                        "Returning eagerly cached instance of singleton bean '{}' that is not fully initialized yet - a consequence of a circular reference",
                        bean_name
                    );
                } else {
                    trace!("Returning cached instance of singleton bean '{}'", bean_name);
                }
                return self.adapt_bean_instance(&bean_name, shared, required_type);
            }
        }

        if self.is_prototype_currently_in_creation(&bean_name) {
            return Err(CoreError::currently_in_creation(&bean_name));
        }

        let definition = match self.bean_definition(&bean_name) {
            Some(definition) => definition,
            None => {
                return match &self.parent {
                    Some(parent) => parent.do_get_bean(name, required_type, args),
                    None => Err(CoreError::no_such_bean_named(&bean_name)),
                };
            }
        };

        for dependency in definition.depends_on_names() {
            if self.registry.is_dependent(&bean_name, dependency) {
                return Err(CoreError::bean_creation(
                    &bean_name,
                    format!(
                        "Circular depends-on relationship between '{}' and '{}'",
                        bean_name, dependency
                    ),
                ));
            }
            self.registry.register_dependent_bean(dependency, &bean_name);
            self.get_bean(dependency).map_err(|err| {
                let message = if err.is_no_such_bean() {
                    format!("'{}' depends on missing bean '{}'", bean_name, dependency)
                } else {
                    format!("Failed to initialize dependency '{}' of bean '{}'", dependency, bean_name)
                };
                CoreError::bean_creation_with_cause(&bean_name, message, err)
            })?;
        }

        let bean = match definition.scope() {
            BeanScope::Singleton => self.registry.get_singleton_or_create(&bean_name, || {
                self.create_bean(&bean_name, &definition, args).map_err(|err| {
                    // drop any eagerly cached partial instance
                    self.registry.destroy_singleton(&bean_name);
                    err
                })
            })?,
            BeanScope::Prototype => {
                self.before_prototype_creation(&bean_name);
                let created = self.create_bean(&bean_name, &definition, args);
                self.after_prototype_creation(&bean_name);
                created?
            }
            BeanScope::Custom(scope_name) => {
                let scope = self.registered_scope(scope_name).ok_or_else(|| {
                    CoreError::illegal_state(format!("No Scope registered for scope name '{}'", scope_name))
                })?;
                scope
                    .get(&bean_name, &mut || {
                        self.before_prototype_creation(&bean_name);
                        let created = self.create_bean(&bean_name, &definition, args);
                        self.after_prototype_creation(&bean_name);
                        created
                    })
                    .map_err(|err| {
                        CoreError::bean_creation_with_cause(
                            &bean_name,
                            format!("Scope '{}' is not active for the current thread", scope_name),
                            err,
                        )
                    })?
            }
        };

        self.adapt_bean_instance(&bean_name, bean, required_type)
    }

    fn adapt_bean_instance(
        &self,
        bean_name: &str,
        bean: Instance,
        required_type: Option<&TypeInfo>,
    ) -> Result<Instance, CoreError> {
        match required_type {
            Some(required) if !required.is_assignable_from(bean.type_info()) => self
                .type_converter
                .convert_if_necessary(&bean, required)
                .map_err(|err| {
                    trace!("Failed to convert bean '{}' to required type '{}': {}", bean_name, required, err);
                    CoreError::BeanNotOfRequiredType {
                        bean_name: bean_name.to_string(),
                        required_type: required.name().to_string(),
                        actual_type: bean.type_info().name().to_string(),
                    }
                }),
            _ => Ok(bean),
        }
    }

    fn is_prototype_currently_in_creation(&self, bean_name: &str) -> bool {
        let key = (self.id, bean_name.to_string());
        PROTOTYPES_IN_CREATION.with(|set| set.borrow().contains(&key))
    }

    fn before_prototype_creation(&self, bean_name: &str) {
        let key = (self.id, bean_name.to_string());
        PROTOTYPES_IN_CREATION.with(|set| set.borrow_mut().insert(key));
    }

    fn after_prototype_creation(&self, bean_name: &str) {
        let key = (self.id, bean_name.to_string());
        PROTOTYPES_IN_CREATION.with(|set| set.borrow_mut().remove(&key));
    }

    // ----- creation -----

    fn create_bean(
        &self,
        bean_name: &str,
        definition: &Arc<BeanDefinition>,
        args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        trace!("Creating instance of bean '{}'", bean_name);

        let short_circuit = self.resolve_before_instantiation(bean_name, definition).map_err(|err| {
            CoreError::bean_creation_with_cause(
                bean_name,
                "BeanPostProcessor before instantiation of bean failed",
                err,
            )
        })?;
        if let Some(bean) = short_circuit {
            return Ok(bean);
        }

        let bean = self.do_create_bean(bean_name, definition, args)?;
        trace!("Finished creating instance of bean '{}'", bean_name);
        Ok(bean)
    }

    fn resolve_before_instantiation(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
    ) -> Result<Option<Instance>, CoreError> {
        if definition.is_synthetic() {
            return Ok(None);
        }
        for processor in self.post_processors() {
            if !processor.is_instantiation_aware() {
                continue;
            }
            if let Some(bean) = processor.post_process_before_instantiation(definition.bean_type(), bean_name)? {
                return self.apply_after_initialization(bean, bean_name).map(Some);
            }
        }
        Ok(None)
    }

    fn do_create_bean(
        &self,
        bean_name: &str,
        definition: &Arc<BeanDefinition>,
        args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        let raw = self.create_bean_instance(bean_name, definition, args)?;

        let early_singleton_exposure = definition.is_singleton()
            && self.config.allow_circular_references
            && self.registry.is_singleton_currently_in_creation(bean_name);
        if early_singleton_exposure {
            trace!(
                "Eagerly caching bean '{}' to allow for resolving potential circular references",
                bean_name
            );
            let factory = self.self_ref.clone();
            let early_raw = raw.clone();
            let name = bean_name.to_string();
            let early_definition = definition.clone();
            self.registry.add_singleton_factory(
                bean_name,
                Arc::new(move || match factory.upgrade() {
                    Some(factory) => factory.get_early_bean_reference(&name, &early_definition, early_raw.clone()),
                    None => Ok(early_raw.clone()),
                }),
            );
        }

        let mut exposed = self
            .populate_bean(bean_name, definition, &raw)
            .and_then(|_| self.initialize_bean(bean_name, raw.clone(), definition))
            .map_err(|err| match err {
                err @ CoreError::BeanCreation { .. } if err.bean_name() == Some(bean_name) => err,
                err @ CoreError::UnsatisfiedDependency { .. } if err.bean_name() == Some(bean_name) => err,
                other => CoreError::bean_creation_with_cause(bean_name, "Initialization of bean failed", other),
            })?;

        if early_singleton_exposure {
            if let Some(early) = self.registry.get_singleton_with(bean_name, false)? {
                if exposed.ptr_eq(&raw) {
                    exposed = early;
                } else if !self.config.allow_raw_injection_despite_wrapping
                    && self.registry.has_dependent_bean(bean_name)
                {
                    let actual_dependents = self.registry.dependent_beans(bean_name);
                    if !actual_dependents.is_empty() {
                        return Err(CoreError::BeanCurrentlyInCreation {
                            bean_name: bean_name.to_string(),
                            message: format!(
                                "Bean with name '{}' has been injected into other beans [{}] in its raw version as part of a circular reference, but has eventually been wrapped. This means that said other beans do not use the final version of the bean. This is often the result of over-eager type matching - consider using 'bean_names_for_type' with eager initialization turned off, for example.",
                                bean_name,
                                actual_dependents.join(",")
                            ),
                        });
                    }
                }
            }
        }

        self.register_disposable_bean_if_necessary(bean_name, &exposed, definition)?;
        Ok(exposed)
    }

    fn create_bean_instance(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        args: Option<&[Instance]>,
    ) -> Result<Instance, CoreError> {
        if args.is_none() {
            if let Some(supplier) = definition.instance_supplier() {
                return supplier().map_err(|err| {
                    CoreError::bean_creation_with_cause(bean_name, "Instance supplier failed", err)
                });
            }
        }

        let resolver = ConstructorResolver::new(self);
        if definition.factory_method_name().is_some() {
            return resolver.instantiate_using_factory_method(bean_name, definition, args);
        }

        if args.is_none() {
            let cached = {
                let cache = definition.resolution();
                cache.arguments_resolved
                    && matches!(cache.resolved_candidate, Some(ResolvedCandidate::Constructor(_)))
            };
            if cached {
                return resolver.autowire_constructor(bean_name, definition, None);
            }
        }

        let constructors = definition.constructors();
        let default_constructor = constructors.iter().position(|c| c.parameter_count() == 0);
        let needs_autowiring = definition.autowire_mode() == AutowireMode::Constructor
            || definition.has_constructor_args()
            || args.is_some()
            || default_constructor.is_none();
        if needs_autowiring {
            return resolver.autowire_constructor(bean_name, definition, args);
        }

        match default_constructor {
            Some(index) => self.instantiate_bean(bean_name, definition, index),
            None => Err(CoreError::bean_creation(
                bean_name,
                format!("No default constructor found on bean class [{}]", definition.bean_type()),
            )),
        }
    }

    fn instantiate_bean(&self, bean_name: &str, definition: &BeanDefinition, index: usize) -> Result<Instance, CoreError> {
        let ctor = &definition.constructors()[index];
        let bean = ctor.instantiate(&[]).map_err(|err| {
            CoreError::bean_creation_with_cause(
                bean_name,
                format!("Instantiation of bean failed: Failed to instantiate [{}]", definition.bean_type()),
                err,
            )
        })?;
        let mut cache = definition.resolution();
        cache.resolved_candidate = Some(ResolvedCandidate::Constructor(index));
        cache.arguments_resolved = true;
        cache.resolved_arguments = Some(Vec::new());
        Ok(bean)
    }

    fn get_early_bean_reference(
        &self,
        bean_name: &str,
        definition: &BeanDefinition,
        bean: Instance,
    ) -> Result<Instance, CoreError> {
        let mut exposed = bean;
        if !definition.is_synthetic() {
            for processor in self.post_processors() {
                exposed = processor.get_early_bean_reference(exposed, bean_name)?;
            }
        }
        Ok(exposed)
    }

    fn populate_bean(&self, bean_name: &str, definition: &BeanDefinition, bean: &Instance) -> Result<(), CoreError> {
        if definition.property_values().is_empty() {
            return Ok(());
        }
        let setter = definition.property_setter().ok_or_else(|| {
            CoreError::bean_definition_store(bean_name, "property values declared without a property setter")
        })?;

        for property in definition.property_values() {
            let value = match &property.value {
                ValueSource::Autowired(descriptor) => {
                    let descriptor = match descriptor.dependency_name {
                        Some(_) => descriptor.clone(),
                        None => descriptor.clone().named(property.name.clone()),
                    };
                    let mut autowired_names = Vec::new();
                    let resolved = self
                        .resolve_dependency(&descriptor, Some(bean_name), &mut autowired_names)
                        .map_err(|err| {
                            CoreError::unsatisfied_dependency(
                                bean_name,
                                format!("bean property '{}'", property.name),
                                err.to_string(),
                                Some(err),
                            )
                        })?;
                    for autowired in &autowired_names {
                        self.registry.register_dependent_bean(autowired, bean_name);
                        trace!(
                            "Autowiring by type from bean name '{}' via property '{}' to bean named '{}'",
                            bean_name,
                            property.name,
                            autowired
                        );
                    }
                    match resolved {
                        Some(value) => value,
                        None => continue,
                    }
                }
                source => self.resolve_value(bean_name, &format!("bean property '{}'", property.name), source)?,
            };

            setter(bean, &property.name, value).map_err(|err| {
                CoreError::bean_creation_with_cause(
                    bean_name,
                    format!("Error setting property value '{}'", property.name),
                    err,
                )
            })?;
        }
        Ok(())
    }

    /// Turn a value source into an instance on behalf of `bean_name`
    pub(crate) fn resolve_value(&self, bean_name: &str, context: &str, source: &ValueSource) -> Result<Instance, CoreError> {
        match source {
            ValueSource::Instance(instance) => Ok(instance.clone()),
            ValueSource::Literal(text) => Ok(Instance::string(text.clone())),
            ValueSource::Reference(reference) => {
                let bean = self.get_bean(reference).map_err(|err| {
                    CoreError::bean_creation_with_cause(
                        bean_name,
                        format!("Cannot resolve reference to bean '{}' while setting {}", reference, context),
                        err,
                    )
                })?;
                self.registry.register_dependent_bean(reference, bean_name);
                Ok(bean)
            }
            ValueSource::Autowired(descriptor) => {
                let mut autowired_names = Vec::new();
                let resolved = self.resolve_dependency(descriptor, Some(bean_name), &mut autowired_names)?;
                for autowired in &autowired_names {
                    self.registry.register_dependent_bean(autowired, bean_name);
                }
                resolved.ok_or_else(|| {
                    CoreError::no_such_bean_of_type(descriptor.required_type.name(), "no bean available")
                })
            }
        }
    }

    fn initialize_bean(&self, bean_name: &str, bean: Instance, definition: &BeanDefinition) -> Result<Instance, CoreError> {
        let mut wrapped = bean;
        if !definition.is_synthetic() {
            wrapped = self.apply_before_initialization(wrapped, bean_name)?;
        }

        if let Some(init) = definition.init_callback() {
            trace!("Invoking init callback on bean '{}'", bean_name);
            init(&wrapped).map_err(|err| {
                CoreError::bean_creation_with_cause(bean_name, "Invocation of init method failed", err)
            })?;
        }

        if !definition.is_synthetic() {
            wrapped = self.apply_after_initialization(wrapped, bean_name)?;
        }
        Ok(wrapped)
    }

    fn apply_before_initialization(&self, bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
        let mut result = bean;
        for processor in self.post_processors() {
            result = processor.post_process_before_initialization(result, bean_name)?;
        }
        Ok(result)
    }

    fn apply_after_initialization(&self, bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
        let mut result = bean;
        for processor in self.post_processors() {
            result = processor.post_process_after_initialization(result, bean_name)?;
        }
        Ok(result)
    }

    fn register_disposable_bean_if_necessary(
        &self,
        bean_name: &str,
        bean: &Instance,
        definition: &BeanDefinition,
    ) -> Result<(), CoreError> {
        let callback = match definition.destroy_callback() {
            Some(callback) if !definition.is_prototype() => callback.clone(),
            _ => return Ok(()),
        };
        let adapter = Arc::new(DisposableBeanAdapter::new(bean_name, bean.clone(), callback));
        match definition.scope() {
            BeanScope::Singleton => self.registry.register_disposable_bean(bean_name, adapter),
            BeanScope::Custom(scope_name) => {
                let scope = self.registered_scope(scope_name).ok_or_else(|| {
                    CoreError::illegal_state(format!("No Scope registered for scope name '{}'", scope_name))
                })?;
                let name = bean_name.to_string();
                scope.register_destruction_callback(
                    bean_name,
                    Box::new(move || {
                        if let Err(err) = adapter.destroy() {
                            warn!("Destruction of bean with name '{}' threw an exception: {}", name, err);
                        }
                    }),
                );
            }
            BeanScope::Prototype => {}
        }
        Ok(())
    }

    // ----- autowiring -----

    fn find_autowire_candidates(&self, requesting_bean: Option<&str>, required_type: &TypeInfo, multiple: bool) -> Vec<String> {
        let candidate_names = self.bean_names_for_type(required_type);
        let is_self_reference = |candidate: &str| match requesting_bean {
            Some(requesting) => {
                candidate == requesting
                    || self
                        .bean_definition(candidate)
                        .and_then(|d| d.factory_bean_name().map(|f| f == requesting))
                        .unwrap_or(false)
            }
            None => false,
        };
        let is_autowire_candidate = |candidate: &str| {
            self.bean_definition(candidate)
                .map_or(true, |definition| definition.is_autowire_candidate())
        };

        let mut result: Vec<String> = candidate_names
            .iter()
            .filter(|c| !is_self_reference(c) && is_autowire_candidate(c))
            .cloned()
            .collect();
        if result.is_empty() && !multiple {
            // fall back to the requesting bean itself
            result = candidate_names
                .iter()
                .filter(|c| is_self_reference(c) && is_autowire_candidate(c))
                .cloned()
                .collect();
        }
        result
    }

    fn determine_autowire_candidate(
        &self,
        candidates: &[String],
        descriptor: &DependencyDescriptor,
    ) -> Result<String, CoreError> {
        let primaries: Vec<&String> = candidates
            .iter()
            .filter(|c| self.bean_definition(c).map_or(false, |d| d.is_primary()))
            .collect();
        match primaries.len() {
            1 => return Ok(primaries[0].clone()),
            0 => {}
            _ => {
                return Err(CoreError::no_such_bean_of_type(
                    descriptor.required_type.name(),
                    format!(
                        "more than one 'primary' bean found among candidates: [{}]",
                        candidates.join(", ")
                    ),
                ))
            }
        }
        if let Some(name) = &descriptor.dependency_name {
            let canonical = self.registry.canonical_name(name);
            if let Some(matched) = candidates.iter().find(|c| **c == canonical || *c == name) {
                return Ok(matched.clone());
            }
        }
        Err(CoreError::no_unique_bean(
            descriptor.required_type.name(),
            candidates.to_vec(),
        ))
    }

    fn resolve_multiple_beans(
        &self,
        descriptor: &DependencyDescriptor,
        requesting_bean: Option<&str>,
        autowired_bean_names: &mut Vec<String>,
    ) -> Result<Option<Instance>, CoreError> {
        let required_type = &descriptor.required_type;
        let element = match required_type.element_type() {
            Some(element) => element.clone(),
            None => return Ok(None),
        };
        let names = self.find_autowire_candidates(requesting_bean, &element, true);
        if names.is_empty() {
            if descriptor.fallback_to_empty || !descriptor.required {
                return Ok(descriptor.empty_value());
            }
            return Err(CoreError::no_such_bean_of_type(
                required_type.name(),
                "expected at least 1 bean which qualifies as autowire candidate",
            ));
        }

        let mut items = Vec::with_capacity(names.len());
        for name in &names {
            items.push((name.clone(), self.get_bean(name)?));
        }
        autowired_bean_names.extend(names);

        let value = match required_type.kind() {
            TypeKind::Array(_) => Instance::array(&element, items.into_iter().map(|(_, bean)| bean).collect()),
            TypeKind::Collection(_) => {
                Instance::collection(&element, items.into_iter().map(|(_, bean)| bean).collect())
            }
            _ => Instance::map(&element, items.into_iter().collect::<BTreeMap<_, _>>()),
        };
        Ok(Some(value))
    }

    // ----- shutdown -----

    /// Create every non-lazy singleton
    pub fn pre_instantiate_singletons(&self) -> Result<(), CoreError> {
        debug!("Pre-instantiating singletons in {:?}", self);
        for name in self.bean_definition_names() {
            let eager = self
                .bean_definition(&name)
                .map_or(false, |definition| definition.is_singleton() && !definition.is_lazy_init());
            if eager {
                self.get_bean(&name)?;
            }
        }
        Ok(())
    }

    /// Destroy every singleton, dependents before their dependencies
    pub fn destroy_singletons(&self) {
        self.registry.destroy_singletons();
        self.manual_singleton_names.write().clear();
    }

    pub fn destroy_singleton(&self, bean_name: &str) {
        self.registry.destroy_singleton(bean_name);
        self.manual_singleton_names.write().retain(|n| n != bean_name);
    }

    /// Run the destroy callback for a bean the factory does not track, such as a prototype
    pub fn destroy_bean(&self, bean_name: &str, bean: &Instance) -> Result<(), CoreError> {
        let definition = self
            .bean_definition(bean_name)
            .ok_or_else(|| CoreError::no_such_bean_named(bean_name))?;
        if let Some(callback) = definition.destroy_callback() {
            let adapter = DisposableBeanAdapter::new(bean_name, bean.clone(), callback.clone());
            if let Err(err) = adapter.destroy() {
                warn!("Destruction of bean with name '{}' threw an exception: {}", bean_name, err);
            }
        }
        Ok(())
    }

    /// Remove a bean from its custom scope, running its destruction callback
    pub fn destroy_scoped_bean(&self, bean_name: &str) -> Result<(), CoreError> {
        let definition = self
            .bean_definition(bean_name)
            .ok_or_else(|| CoreError::no_such_bean_named(bean_name))?;
        match definition.scope() {
            BeanScope::Custom(scope_name) => {
                let scope = self.registered_scope(scope_name).ok_or_else(|| {
                    CoreError::illegal_state(format!("No Scope registered for scope name '{}'", scope_name))
                })?;
                scope.remove(bean_name);
                Ok(())
            }
            other => Err(CoreError::illegal_state(format!(
                "Bean '{}' has scope '{}', not a custom scope",
                bean_name, other
            ))),
        }
    }
}

impl DependencyResolver for BeanFactory {
    fn resolve_dependency(
        &self,
        descriptor: &DependencyDescriptor,
        requesting_bean: Option<&str>,
        autowired_bean_names: &mut Vec<String>,
    ) -> Result<Option<Instance>, CoreError> {
        if descriptor.is_multiple() {
            return self.resolve_multiple_beans(descriptor, requesting_bean, autowired_bean_names);
        }

        let required_type = &descriptor.required_type;
        let candidates = self.find_autowire_candidates(requesting_bean, required_type, false);
        let chosen = match candidates.len() {
            0 => {
                if descriptor.required {
                    return Err(CoreError::no_such_bean_of_type(
                        required_type.name(),
                        "expected at least 1 bean which qualifies as autowire candidate",
                    ));
                }
                return Ok(None);
            }
            1 => candidates[0].clone(),
            _ => self.determine_autowire_candidate(&candidates, descriptor)?,
        };

        let bean = self.get_bean(&chosen)?;
        if !required_type.is_assignable_from(bean.type_info()) {
            return Err(CoreError::BeanNotOfRequiredType {
                bean_name: chosen,
                required_type: required_type.name().to_string(),
                actual_type: bean.type_info().name().to_string(),
            });
        }
        autowired_bean_names.push(chosen);
        Ok(Some(bean))
    }
}

impl fmt::Debug for BeanFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanFactory")
            .field("id", &self.id)
            .field("definitions", &self.definition_names.read().len())
            .field("singletons", &self.registry.singleton_count())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::descriptor::{ConstructorCandidate, ParameterDescriptor, ValueHolder};
    use crate::container::scope::ThreadScope;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter {
        greeting: Mutex<String>,
    }

    fn greeter_type() -> TypeInfo {
        TypeInfo::class("Greeter").build()
    }

    fn greeter_definition() -> BeanDefinition {
        let ty = greeter_type();
        BeanDefinition::new(ty.clone())
            .constructor(ConstructorCandidate::no_arg(move || {
                Ok(Instance::new(
                    Greeter {
                        greeting: Mutex::new("hello".into()),
                    },
                    ty.clone(),
                ))
            }))
            .with_property_setter(|bean, name, value| {
                let greeter = bean
                    .downcast_ref::<Greeter>()
                    .ok_or_else(|| CoreError::illegal_state("not a greeter"))?;
                match (name, value.as_str()) {
                    ("greeting", Some(text)) => {
                        *greeter.greeting.lock() = text.to_string();
                        Ok(())
                    }
                    _ => Err(CoreError::illegal_state(format!("unknown property {}", name))),
                }
            })
    }

    #[test]
    fn test_singleton_identity_and_properties() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "greeter",
                greeter_definition().property("greeting", ValueSource::Literal("hi".into())),
            )
            .unwrap();

        let first = factory.get_bean("greeter").unwrap();
        let second = factory.get_bean("greeter").unwrap();
        assert!(first.ptr_eq(&second));

        let greeter = factory.get_typed::<Greeter>("greeter").unwrap();
        assert_eq!(*greeter.greeting.lock(), "hi");
        assert!(factory.is_singleton("greeter").unwrap());
    }

    #[test]
    fn test_prototype_creates_new_instances() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition("greeter", greeter_definition().prototype())
            .unwrap();

        let first = factory.get_bean("greeter").unwrap();
        let second = factory.get_bean("greeter").unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(factory.is_prototype("greeter").unwrap());
    }

    #[test]
    fn test_missing_bean_and_aliases() {
        let factory = BeanFactory::new();
        assert!(factory.get_bean("nothing").unwrap_err().is_no_such_bean());

        factory.register_bean_definition("greeter", greeter_definition()).unwrap();
        factory.register_alias("greeter", "hello").unwrap();
        let by_alias = factory.get_bean("hello").unwrap();
        assert!(by_alias.ptr_eq(&factory.get_bean("greeter").unwrap()));
        assert_eq!(factory.aliases("greeter"), vec!["hello".to_string()]);
    }

    #[test]
    fn test_overriding_policy() {
        let lenient = BeanFactory::new();
        lenient.register_bean_definition("greeter", greeter_definition()).unwrap();
        let first = lenient.get_bean("greeter").unwrap();
        lenient.register_bean_definition("greeter", greeter_definition()).unwrap();
        // the old singleton is discarded along with its definition
        assert!(!lenient.get_bean("greeter").unwrap().ptr_eq(&first));

        let strict = BeanFactory::with_config(ContainerConfig::strict());
        strict.register_bean_definition("greeter", greeter_definition()).unwrap();
        let err = strict
            .register_bean_definition("greeter", greeter_definition())
            .unwrap_err();
        assert!(matches!(err, CoreError::BeanDefinitionStore { .. }));
    }

    #[test]
    fn test_bean_of_required_type() {
        let factory = BeanFactory::new();
        factory.register_bean_definition("greeter", greeter_definition()).unwrap();

        assert!(factory.get_bean_of_type("greeter", &greeter_type()).is_ok());
        let err = factory
            .get_bean_of_type("greeter", &TypeInfo::class("Other").build())
            .unwrap_err();
        assert!(matches!(err, CoreError::BeanNotOfRequiredType { .. }));
        assert!(factory.get_typed::<String>("greeter").is_err());
    }

    #[test]
    fn test_depends_on_creates_dependency_first() {
        let factory = BeanFactory::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let order = order.clone();
            let ty = TypeInfo::class(name).build();
            let mut definition = BeanDefinition::new(ty.clone()).constructor(ConstructorCandidate::no_arg(move || {
                order.lock().push(name);
                Ok(Instance::new((), ty.clone()))
            }));
            if name == "second" {
                definition = definition.depends_on("first");
            }
            factory.register_bean_definition(name, definition).unwrap();
        }

        factory.get_bean("second").unwrap();
        assert_eq!(*order.lock(), vec!["first", "second"]);
        assert_eq!(factory.registry().dependent_beans("first"), vec!["second".to_string()]);
    }

    #[test]
    fn test_circular_depends_on_is_rejected() {
        let factory = BeanFactory::new();
        for (name, other) in [("a", "b"), ("b", "a")] {
            let ty = TypeInfo::class(name).build();
            factory
                .register_bean_definition(
                    name,
                    BeanDefinition::new(ty.clone())
                        .depends_on(other)
                        .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new((), ty.clone())))),
                )
                .unwrap();
        }

        let err = factory.get_bean("a").unwrap_err();
        let found = err.find_in_chain(|e| e.to_string().contains("Circular depends-on relationship"));
        assert!(found.is_some(), "unexpected error: {}", err);
    }

    #[test]
    fn test_custom_scope() {
        let factory = BeanFactory::new();
        factory
            .register_scope(ThreadScope::NAME, Arc::new(ThreadScope::new()))
            .unwrap();
        factory
            .register_bean_definition(
                "greeter",
                greeter_definition().with_scope(BeanScope::Custom(ThreadScope::NAME.into())),
            )
            .unwrap();

        let here = factory.get_bean("greeter").unwrap();
        assert!(here.ptr_eq(&factory.get_bean("greeter").unwrap()));

        let other_factory = factory.clone();
        let there = std::thread::spawn(move || other_factory.get_bean("greeter").unwrap())
            .join()
            .unwrap();
        assert!(!here.ptr_eq(&there));

        assert!(factory.register_scope("singleton", Arc::new(ThreadScope::new())).is_err());
    }

    #[test]
    fn test_unregistered_scope_fails() {
        let factory = BeanFactory::new();
        factory
            .register_bean_definition(
                "greeter",
                greeter_definition().with_scope(BeanScope::Custom("session".into())),
            )
            .unwrap();
        assert!(factory.get_bean("greeter").unwrap_err().is_illegal_state());
    }

    #[test]
    fn test_post_processors_wrap_beans() {
        struct Tagging {
            seen: Mutex<Vec<String>>,
        }
        impl BeanPostProcessor for Tagging {
            fn post_process_after_initialization(&self, _bean: Instance, bean_name: &str) -> Result<Instance, CoreError> {
                self.seen.lock().push(bean_name.to_string());
                Ok(Instance::string(format!("wrapped:{}", bean_name)))
            }
        }

        let factory = BeanFactory::new();
        let processor = Arc::new(Tagging {
            seen: Mutex::new(Vec::new()),
        });
        factory.add_bean_post_processor(processor.clone());
        factory.add_bean_post_processor(processor.clone());
        assert_eq!(factory.bean_post_processor_count(), 1);

        factory.register_bean_definition("greeter", greeter_definition()).unwrap();
        factory
            .register_bean_definition("infra", greeter_definition().synthetic())
            .unwrap();

        assert_eq!(factory.get_bean("greeter").unwrap().as_str(), Some("wrapped:greeter"));
        assert!(factory.get_bean("infra").unwrap().is::<Greeter>());
        assert_eq!(*processor.seen.lock(), vec!["greeter".to_string()]);
    }

    #[test]
    fn test_init_and_destroy_callbacks() {
        let factory = BeanFactory::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let init_events = events.clone();
        let destroy_events = events.clone();

        factory
            .register_bean_definition(
                "greeter",
                greeter_definition()
                    .with_init(move |_| {
                        init_events.lock().push("init");
                        Ok(())
                    })
                    .with_destroy(move |_| {
                        destroy_events.lock().push("destroy");
                        Ok(())
                    }),
            )
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert_eq!(*events.lock(), vec!["init"]);
        factory.destroy_singletons();
        assert_eq!(*events.lock(), vec!["init", "destroy"]);
        assert!(!factory.registry().contains_singleton("greeter"));
    }

    #[test]
    fn test_lazy_singletons_are_not_preinstantiated() {
        let factory = BeanFactory::new();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let ty = greeter_type();
        factory
            .register_bean_definition(
                "lazy",
                BeanDefinition::new(ty.clone()).lazy().constructor(ConstructorCandidate::no_arg(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Instance::new((), ty.clone()))
                })),
            )
            .unwrap();

        factory.pre_instantiate_singletons().unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 0);
        factory.get_bean("lazy").unwrap();
        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_dependency_prefers_primary_then_name() {
        let service = TypeInfo::interface("Service").build();
        let factory = BeanFactory::new();
        for name in ["alpha", "beta"] {
            let ty = TypeInfo::class(name).implements(&service).build();
            factory
                .register_bean_definition(
                    name,
                    BeanDefinition::new(ty.clone())
                        .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new((), ty.clone())))),
                )
                .unwrap();
        }

        let err = factory.get_bean_by_type(&service).unwrap_err();
        assert!(matches!(err, CoreError::NoUniqueBean { ref candidates, .. } if candidates.len() == 2));

        let mut names = Vec::new();
        let by_name = factory
            .resolve_dependency(&DependencyDescriptor::of(service.clone()).named("beta"), None, &mut names)
            .unwrap()
            .unwrap();
        assert_eq!(by_name.type_info().name(), "beta");
        assert_eq!(names, vec!["beta".to_string()]);

        let all = factory
            .resolve_dependency(
                &DependencyDescriptor::of(TypeInfo::collection_of(&service)),
                None,
                &mut Vec::new(),
            )
            .unwrap()
            .unwrap();
        assert_eq!(all.as_items().map(|items| items.len()), Some(2));

        let ty = TypeInfo::class("gamma").implements(&service).build();
        factory
            .register_bean_definition(
                "gamma",
                BeanDefinition::new(ty.clone())
                    .primary()
                    .constructor(ConstructorCandidate::no_arg(move || Ok(Instance::new((), ty.clone())))),
            )
            .unwrap();
        assert_eq!(factory.get_bean_by_type(&service).unwrap().type_info().name(), "gamma");
    }

    #[test]
    fn test_optional_dependency_resolves_to_none() {
        let factory = BeanFactory::new();
        let missing = TypeInfo::class("Missing").build();
        let resolved = factory
            .resolve_dependency(&DependencyDescriptor::of(missing.clone()).optional(), None, &mut Vec::new())
            .unwrap();
        assert!(resolved.is_none());
        assert!(factory
            .resolve_dependency(&DependencyDescriptor::of(missing), None, &mut Vec::new())
            .unwrap_err()
            .is_no_such_bean());
    }

    #[test]
    fn test_parent_factory_lookup() {
        let parent = BeanFactory::new();
        parent.register_bean_definition("greeter", greeter_definition()).unwrap();
        let child = BeanFactory::with_parent(parent.clone(), ContainerConfig::default());

        let from_child = child.get_bean("greeter").unwrap();
        assert!(from_child.ptr_eq(&parent.get_bean("greeter").unwrap()));
        assert!(child.contains_bean("greeter"));
        assert_eq!(child.bean_names_for_type(&greeter_type()), vec!["greeter".to_string()]);
    }

    #[test]
    fn test_explicit_constructor_arguments() {
        let factory = BeanFactory::new();
        let ty = TypeInfo::class("Port").build();
        let ctor_type = ty.clone();
        factory
            .register_bean_definition(
                "port",
                BeanDefinition::new(ty)
                    .prototype()
                    .constructor(ConstructorCandidate::new(
                        vec![ParameterDescriptor::new("number", TypeInfo::int())],
                        move |args| Ok(Instance::new(args[0].as_int().unwrap_or_default(), ctor_type.clone())),
                    ))
                    .constructor_arg(0, ValueHolder::literal("8080")),
            )
            .unwrap();

        let port = factory.get_bean("port").unwrap();
        assert_eq!(port.downcast_ref::<i64>(), Some(&8080));
        let custom = factory.get_bean_with_args("port", &[Instance::int(9090)]).unwrap();
        assert_eq!(custom.downcast_ref::<i64>(), Some(&9090));
    }
}
