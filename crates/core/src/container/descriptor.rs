use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::container::autowiring::DependencyDescriptor;
use crate::container::scope::BeanScope;
use crate::errors::CoreError;
use crate::types::{Instance, TypeInfo};

/// Supplies a ready instance, bypassing constructor and factory-method resolution
pub type InstanceSupplier = Arc<dyn Fn() -> Result<Instance, CoreError> + Send + Sync>;

/// Builds an instance from resolved constructor arguments
pub type ConstructorBody = Arc<dyn Fn(&[Instance]) -> Result<Instance, CoreError> + Send + Sync>;

/// Runs a factory method; receives the factory bean for instance methods. `None` means void.
pub type FactoryMethodBody =
    Arc<dyn Fn(Option<&Instance>, &[Instance]) -> Result<Option<Instance>, CoreError> + Send + Sync>;

/// Applies one property value to a bean
pub type PropertySetter = Arc<dyn Fn(&Instance, &str, Instance) -> Result<(), CoreError> + Send + Sync>;

/// Init or destroy callback
pub type LifecycleCallback = Arc<dyn Fn(&Instance) -> Result<(), CoreError> + Send + Sync>;

/// Attribute forcing subclass proxies for a bean
pub const PRESERVE_TARGET_CLASS_ATTRIBUTE: &str = "trellis.aop.preserveTargetClass";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    NonPublic,
}

/// Declared parameter of a constructor or factory method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDescriptor {
    pub name: Option<String>,
    pub type_info: TypeInfo,
}

impl ParameterDescriptor {
    pub fn new(name: impl Into<String>, type_info: TypeInfo) -> Self {
        Self {
            name: Some(name.into()),
            type_info,
        }
    }

    pub fn typed(type_info: TypeInfo) -> Self {
        Self { name: None, type_info }
    }
}

fn describe(name: &str, parameters: &[ParameterDescriptor]) -> String {
    let types: Vec<&str> = parameters.iter().map(|p| p.type_info.name()).collect();
    format!("{}({})", name, types.join(","))
}

/// One constructor a bean type offers
#[derive(Clone)]
pub struct ConstructorCandidate {
    parameters: Vec<ParameterDescriptor>,
    visibility: Visibility,
    body: ConstructorBody,
}

impl ConstructorCandidate {
    pub fn new<F>(parameters: Vec<ParameterDescriptor>, body: F) -> Self
    where
        F: Fn(&[Instance]) -> Result<Instance, CoreError> + Send + Sync + 'static,
    {
        Self {
            parameters,
            visibility: Visibility::Public,
            body: Arc::new(body),
        }
    }

    /// Default constructor
    pub fn no_arg<F>(body: F) -> Self
    where
        F: Fn() -> Result<Instance, CoreError> + Send + Sync + 'static,
    {
        Self::new(Vec::new(), move |_| body())
    }

    pub fn non_public(mut self) -> Self {
        self.visibility = Visibility::NonPublic;
        self
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn parameter_types(&self) -> Vec<TypeInfo> {
        self.parameters.iter().map(|p| p.type_info.clone()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn instantiate(&self, args: &[Instance]) -> Result<Instance, CoreError> {
        (self.body)(args)
    }

    /// Human readable form used in error messages, e.g. `Repo(DataSource)`
    pub fn describe(&self, type_name: &str) -> String {
        describe(type_name, &self.parameters)
    }
}

impl fmt::Debug for ConstructorCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorCandidate")
            .field("parameters", &self.parameters)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// One factory method that can produce the bean
#[derive(Clone)]
pub struct FactoryMethodCandidate {
    name: String,
    parameters: Vec<ParameterDescriptor>,
    visibility: Visibility,
    is_static: bool,
    return_type: Option<TypeInfo>,
    body: FactoryMethodBody,
}

impl FactoryMethodCandidate {
    /// Instance method invoked on the factory bean; `return_type` of `None` declares void
    pub fn new<F>(
        name: impl Into<String>,
        parameters: Vec<ParameterDescriptor>,
        return_type: Option<TypeInfo>,
        body: F,
    ) -> Self
    where
        F: Fn(Option<&Instance>, &[Instance]) -> Result<Option<Instance>, CoreError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            parameters,
            visibility: Visibility::Public,
            is_static: false,
            return_type,
            body: Arc::new(body),
        }
    }

    /// Static factory method on the bean type itself
    pub fn static_method<F>(
        name: impl Into<String>,
        parameters: Vec<ParameterDescriptor>,
        return_type: TypeInfo,
        body: F,
    ) -> Self
    where
        F: Fn(&[Instance]) -> Result<Instance, CoreError> + Send + Sync + 'static,
    {
        let mut candidate = Self::new(name, parameters, Some(return_type), move |_, args| {
            body(args).map(Some)
        });
        candidate.is_static = true;
        candidate
    }

    pub fn non_public(mut self) -> Self {
        self.visibility = Visibility::NonPublic;
        self
    }

    pub fn as_static(mut self) -> Self {
        self.is_static = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[ParameterDescriptor] {
        &self.parameters
    }

    pub fn parameter_types(&self) -> Vec<TypeInfo> {
        self.parameters.iter().map(|p| p.type_info.clone()).collect()
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn return_type(&self) -> Option<&TypeInfo> {
        self.return_type.as_ref()
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_none()
    }

    pub fn invoke(&self, factory_bean: Option<&Instance>, args: &[Instance]) -> Result<Option<Instance>, CoreError> {
        (self.body)(factory_bean, args)
    }

    pub fn describe(&self) -> String {
        describe(&self.name, &self.parameters)
    }
}

impl fmt::Debug for FactoryMethodCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryMethodCandidate")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("is_static", &self.is_static)
            .field("return_type", &self.return_type)
            .finish()
    }
}

/// Where an argument or property value comes from
#[derive(Debug, Clone)]
pub enum ValueSource {
    /// A fixed object
    Instance(Instance),
    /// Another bean, by name
    Reference(String),
    /// Text converted to the parameter type on use
    Literal(String),
    /// Resolved by type from the factory
    Autowired(DependencyDescriptor),
}

/// Constructor argument with optional type and name hints
#[derive(Debug, Clone)]
pub struct ValueHolder {
    pub value: ValueSource,
    pub type_name: Option<String>,
    pub name: Option<String>,
}

impl ValueHolder {
    pub fn new(value: ValueSource) -> Self {
        Self {
            value,
            type_name: None,
            name: None,
        }
    }

    pub fn instance(value: Instance) -> Self {
        Self::new(ValueSource::Instance(value))
    }

    pub fn reference(bean_name: impl Into<String>) -> Self {
        Self::new(ValueSource::Reference(bean_name.into()))
    }

    pub fn literal(text: impl Into<String>) -> Self {
        Self::new(ValueSource::Literal(text.into()))
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Explicit constructor or factory-method arguments of a definition
#[derive(Debug, Clone, Default)]
pub struct ConstructorArgumentValues {
    indexed: BTreeMap<usize, ValueHolder>,
    generic: Vec<ValueHolder>,
}

impl ConstructorArgumentValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_indexed(&mut self, index: usize, holder: ValueHolder) {
        self.indexed.insert(index, holder);
    }

    pub fn add_generic(&mut self, holder: ValueHolder) {
        self.generic.push(holder);
    }

    pub fn indexed(&self) -> &BTreeMap<usize, ValueHolder> {
        &self.indexed
    }

    pub fn generic(&self) -> &[ValueHolder] {
        &self.generic
    }

    pub fn argument_count(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }
}

/// Named property applied after instantiation
#[derive(Debug, Clone)]
pub struct PropertyValue {
    pub name: String,
    pub value: ValueSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutowireMode {
    #[default]
    No,
    Constructor,
}

/// Candidate picked by constructor or factory-method resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedCandidate {
    Constructor(usize),
    FactoryMethod(usize),
}

/// Cached argument that has to be re-resolved on every creation
#[derive(Debug, Clone)]
pub enum PreparedArgument {
    Resolved(Instance),
    Source(ValueSource),
    Autowired(DependencyDescriptor),
}

/// Outcome of a previous resolution, reused by later creations of the same definition
#[derive(Debug, Default)]
pub struct ResolutionCache {
    pub resolved_candidate: Option<ResolvedCandidate>,
    pub arguments_resolved: bool,
    pub resolved_arguments: Option<Vec<Instance>>,
    pub prepared_arguments: Option<Vec<PreparedArgument>>,
}

/// Everything the factory needs to create one bean
pub struct BeanDefinition {
    bean_type: TypeInfo,
    scope: BeanScope,
    lazy_init: bool,
    primary: bool,
    autowire_candidate: bool,
    depends_on: Vec<String>,
    autowire_mode: AutowireMode,
    constructors: Vec<ConstructorCandidate>,
    factory_methods: Vec<FactoryMethodCandidate>,
    factory_bean_name: Option<String>,
    factory_method_name: Option<String>,
    constructor_args: ConstructorArgumentValues,
    property_values: Vec<PropertyValue>,
    property_setter: Option<PropertySetter>,
    instance_supplier: Option<InstanceSupplier>,
    init_callback: Option<LifecycleCallback>,
    destroy_callback: Option<LifecycleCallback>,
    lenient_constructor_resolution: Option<bool>,
    synthetic: bool,
    attributes: HashMap<String, String>,
    resolution: Mutex<ResolutionCache>,
}

impl BeanDefinition {
    pub fn new(bean_type: TypeInfo) -> Self {
        Self {
            bean_type,
            scope: BeanScope::Singleton,
            lazy_init: false,
            primary: false,
            autowire_candidate: true,
            depends_on: Vec::new(),
            autowire_mode: AutowireMode::No,
            constructors: Vec::new(),
            factory_methods: Vec::new(),
            factory_bean_name: None,
            factory_method_name: None,
            constructor_args: ConstructorArgumentValues::new(),
            property_values: Vec::new(),
            property_setter: None,
            instance_supplier: None,
            init_callback: None,
            destroy_callback: None,
            lenient_constructor_resolution: None,
            synthetic: false,
            attributes: HashMap::new(),
            resolution: Mutex::new(ResolutionCache::default()),
        }
    }

    /// Set the scope
    pub fn with_scope(mut self, scope: BeanScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn prototype(self) -> Self {
        self.with_scope(BeanScope::Prototype)
    }

    pub fn lazy(mut self) -> Self {
        self.lazy_init = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Exclude from by-type autowiring
    pub fn not_autowire_candidate(mut self) -> Self {
        self.autowire_candidate = false;
        self
    }

    /// Bean that must be created first
    pub fn depends_on(mut self, bean_name: impl Into<String>) -> Self {
        self.depends_on.push(bean_name.into());
        self
    }

    pub fn autowire_constructor(mut self) -> Self {
        self.autowire_mode = AutowireMode::Constructor;
        self
    }

    pub fn constructor(mut self, candidate: ConstructorCandidate) -> Self {
        self.constructors.push(candidate);
        self
    }

    pub fn factory_method(mut self, candidate: FactoryMethodCandidate) -> Self {
        self.factory_methods.push(candidate);
        self
    }

    /// Create through `method_name`, static on the bean type unless a factory bean is set
    pub fn with_factory_method(mut self, method_name: impl Into<String>) -> Self {
        self.factory_method_name = Some(method_name.into());
        self
    }

    pub fn with_factory_bean(mut self, bean_name: impl Into<String>) -> Self {
        self.factory_bean_name = Some(bean_name.into());
        self
    }

    pub fn constructor_arg(mut self, index: usize, holder: ValueHolder) -> Self {
        self.constructor_args.add_indexed(index, holder);
        self
    }

    pub fn generic_arg(mut self, holder: ValueHolder) -> Self {
        self.constructor_args.add_generic(holder);
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: ValueSource) -> Self {
        self.property_values.push(PropertyValue {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_property_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Instance, &str, Instance) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.property_setter = Some(Arc::new(setter));
        self
    }

    pub fn with_instance_supplier<F>(mut self, supplier: F) -> Self
    where
        F: Fn() -> Result<Instance, CoreError> + Send + Sync + 'static,
    {
        self.instance_supplier = Some(Arc::new(supplier));
        self
    }

    pub fn with_init<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.init_callback = Some(Arc::new(callback));
        self
    }

    pub fn with_destroy<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Instance) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.destroy_callback = Some(Arc::new(callback));
        self
    }

    /// Override the factory-wide lenient constructor resolution setting
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient_constructor_resolution = Some(lenient);
        self
    }

    /// Mark as framework infrastructure; post-processors skip synthetic beans
    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn bean_type(&self) -> &TypeInfo {
        &self.bean_type
    }

    pub fn scope(&self) -> &BeanScope {
        &self.scope
    }

    pub fn is_singleton(&self) -> bool {
        self.scope.is_singleton()
    }

    pub fn is_prototype(&self) -> bool {
        self.scope.is_prototype()
    }

    pub fn is_lazy_init(&self) -> bool {
        self.lazy_init
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_autowire_candidate(&self) -> bool {
        self.autowire_candidate
    }

    pub fn depends_on_names(&self) -> &[String] {
        &self.depends_on
    }

    pub fn autowire_mode(&self) -> AutowireMode {
        self.autowire_mode
    }

    pub fn constructors(&self) -> &[ConstructorCandidate] {
        &self.constructors
    }

    pub fn factory_methods(&self) -> &[FactoryMethodCandidate] {
        &self.factory_methods
    }

    pub fn factory_bean_name(&self) -> Option<&str> {
        self.factory_bean_name.as_deref()
    }

    pub fn factory_method_name(&self) -> Option<&str> {
        self.factory_method_name.as_deref()
    }

    pub fn constructor_args(&self) -> &ConstructorArgumentValues {
        &self.constructor_args
    }

    pub fn has_constructor_args(&self) -> bool {
        !self.constructor_args.is_empty()
    }

    pub fn property_values(&self) -> &[PropertyValue] {
        &self.property_values
    }

    pub fn property_setter(&self) -> Option<&PropertySetter> {
        self.property_setter.as_ref()
    }

    pub fn instance_supplier(&self) -> Option<&InstanceSupplier> {
        self.instance_supplier.as_ref()
    }

    pub fn init_callback(&self) -> Option<&LifecycleCallback> {
        self.init_callback.as_ref()
    }

    pub fn destroy_callback(&self) -> Option<&LifecycleCallback> {
        self.destroy_callback.as_ref()
    }

    pub fn lenient_constructor_resolution(&self) -> Option<bool> {
        self.lenient_constructor_resolution
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Lock the resolution cache
    pub fn resolution(&self) -> MutexGuard<'_, ResolutionCache> {
        self.resolution.lock()
    }

    /// Whether a previous creation already picked a constructor or factory method
    pub fn is_resolved(&self) -> bool {
        self.resolution.lock().resolved_candidate.is_some()
    }

    /// Copy of this definition with an empty resolution cache
    pub fn clone_definition(&self) -> Self {
        Self {
            bean_type: self.bean_type.clone(),
            scope: self.scope.clone(),
            lazy_init: self.lazy_init,
            primary: self.primary,
            autowire_candidate: self.autowire_candidate,
            depends_on: self.depends_on.clone(),
            autowire_mode: self.autowire_mode,
            constructors: self.constructors.clone(),
            factory_methods: self.factory_methods.clone(),
            factory_bean_name: self.factory_bean_name.clone(),
            factory_method_name: self.factory_method_name.clone(),
            constructor_args: self.constructor_args.clone(),
            property_values: self.property_values.clone(),
            property_setter: self.property_setter.clone(),
            instance_supplier: self.instance_supplier.clone(),
            init_callback: self.init_callback.clone(),
            destroy_callback: self.destroy_callback.clone(),
            lenient_constructor_resolution: self.lenient_constructor_resolution,
            synthetic: self.synthetic,
            attributes: self.attributes.clone(),
            resolution: Mutex::new(ResolutionCache::default()),
        }
    }

    /// Check the definition is internally consistent before registration
    pub fn validate(&self, bean_name: &str) -> Result<(), CoreError> {
        if self.factory_bean_name.is_some() && self.factory_method_name.is_none() {
            return Err(CoreError::bean_definition_store(
                bean_name,
                "factory bean name given without a factory method name",
            ));
        }
        if let Some(method_name) = &self.factory_method_name {
            if !self.factory_methods.iter().any(|m| &m.name == method_name) {
                return Err(CoreError::bean_definition_store(
                    bean_name,
                    format!("no factory method named '{}' declared", method_name),
                ));
            }
        }
        if self.property_setter.is_none() && !self.property_values.is_empty() {
            return Err(CoreError::bean_definition_store(
                bean_name,
                "property values declared without a property setter",
            ));
        }
        if let BeanScope::Custom(name) = &self.scope {
            if name.trim().is_empty() {
                return Err(CoreError::InvalidScope { scope: name.clone() });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("bean_type", &self.bean_type)
            .field("scope", &self.scope)
            .field("lazy_init", &self.lazy_init)
            .field("primary", &self.primary)
            .field("depends_on", &self.depends_on)
            .field("autowire_mode", &self.autowire_mode)
            .field("constructors", &self.constructors.len())
            .field("factory_bean_name", &self.factory_bean_name)
            .field("factory_method_name", &self.factory_method_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_builder() {
        let data_source = TypeInfo::interface("DataSource").build();
        let repo = TypeInfo::class("Repo").build();
        let repo_type = repo.clone();

        let definition = BeanDefinition::new(repo.clone())
            .prototype()
            .primary()
            .depends_on("dataSource")
            .autowire_constructor()
            .constructor(ConstructorCandidate::new(
                vec![ParameterDescriptor::new("ds", data_source.clone())],
                move |_| Ok(Instance::new((), repo_type.clone())),
            ))
            .with_attribute(PRESERVE_TARGET_CLASS_ATTRIBUTE, "true");

        assert!(definition.is_prototype());
        assert!(definition.is_primary());
        assert_eq!(definition.depends_on_names(), ["dataSource".to_string()]);
        assert_eq!(definition.constructors()[0].describe("Repo"), "Repo(DataSource)");
        assert_eq!(definition.attribute(PRESERVE_TARGET_CLASS_ATTRIBUTE), Some("true"));
        assert!(definition.validate("repo").is_ok());
    }

    #[test]
    fn test_clone_definition_resets_resolution() {
        let definition = BeanDefinition::new(TypeInfo::class("Thing").build());
        definition.resolution().resolved_candidate = Some(ResolvedCandidate::Constructor(0));
        assert!(definition.is_resolved());

        let copy = definition.clone_definition();
        assert!(!copy.is_resolved());
        assert_eq!(copy.bean_type().name(), "Thing");
    }

    #[test]
    fn test_validate_rejects_inconsistent_definitions() {
        let ty = TypeInfo::class("Thing").build();
        let err = BeanDefinition::new(ty.clone())
            .with_factory_bean("factory")
            .validate("thing")
            .unwrap_err();
        assert!(err.is_configuration());

        let err = BeanDefinition::new(ty.clone())
            .with_factory_method("create")
            .validate("thing")
            .unwrap_err();
        assert!(err.is_configuration());

        let err = BeanDefinition::new(ty)
            .property("name", ValueSource::Literal("x".into()))
            .validate("thing")
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_argument_values() {
        let mut args = ConstructorArgumentValues::new();
        assert!(args.is_empty());
        args.add_indexed(1, ValueHolder::literal("5").with_type("int"));
        args.add_generic(ValueHolder::reference("dataSource").with_name("ds"));
        assert_eq!(args.argument_count(), 2);
        assert_eq!(args.indexed()[&1].type_name.as_deref(), Some("int"));
    }
}
