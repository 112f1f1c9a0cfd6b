use std::fmt;

use crate::errors::CoreError;
use crate::types::{Instance, TypeInfo};

/// Describes one injection point: what type is needed and how strictly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDescriptor {
    pub required_type: TypeInfo,
    /// Parameter or property name; breaks ties between several candidates
    pub dependency_name: Option<String>,
    pub required: bool,
    /// Resolve a missing container-typed dependency to an empty container
    pub fallback_to_empty: bool,
}

impl DependencyDescriptor {
    /// Required dependency on `required_type`
    pub fn of(required_type: TypeInfo) -> Self {
        Self {
            required_type,
            dependency_name: None,
            required: true,
            fallback_to_empty: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.dependency_name = Some(name.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_fallback_to_empty(mut self, fallback: bool) -> Self {
        self.fallback_to_empty = fallback;
        self
    }

    /// Whether the injection point collects every matching bean
    pub fn is_multiple(&self) -> bool {
        self.required_type.is_container()
    }

    /// Empty value of the container type, for the fallback case
    pub fn empty_value(&self) -> Option<Instance> {
        let element = self.required_type.element_type()?;
        match self.required_type.kind() {
            crate::types::TypeKind::Array(_) => Some(Instance::array(element, Vec::new())),
            crate::types::TypeKind::Collection(_) => Some(Instance::collection(element, Vec::new())),
            crate::types::TypeKind::Map(_) => Some(Instance::map(element, Default::default())),
            _ => None,
        }
    }
}

impl fmt::Display for DependencyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dependency_name {
            Some(name) => write!(f, "'{}' of type [{}]", name, self.required_type.name()),
            None => write!(f, "type [{}]", self.required_type.name()),
        }
    }
}

/// Resolves injection points against the beans a factory knows about
pub trait DependencyResolver: Send + Sync {
    /// Resolve `descriptor` on behalf of `requesting_bean`.
    ///
    /// Names of the beans that satisfied the dependency are pushed onto
    /// `autowired_bean_names` so callers can record dependent-bean links.
    /// Returns `Ok(None)` only for optional dependencies with no candidate.
    fn resolve_dependency(
        &self,
        descriptor: &DependencyDescriptor,
        requesting_bean: Option<&str>,
        autowired_bean_names: &mut Vec<String>,
    ) -> Result<Option<Instance>, CoreError>;
}
