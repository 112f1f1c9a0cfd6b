use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::invocation::{InvocationError, InvocationResult};
use super::method::Method;
use super::type_info::TypeInfo;
use super::weight::type_difference_weight;
use crate::errors::CoreError;

/// A live object managed by the container: a shared value plus its runtime type
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    type_info: TypeInfo,
}

impl Instance {
    pub fn new<T: Any + Send + Sync>(value: T, type_info: TypeInfo) -> Self {
        Self {
            value: Arc::new(value),
            type_info,
        }
    }

    /// Wrap an already shared value
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>, type_info: TypeInfo) -> Self {
        Self { value, type_info }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(value.into(), TypeInfo::string())
    }

    pub fn int(value: i64) -> Self {
        Self::new(value, TypeInfo::int())
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(value, TypeInfo::boolean())
    }

    pub fn float(value: f64) -> Self {
        Self::new(value, TypeInfo::float())
    }

    pub fn collection(element_type: &TypeInfo, items: Vec<Instance>) -> Self {
        Self::new(items, TypeInfo::collection_of(element_type))
    }

    pub fn array(element_type: &TypeInfo, items: Vec<Instance>) -> Self {
        Self::new(items, TypeInfo::array_of(element_type))
    }

    pub fn map(value_type: &TypeInfo, entries: BTreeMap<String, Instance>) -> Self {
        Self::new(entries, TypeInfo::map_of(value_type))
    }

    pub fn type_info(&self) -> &TypeInfo {
        &self.type_info
    }

    /// Shared value behind this instance
    pub fn value(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.value
    }

    /// Identity comparison: both handles point at the same object
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        self.identity() == other.identity()
    }

    /// Address of the shared value, stable for the object's lifetime
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.value) as *const () as usize
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.downcast_ref::<String>().map(String::as_str)
    }

    pub fn as_int(&self) -> Option<i64> {
        self.downcast_ref::<i64>().copied()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.downcast_ref::<bool>().copied()
    }

    pub fn as_float(&self) -> Option<f64> {
        self.downcast_ref::<f64>().copied()
    }

    /// Items of a collection or array instance
    pub fn as_items(&self) -> Option<&[Instance]> {
        self.downcast_ref::<Vec<Instance>>().map(Vec::as_slice)
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Instance>> {
        self.downcast_ref::<BTreeMap<String, Instance>>()
    }

    /// Pick the visible method named `name` that best accepts `args`
    pub fn find_method(&self, name: &str, args: &[Instance]) -> Result<Method, CoreError> {
        let mut best: Option<(i32, Method)> = None;
        for method in self.type_info.methods_named(name) {
            if method.parameter_count() != args.len() {
                continue;
            }
            let weight = type_difference_weight(method.parameter_types(), args);
            if weight == i32::MAX {
                continue;
            }
            match &best {
                Some((current, _)) if *current <= weight => {}
                _ => best = Some((weight, method)),
            }
        }
        best.map(|(_, m)| m).ok_or_else(|| {
            let arg_types: Vec<&str> = args.iter().map(|a| a.type_info.name()).collect();
            CoreError::no_such_method(
                self.type_info.name(),
                format!("{}({})", name, arg_types.join(",")),
                "no visible method accepts the given arguments",
            )
        })
    }

    /// Invoke a method by name with overload selection and dynamic dispatch
    pub fn invoke(&self, name: &str, args: &[Instance]) -> InvocationResult {
        let method = self.find_method(name, args)?;
        self.invoke_method(&method, args)
    }

    /// Dispatch `method` on this instance's runtime type
    pub fn invoke_method(&self, method: &Method, args: &[Instance]) -> InvocationResult {
        let signature = method.signature();
        match self.type_info.find_implementation(&signature) {
            Some(implementation) => implementation.invoke_body(self, args),
            None => Err(InvocationError::from(CoreError::no_such_method(
                self.type_info.name(),
                signature.to_string(),
                "no implementation found",
            ))),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance({}@{:x})", self.type_info.name(), self.identity())
    }
}
