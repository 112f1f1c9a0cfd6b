use std::fmt;
use std::sync::Arc;

use super::instance::Instance;
use super::invocation::{InvocationError, InvocationResult};
use super::type_info::TypeInfo;
use crate::errors::CoreError;

/// Executable body of a method: receives the receiver and the arguments
pub type MethodBody = Arc<dyn Fn(&Instance, &[Instance]) -> InvocationResult + Send + Sync>;

/// Declared return type of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnType {
    Void,
    Value(TypeInfo),
    /// The declaring type itself (fluent APIs returning `this`)
    SelfType,
}

impl ReturnType {
    pub fn is_void(&self) -> bool {
        matches!(self, ReturnType::Void)
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, ReturnType::Value(ty) if ty.is_primitive())
    }

    pub fn is_object(&self) -> bool {
        matches!(self, ReturnType::Value(ty) if ty.is_object())
    }

    /// Whether a value of type `candidate` may be returned from a method of `declaring_type`
    pub fn accepts(&self, declaring_type: &str, candidate: &TypeInfo) -> bool {
        match self {
            ReturnType::Void => false,
            ReturnType::Value(ty) => ty.is_assignable_from(candidate),
            ReturnType::SelfType => candidate.is_subtype_of(declaring_type),
        }
    }
}

/// Name plus parameter type names; identifies a method across a hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    name: String,
    parameter_types: Vec<String>,
}

impl MethodSignature {
    pub fn new(name: impl Into<String>, parameter_types: &[TypeInfo]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types.iter().map(|t| t.name().to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[String] {
        &self.parameter_types
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.parameter_types.join(","))
    }
}

/// Method metadata with an optional body.
///
/// Interface methods are declared without a body; class methods carry one.
/// Built with chained setters:
///
/// ```ignore
/// Method::new("find")
///     .param(TypeInfo::int())
///     .returns(user_type.clone())
///     .body(|this, args| { ... })
/// ```
#[derive(Clone)]
pub struct Method {
    declaring_type: String,
    name: String,
    parameter_types: Vec<TypeInfo>,
    return_type: ReturnType,
    is_final: bool,
    is_public: bool,
    body: Option<MethodBody>,
}

impl Method {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            declaring_type: String::new(),
            name: name.into(),
            parameter_types: Vec::new(),
            return_type: ReturnType::Void,
            is_final: false,
            is_public: true,
            body: None,
        }
    }

    pub fn declared_by(mut self, type_name: impl Into<String>) -> Self {
        self.declaring_type = type_name.into();
        self
    }

    pub fn param(mut self, ty: TypeInfo) -> Self {
        self.parameter_types.push(ty);
        self
    }

    pub fn params(mut self, types: &[TypeInfo]) -> Self {
        self.parameter_types.extend(types.iter().cloned());
        self
    }

    pub fn returns(mut self, ty: TypeInfo) -> Self {
        self.return_type = ReturnType::Value(ty);
        self
    }

    pub fn returns_self(mut self) -> Self {
        self.return_type = ReturnType::SelfType;
        self
    }

    pub fn with_return_type(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn final_method(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn non_public(mut self) -> Self {
        self.is_public = false;
        self
    }

    pub fn body<F>(mut self, body: F) -> Self
    where
        F: Fn(&Instance, &[Instance]) -> InvocationResult + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(body));
        self
    }

    pub fn with_body(mut self, body: MethodBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_types(&self) -> &[TypeInfo] {
        &self.parameter_types
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_types.len()
    }

    pub fn return_type(&self) -> &ReturnType {
        &self.return_type
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    pub fn is_public(&self) -> bool {
        self.is_public
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn signature(&self) -> MethodSignature {
        MethodSignature::new(self.name.clone(), &self.parameter_types)
    }

    /// Stable cache key: `Declaring.name(param,types)`
    pub fn key(&self) -> String {
        format!("{}.{}", self.declaring_type, self.signature())
    }

    pub fn is_equals_method(&self) -> bool {
        self.name == "equals" && self.parameter_types.len() == 1
    }

    pub fn is_hash_code_method(&self) -> bool {
        self.name == "hashCode" && self.parameter_types.is_empty()
    }

    pub fn is_to_string_method(&self) -> bool {
        self.name == "toString" && self.parameter_types.is_empty()
    }

    /// Run this method's own body, without dynamic dispatch
    pub fn invoke_body(&self, receiver: &Instance, args: &[Instance]) -> InvocationResult {
        match &self.body {
            Some(body) => body(receiver, args),
            None => Err(InvocationError::from(CoreError::no_such_method(
                receiver.type_info().name(),
                self.signature().to_string(),
                "method is abstract",
            ))),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("key", &self.key())
            .field("return_type", &self.return_type)
            .field("is_final", &self.is_final)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl PartialEq for Method {
    fn eq(&self, other: &Self) -> bool {
        self.declaring_type == other.declaring_type && self.signature() == other.signature()
    }
}

impl Eq for Method {}
