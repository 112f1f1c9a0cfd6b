use thiserror::Error;

use crate::config::ConfigError;
use crate::types::InvocationError;

/// Core error type for the trellis container
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Error creating bean with name '{bean_name}': {message}")]
    BeanCreation {
        bean_name: String,
        message: String,
        source: Option<Box<CoreError>>,
        related_causes: Vec<CoreError>,
    },

    #[error("Error creating bean with name '{bean_name}': {message}")]
    BeanCurrentlyInCreation { bean_name: String, message: String },

    #[error("Error creating bean with name '{bean_name}': {message}")]
    BeanCreationNotAllowed { bean_name: String, message: String },

    #[error("{message}")]
    NoSuchBean {
        bean_name: Option<String>,
        required_type: Option<String>,
        message: String,
    },

    #[error(
        "No qualifying bean of type '{required_type}' available: expected single matching bean but found {}: {}",
        .candidates.len(),
        .candidates.join(",")
    )]
    NoUniqueBean {
        required_type: String,
        candidates: Vec<String>,
    },

    #[error("Error creating bean with name '{bean_name}': Unsatisfied dependency expressed through {injection_point}: {message}")]
    UnsatisfiedDependency {
        bean_name: String,
        injection_point: String,
        message: String,
        source: Option<Box<CoreError>>,
    },

    #[error("Invalid bean definition with name '{bean_name}': {message}")]
    BeanDefinitionStore { bean_name: String, message: String },

    #[error("Error creating bean with name '{bean_name}': Ambiguous {kind} matches found in bean '{bean_name}' (hint: specify index/type/name arguments for simple parameters to avoid type ambiguities): [{}]", .candidates.join(", "))]
    AmbiguousCandidates {
        bean_name: String,
        kind: String,
        candidates: Vec<String>,
    },

    #[error("Error creating bean with name '{bean_name}': {message}")]
    NoMatchingCandidate { bean_name: String, message: String },

    #[error("Error creating bean with name '{bean_name}': {message}")]
    InvalidFactoryMethod { bean_name: String, message: String },

    #[error("Could not register object [{instance}] under bean name '{bean_name}': there is already object [{existing}] bound")]
    DuplicateSingleton {
        bean_name: String,
        instance: String,
        existing: String,
    },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error("Failed to convert value of type '{value_type}' to required type '{required_type}'")]
    TypeMismatch {
        value_type: String,
        required_type: String,
    },

    #[error("Bean named '{bean_name}' is expected to be of type '{required_type}' but was actually of type '{actual_type}'")]
    BeanNotOfRequiredType {
        bean_name: String,
        required_type: String,
        actual_type: String,
    },

    #[error("No such method {method} on type {type_name}: {message}")]
    NoSuchMethod {
        type_name: String,
        method: String,
        message: String,
    },

    #[error("{message}: {source}")]
    Invocation {
        message: String,
        source: InvocationError,
    },

    #[error("Invalid bean scope: {scope}")]
    InvalidScope { scope: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("System error: {message}")]
    SystemError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CoreError {
    /// Create a bean creation error
    pub fn bean_creation(bean_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BeanCreation {
            bean_name: bean_name.into(),
            message: message.into(),
            source: None,
            related_causes: Vec::new(),
        }
    }

    /// Create a bean creation error wrapping its cause
    pub fn bean_creation_with_cause(
        bean_name: impl Into<String>,
        message: impl Into<String>,
        cause: CoreError,
    ) -> Self {
        Self::BeanCreation {
            bean_name: bean_name.into(),
            message: message.into(),
            source: Some(Box::new(cause)),
            related_causes: Vec::new(),
        }
    }

    /// Create the error raised when a bean is requested while it is being created
    pub fn currently_in_creation(bean_name: impl Into<String>) -> Self {
        Self::BeanCurrentlyInCreation {
            bean_name: bean_name.into(),
            message: "Requested bean is currently in creation: Is there an unresolvable circular reference?"
                .to_string(),
        }
    }

    pub fn no_such_bean_named(bean_name: impl Into<String>) -> Self {
        let bean_name = bean_name.into();
        Self::NoSuchBean {
            message: format!("No bean named '{}' available", bean_name),
            bean_name: Some(bean_name),
            required_type: None,
        }
    }

    pub fn no_such_bean_of_type(required_type: impl Into<String>, detail: impl AsRef<str>) -> Self {
        let required_type = required_type.into();
        Self::NoSuchBean {
            message: format!(
                "No qualifying bean of type '{}' available: {}",
                required_type,
                detail.as_ref()
            ),
            bean_name: None,
            required_type: Some(required_type),
        }
    }

    pub fn no_unique_bean(required_type: impl Into<String>, candidates: Vec<String>) -> Self {
        Self::NoUniqueBean {
            required_type: required_type.into(),
            candidates,
        }
    }

    pub fn unsatisfied_dependency(
        bean_name: impl Into<String>,
        injection_point: impl Into<String>,
        message: impl Into<String>,
        cause: Option<CoreError>,
    ) -> Self {
        Self::UnsatisfiedDependency {
            bean_name: bean_name.into(),
            injection_point: injection_point.into(),
            message: message.into(),
            source: cause.map(Box::new),
        }
    }

    pub fn bean_definition_store(bean_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BeanDefinitionStore {
            bean_name: bean_name.into(),
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    pub fn type_mismatch(value_type: impl Into<String>, required_type: impl Into<String>) -> Self {
        Self::TypeMismatch {
            value_type: value_type.into(),
            required_type: required_type.into(),
        }
    }

    pub fn no_such_method(
        type_name: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::NoSuchMethod {
            type_name: type_name.into(),
            method: method.into(),
            message: message.into(),
        }
    }

    pub fn invocation(message: impl Into<String>, source: InvocationError) -> Self {
        Self::Invocation {
            message: message.into(),
            source,
        }
    }

    /// Create a new configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new system error with source
    pub fn system_error_with_source(
        message: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::SystemError {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Attach an error suppressed while this one was being produced
    pub fn add_related_cause(&mut self, cause: CoreError) {
        if let Self::BeanCreation { related_causes, .. } = self {
            related_causes.push(cause);
        }
    }

    pub fn related_causes(&self) -> &[CoreError] {
        match self {
            Self::BeanCreation { related_causes, .. } => related_causes,
            _ => &[],
        }
    }

    /// Directly wrapped container error, if any
    pub fn cause(&self) -> Option<&CoreError> {
        match self {
            Self::BeanCreation { source, .. } | Self::UnsatisfiedDependency { source, .. } => {
                source.as_deref()
            }
            Self::Invocation { source, .. } => source.downcast_ref::<CoreError>(),
            _ => None,
        }
    }

    /// Name of the bean whose creation failed, for creation-related errors
    pub fn bean_name(&self) -> Option<&str> {
        match self {
            Self::BeanCreation { bean_name, .. }
            | Self::BeanCurrentlyInCreation { bean_name, .. }
            | Self::BeanCreationNotAllowed { bean_name, .. }
            | Self::UnsatisfiedDependency { bean_name, .. }
            | Self::BeanDefinitionStore { bean_name, .. }
            | Self::AmbiguousCandidates { bean_name, .. }
            | Self::NoMatchingCandidate { bean_name, .. }
            | Self::InvalidFactoryMethod { bean_name, .. }
            | Self::DuplicateSingleton { bean_name, .. } => Some(bean_name),
            Self::NoSuchBean { bean_name, .. } => bean_name.as_deref(),
            _ => None,
        }
    }

    /// Check whether this error, or any error it wraps, is an unresolvable circular reference
    pub fn is_circular_reference(&self) -> bool {
        matches!(self, Self::BeanCurrentlyInCreation { .. })
            || self.cause().map_or(false, CoreError::is_circular_reference)
    }

    /// Check if the error is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::Config(_)
                | Self::BeanDefinitionStore { .. }
                | Self::AmbiguousCandidates { .. }
                | Self::NoMatchingCandidate { .. }
                | Self::InvalidFactoryMethod { .. }
                | Self::DuplicateSingleton { .. }
        )
    }

    /// Check if the error reports a missing bean
    pub fn is_no_such_bean(&self) -> bool {
        matches!(self, Self::NoSuchBean { .. } | Self::NoUniqueBean { .. })
    }

    /// Check if the error is an illegal state error
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, Self::IllegalState { .. })
    }

    /// Find the first error in the cause chain matching `predicate`
    pub fn find_in_chain(&self, predicate: impl Fn(&CoreError) -> bool) -> Option<&CoreError> {
        let mut current = Some(self);
        while let Some(err) = current {
            if predicate(err) {
                return Some(err);
            }
            current = err.cause();
        }
        None
    }
}
