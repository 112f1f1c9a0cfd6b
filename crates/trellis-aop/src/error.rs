use thiserror::Error;
use trellis_core::{CoreError, InvocationError};

/// Errors raised while configuring proxies or dispatching through them
#[derive(Debug, Error)]
pub enum AopError {
    #[error("AOP configuration error: {message}")]
    Config { message: String },

    #[error("Advice object [{kind}] is neither a supported advice type nor an advisor")]
    UnknownAdviceType { kind: String },

    #[error("{message}")]
    Invocation { message: String },

    #[error("Cannot find current proxy: enable 'expose_proxy' on the proxy configuration to make it available, and make sure current_proxy() is called on the thread running the intercepted call")]
    NoCurrentProxy,

    #[error("Target source error: {message}")]
    TargetSource {
        message: String,
        #[source]
        source: Option<Box<CoreError>>,
    },

    #[error("Pool for bean '{bean_name}' exhausted: all {max_size} targets are in use")]
    PoolExhausted { bean_name: String, max_size: usize },

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AopError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation {
            message: message.into(),
        }
    }

    pub fn target_source(message: impl Into<String>, source: Option<CoreError>) -> Self {
        Self::TargetSource {
            message: message.into(),
            source: source.map(Box::new),
        }
    }

    /// Error raised when the configuration is changed after being frozen
    pub fn frozen(action: &str) -> Self {
        Self::config(format!("Cannot {}: Configuration has been frozen.", action))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::UnknownAdviceType { .. })
    }

    /// Convert into a container error attributed to `bean_name`
    pub fn into_core(self, bean_name: &str) -> CoreError {
        match self {
            Self::Core(err) => err,
            other => CoreError::bean_creation(bean_name, other.to_string()),
        }
    }
}

impl From<AopError> for InvocationError {
    fn from(err: AopError) -> Self {
        match err {
            AopError::Core(core) => InvocationError::from(core),
            other => InvocationError::unchecked(other),
        }
    }
}
