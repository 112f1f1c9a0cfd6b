use thiserror::Error;

/// Errors raised while loading or checking trellis settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for setting '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Environment variable error: {message}")]
    EnvironmentError { message: String },

    #[error("Unsupported settings source: {message}")]
    ParsingError { message: String },

    #[error("Cannot read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed YAML settings: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Malformed JSON settings: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub fn invalid_value(field: impl Into<String>, value: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }

    pub fn parsing_error(message: impl Into<String>) -> Self {
        Self::ParsingError {
            message: message.into(),
        }
    }

    /// Name of the offending setting, when the error concerns a single one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidValue { field, .. } => Some(field),
            _ => None,
        }
    }
}
