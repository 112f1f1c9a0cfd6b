use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::sources::{env_flag, env_parse, ConfigSource};
use super::validation::ConfigError;
use super::ConfigTrait;

/// Settings governing bean creation in a `BeanFactory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Expose early singleton references so setter cycles can resolve
    pub allow_circular_references: bool,
    /// Tolerate beans that were injected raw and wrapped afterwards
    pub allow_raw_injection_despite_wrapping: bool,
    /// Cap on errors recorded while a singleton is being created
    pub suppressed_exceptions_limit: usize,
    /// Default constructor matching mode for definitions that do not choose one
    pub lenient_constructor_resolution: bool,
    /// Whether re-registering a definition name replaces the old one
    pub allow_bean_definition_overriding: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            suppressed_exceptions_limit: 100,
            lenient_constructor_resolution: true,
            allow_bean_definition_overriding: true,
        }
    }
}

impl ContainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict settings: no circular references, no overriding, strict matching
    pub fn strict() -> Self {
        Self {
            allow_circular_references: false,
            allow_raw_injection_despite_wrapping: false,
            suppressed_exceptions_limit: 100,
            lenient_constructor_resolution: false,
            allow_bean_definition_overriding: false,
        }
    }
}

impl ConfigTrait for ContainerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_flag("TRELLIS_ALLOW_CIRCULAR_REFERENCES")? {
            config.allow_circular_references = v;
        }
        if let Some(v) = env_flag("TRELLIS_ALLOW_RAW_INJECTION_DESPITE_WRAPPING")? {
            config.allow_raw_injection_despite_wrapping = v;
        }
        if let Some(v) = env_parse("TRELLIS_SUPPRESSED_EXCEPTIONS_LIMIT", "non-negative integer")? {
            config.suppressed_exceptions_limit = v;
        }
        if let Some(v) = env_flag("TRELLIS_LENIENT_CONSTRUCTOR_RESOLUTION")? {
            config.lenient_constructor_resolution = v;
        }
        if let Some(v) = env_flag("TRELLIS_ALLOW_BEAN_DEFINITION_OVERRIDING")? {
            config.allow_bean_definition_overriding = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.suppressed_exceptions_limit == 0 {
            return Err(ConfigError::invalid_value(
                "suppressed_exceptions_limit",
                "0",
                "a positive limit",
            ));
        }
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert(
            "allow_circular_references".to_string(),
            ConfigSource::for_env_var("TRELLIS_ALLOW_CIRCULAR_REFERENCES", true),
        );
        sources.insert(
            "allow_raw_injection_despite_wrapping".to_string(),
            ConfigSource::for_env_var("TRELLIS_ALLOW_RAW_INJECTION_DESPITE_WRAPPING", false),
        );
        sources.insert(
            "suppressed_exceptions_limit".to_string(),
            ConfigSource::for_env_var("TRELLIS_SUPPRESSED_EXCEPTIONS_LIMIT", 100),
        );
        sources.insert(
            "lenient_constructor_resolution".to_string(),
            ConfigSource::for_env_var("TRELLIS_LENIENT_CONSTRUCTOR_RESOLUTION", true),
        );
        sources.insert(
            "allow_bean_definition_overriding".to_string(),
            ConfigSource::for_env_var("TRELLIS_ALLOW_BEAN_DEFINITION_OVERRIDING", true),
        );
        sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{from_json_str, from_yaml_str};
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::default();
        assert!(config.allow_circular_references);
        assert!(!config.allow_raw_injection_despite_wrapping);
        assert_eq!(config.suppressed_exceptions_limit, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: ContainerConfig = from_yaml_str("allow_circular_references: false\n").unwrap();
        assert!(!config.allow_circular_references);
        assert!(config.lenient_constructor_resolution);
    }

    #[test]
    fn test_json_parsing() {
        let config: ContainerConfig =
            from_json_str(r#"{"suppressed_exceptions_limit": 5, "allow_bean_definition_overriding": false}"#)
                .unwrap();
        assert_eq!(config.suppressed_exceptions_limit, 5);
        assert!(!config.allow_bean_definition_overriding);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("TRELLIS_ALLOW_CIRCULAR_REFERENCES", "false");
        env::set_var("TRELLIS_SUPPRESSED_EXCEPTIONS_LIMIT", "7");

        let config = ContainerConfig::from_env().unwrap();
        assert!(!config.allow_circular_references);
        assert_eq!(config.suppressed_exceptions_limit, 7);
        assert!(config.config_sources()["allow_circular_references"].is_env_var());
        assert!(config.config_sources()["lenient_constructor_resolution"].is_default());

        env::remove_var("TRELLIS_ALLOW_CIRCULAR_REFERENCES");
        env::remove_var("TRELLIS_SUPPRESSED_EXCEPTIONS_LIMIT");
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_garbage() {
        env::set_var("TRELLIS_LENIENT_CONSTRUCTOR_RESOLUTION", "maybe");
        let result = ContainerConfig::from_env();
        env::remove_var("TRELLIS_LENIENT_CONSTRUCTOR_RESOLUTION");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
