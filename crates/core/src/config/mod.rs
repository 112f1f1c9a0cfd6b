pub mod container_config;
pub mod sources;
pub mod validation;

pub use container_config::*;
pub use sources::*;
pub use validation::*;

use std::collections::HashMap;

/// Common surface of trellis settings structs
pub trait ConfigTrait: Sized {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self, ConfigError>;

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError>;

    /// Get configuration source information for debugging
    fn config_sources(&self) -> HashMap<String, ConfigSource>;
}

/// Prefix shared by every trellis environment variable
pub const ENV_PREFIX: &str = "TRELLIS_";
