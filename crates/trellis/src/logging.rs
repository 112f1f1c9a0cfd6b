//! # Structured Logging Integration
//!
//! Installs a `tracing` subscriber for the container, its proxies and the
//! transaction managers. Library crates only emit events; applications call
//! [`init_logging`] once at startup.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt::Layer as FmtLayer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use trellis_core::config::{env_flag, env_parse, ConfigError, ConfigSource, ConfigTrait};

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
    Plain,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "plain" | "text" => Ok(Self::Plain),
            _ => Err(ConfigError::invalid_value("format", raw, "json, pretty or plain")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Plain => "plain",
        })
    }
}

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Logging configuration for trellis applications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "warn")
    pub level: String,
    pub format: LogFormat,
    /// Include file and line number information
    pub include_location: bool,
    pub include_timestamp: bool,
    /// Environment filter (supports directives like "trellis_tx=debug,trellis_aop=info")
    pub env_filter: Option<String>,
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    /// Custom fields reported with the initialization event
    pub global_fields: serde_json::Map<String, Value>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_location: false,
            include_timestamp: true,
            env_filter: None,
            service_name: None,
            service_version: None,
            global_fields: serde_json::Map::new(),
        }
    }
}

impl LoggingConfig {
    /// Create production logging configuration
    pub fn production() -> Self {
        Self {
            format: LogFormat::Json,
            env_filter: Some("trellis_core=info,trellis_aop=warn,trellis_tx=info".to_string()),
            ..Self::default()
        }
        .with_global_field("env", "production")
    }

    /// Create development logging configuration
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            include_location: true,
            env_filter: Some("trellis_core=debug,trellis_aop=debug,trellis_tx=debug".to_string()),
            ..Self::default()
        }
        .with_global_field("env", "development")
    }

    /// Create test logging configuration (minimal output)
    pub fn test() -> Self {
        Self {
            level: "error".to_string(),
            format: LogFormat::Plain,
            include_timestamp: false,
            ..Self::default()
        }
        .with_global_field("env", "test")
    }

    pub fn with_global_field<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.global_fields.insert(key.into(), value.into());
        self
    }

    /// Set service name and version
    pub fn with_service(mut self, name: &str, version: &str) -> Self {
        self.service_name = Some(name.to_string());
        self.service_version = Some(version.to_string());
        self
    }

    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Directives the filter is built from when `RUST_LOG` is unset
    pub fn filter_directives(&self) -> &str {
        self.env_filter.as_deref().unwrap_or(&self.level)
    }

    fn output_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let layer = FmtLayer::new()
            .with_writer(io::stdout)
            .with_file(self.include_location)
            .with_line_number(self.include_location);
        match (self.format, self.include_timestamp) {
            (LogFormat::Json, true) => layer.json().boxed(),
            (LogFormat::Json, false) => layer.json().without_time().boxed(),
            (LogFormat::Pretty, true) => layer.pretty().boxed(),
            (LogFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (LogFormat::Plain, true) => layer.boxed(),
            (LogFormat::Plain, false) => layer.without_time().boxed(),
        }
    }
}

impl ConfigTrait for LoggingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<String>("TRELLIS_LOG_LEVEL", "trace, debug, info, warn, error or off")? {
            config.level = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = env_parse::<LogFormat>("TRELLIS_LOG_FORMAT", "json, pretty or plain")? {
            config.format = v;
        }
        if let Some(v) = env_parse::<String>("TRELLIS_LOG_FILTER", "tracing filter directives")? {
            config.env_filter = Some(v);
        }
        if let Some(v) = env_flag("TRELLIS_LOG_INCLUDE_LOCATION")? {
            config.include_location = v;
        }
        if let Some(v) = env_flag("TRELLIS_LOG_INCLUDE_TIMESTAMP")? {
            config.include_timestamp = v;
        }
        if let Some(v) = env_parse::<String>("TRELLIS_SERVICE_NAME", "service name")? {
            config.service_name = Some(v);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(ConfigError::invalid_value(
                "level",
                self.level.clone(),
                "trace, debug, info, warn, error or off",
            ));
        }
        if let Some(filter) = &self.env_filter {
            EnvFilter::try_new(filter)
                .map_err(|e| ConfigError::invalid_value("env_filter", filter.clone(), e.to_string()))?;
        }
        Ok(())
    }

    fn config_sources(&self) -> HashMap<String, ConfigSource> {
        let mut sources = HashMap::new();
        sources.insert("level".to_string(), ConfigSource::for_env_var("TRELLIS_LOG_LEVEL", "info"));
        sources.insert("format".to_string(), ConfigSource::for_env_var("TRELLIS_LOG_FORMAT", LogFormat::Pretty));
        sources.insert(
            "env_filter".to_string(),
            ConfigSource::for_env_var("TRELLIS_LOG_FILTER", "<level>"),
        );
        sources.insert(
            "include_location".to_string(),
            ConfigSource::for_env_var("TRELLIS_LOG_INCLUDE_LOCATION", false),
        );
        sources.insert(
            "include_timestamp".to_string(),
            ConfigSource::for_env_var("TRELLIS_LOG_INCLUDE_TIMESTAMP", true),
        );
        sources.insert(
            "service_name".to_string(),
            ConfigSource::for_env_var("TRELLIS_SERVICE_NAME", "<none>"),
        );
        sources.insert("global_fields".to_string(), ConfigSource::Programmatic);
        sources
    }
}

/// Initialize structured logging for the application.
///
/// `RUST_LOG` takes precedence over the configured filter. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.validate()?;
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.filter_directives()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(config.output_layer())
        .try_init()?;

    tracing::info!(target: "trellis::logging", "{}", initialization_event(&config));
    Ok(())
}

fn initialization_event(config: &LoggingConfig) -> Value {
    let mut event = json!({
        "message": "Structured logging initialized",
        "config": {
            "level": config.level,
            "format": config.format.to_string(),
            "include_location": config.include_location,
            "include_timestamp": config.include_timestamp,
        }
    });
    if let Some(name) = &config.service_name {
        event["service_name"] = json!(name);
    }
    if let Some(version) = &config.service_version {
        event["service_version"] = json!(version);
    }
    for (key, value) in &config.global_fields {
        event[key] = value.clone();
    }
    event
}

/// Log container startup with system information
pub fn log_startup_info(service_name: &str, service_version: &str) {
    let startup_info = json!({
        "event": "application_startup",
        "service": service_name,
        "version": service_version,
        "framework": crate::FRAMEWORK_NAME,
        "framework_version": crate::VERSION,
        "pid": std::process::id(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
    });

    tracing::info!(target: "trellis::startup", "{}", startup_info);
}

/// Log container shutdown
pub fn log_shutdown_info(service_name: &str) {
    let shutdown_info = json!({
        "event": "application_shutdown",
        "service": service_name,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    tracing::info!(target: "trellis::shutdown", "{}", shutdown_info);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use trellis_core::config::from_yaml_str;

    #[test]
    fn test_logging_config_presets() {
        let prod = LoggingConfig::production();
        assert_eq!(prod.format, LogFormat::Json);
        assert_eq!(prod.level, "info");
        assert!(prod.global_fields.contains_key("env"));
        assert!(prod.validate().is_ok());

        let dev = LoggingConfig::development();
        assert_eq!(dev.format, LogFormat::Pretty);
        assert_eq!(dev.level, "debug");
        assert!(dev.include_location);

        let test = LoggingConfig::test();
        assert_eq!(test.level, "error");
        assert!(!test.include_timestamp);
        assert_eq!(test.filter_directives(), "error");
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::default()
            .with_global_field("app", "ledger")
            .with_service("ledger-service", "1.0.0")
            .with_env_filter("trellis_tx=trace");

        assert_eq!(config.global_fields.get("app").unwrap(), "ledger");
        assert_eq!(config.filter_directives(), "trellis_tx=trace");

        let event = initialization_event(&config);
        assert_eq!(event["service_name"], "ledger-service");
        assert_eq!(event["service_version"], "1.0.0");
        assert_eq!(event["app"], "ledger");
        assert_eq!(event["config"]["format"], "pretty");
    }

    #[test]
    fn test_yaml_config() {
        let config: LoggingConfig = from_yaml_str("level: warn\nformat: json\ninclude_timestamp: false\n").unwrap();
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.include_timestamp);
        assert!(config.env_filter.is_none());
    }

    #[test]
    fn test_invalid_level_rejected() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        env::set_var("TRELLIS_LOG_LEVEL", "DEBUG");
        env::set_var("TRELLIS_LOG_FORMAT", "text");
        env::set_var("TRELLIS_LOG_INCLUDE_LOCATION", "true");

        let config = LoggingConfig::from_env().unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Plain);
        assert!(config.include_location);
        assert!(config.config_sources()["level"].is_env_var());

        env::remove_var("TRELLIS_LOG_LEVEL");
        env::remove_var("TRELLIS_LOG_FORMAT");
        env::remove_var("TRELLIS_LOG_INCLUDE_LOCATION");
    }

    #[test]
    fn test_startup_and_shutdown_events_do_not_panic() {
        log_startup_info("ledger", "0.1.0");
        log_shutdown_info("ledger");
    }
}
