//! Configuration management for apphost
//!
//! The whole application is configured from one TOML file. Output processors are
//! declared as `[[processors]]` tables; everything besides the common keys is kept
//! as processor-specific attributes and read through typed accessors that produce
//! [`ConfigError`]s.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::entry::is_valid_date_format;
use crate::logging::processor::PROCESSOR_TYPES;

/// Which groups of performance counters the logger maintains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterGroups {
    /// Raw error/warning totals
    #[serde(default = "default_true")]
    pub standard: bool,
    /// Errors/warnings logged during the last minute
    #[serde(default = "default_true")]
    pub per_minute: bool,
    /// Errors/warnings logged since the previous sample
    #[serde(default = "default_true")]
    pub delta: bool,
}

impl Default for CounterGroups {
    fn default() -> Self {
        Self {
            standard: true,
            per_minute: true,
            delta: true,
        }
    }
}

/// Settings for the application logger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Publish error/warning counts to performance counters
    #[serde(default)]
    pub update_counters: bool,

    /// Counter category the slots are registered under
    #[serde(default = "default_counter_category")]
    pub counter_category: String,

    /// Instance name the slots are registered for
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    #[serde(default)]
    pub counters: CounterGroups,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            update_counters: false,
            counter_category: default_counter_category(),
            instance_name: default_instance_name(),
            counters: CounterGroups::default(),
        }
    }
}

/// Settings for the host and its hostable process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Name the hosted process reports in its lifecycle messages
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Start the process as soon as the host is up
    #[serde(default = "default_true")]
    pub autostart: bool,

    /// Interval of the demo heartbeat process in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            autostart: true,
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

/// Settings for apphost's own tracing output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSettings {
    /// Directory for diagnostics files; stderr when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Diagnostics files older than this are deleted at startup
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl Default for DiagnosticsSettings {
    fn default() -> Self {
        Self {
            log_dir: None,
            filter: default_filter(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_counter_category() -> String {
    "apphost".to_string()
}

fn default_instance_name() -> String {
    "default".to_string()
}

fn default_service_name() -> String {
    "apphost".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_filter() -> String {
    "apphost=info".to_string()
}

fn default_retention_days() -> u64 {
    7
}

/// Configuration of one output processor
///
/// ```toml
/// [[processors]]
/// name = "file"
/// type = "file"
/// template = "#DateTime [#Type] #Description\n"
/// filename = "~/.apphost/logs/app.log"
/// max_log_size_kb = 1024
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Unique processor name
    pub name: String,

    /// Implementation to instantiate (`file`, `event_log`, `memory`)
    #[serde(rename = "type")]
    pub kind: String,

    /// Text template with `#` tokens
    #[serde(default)]
    pub template: Option<String>,

    /// strftime pattern for `#DateTime`
    #[serde(default)]
    pub date_time_format: Option<String>,

    /// XML-escape `#Description`
    #[serde(default)]
    pub is_xml_template: bool,

    /// Processor-specific attributes
    #[serde(flatten)]
    pub attributes: BTreeMap<String, toml::Value>,
}

impl ProcessorConfig {
    /// Create a config with no template or attributes
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            template: None,
            date_time_format: None,
            is_xml_template: false,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_date_time_format(mut self, format: impl Into<String>) -> Self {
        self.date_time_format = Some(format.into());
        self
    }

    pub fn with_xml_template(mut self, is_xml: bool) -> Self {
        self.is_xml_template = is_xml;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The template, which every processor requires
    pub fn template(&self) -> Result<&str, ConfigError> {
        self.template
            .as_deref()
            .ok_or_else(|| self.missing("template"))
    }

    /// The `#DateTime` format, validated
    pub fn date_time_format_or(&self, default: &str) -> Result<String, ConfigError> {
        let format = self.date_time_format.as_deref().unwrap_or(default);
        if !is_valid_date_format(format) {
            return Err(self.invalid(
                "date_time_format",
                format!("'{}' is not a valid strftime pattern", format),
            ));
        }
        Ok(format.to_string())
    }

    /// Required string attribute
    pub fn str_attr(&self, key: &str) -> Result<String, ConfigError> {
        match self.attributes.get(key) {
            None => Err(self.missing(key)),
            Some(toml::Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(self.invalid(key, format!("expected a string, found {}", other.type_str()))),
        }
    }

    /// Optional string attribute
    pub fn str_attr_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        if self.attributes.contains_key(key) {
            self.str_attr(key)
        } else {
            Ok(default.to_string())
        }
    }

    /// Optional non-negative integer attribute; numeric strings are accepted
    pub fn u64_attr_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.attributes.get(key) {
            None => Ok(default),
            Some(toml::Value::Integer(i)) => u64::try_from(*i)
                .map_err(|_| self.invalid(key, format!("{} is negative", i))),
            Some(toml::Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| self.invalid(key, format!("'{}' is not a number", s))),
            Some(other) => Err(self.invalid(key, format!("expected an integer, found {}", other.type_str()))),
        }
    }

    /// Optional boolean attribute; `"true"`/`"false"` strings are accepted
    pub fn bool_attr_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.attributes.get(key) {
            None => Ok(default),
            Some(toml::Value::Boolean(b)) => Ok(*b),
            Some(toml::Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(self.invalid(key, format!("'{}' is not a boolean", s))),
            },
            Some(other) => Err(self.invalid(key, format!("expected a boolean, found {}", other.type_str()))),
        }
    }

    /// Build a setup error for this processor
    pub fn setup_error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Setup {
            processor: self.name.clone(),
            reason: reason.into(),
        }
    }

    fn missing(&self, attribute: &str) -> ConfigError {
        ConfigError::MissingAttribute {
            processor: self.name.clone(),
            attribute: attribute.to_string(),
        }
    }

    fn invalid(&self, attribute: &str, reason: String) -> ConfigError {
        ConfigError::InvalidValue {
            processor: self.name.clone(),
            attribute: attribute.to_string(),
            reason,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logger: LoggerSettings,

    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub diagnostics: DiagnosticsSettings,

    /// Output processors, attached in declaration order
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

impl AppConfig {
    /// Load configuration from the default file, or return default if not found
    pub fn load() -> Result<Self> {
        let path = config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from `path`
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("Invalid TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject duplicate processor names and unknown processor types
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            if seen.contains(&processor.name.as_str()) {
                return Err(ConfigError::DuplicateName(processor.name.clone()));
            }
            if !PROCESSOR_TYPES.contains(&processor.kind.as_str()) {
                return Err(ConfigError::UnknownType {
                    processor: processor.name.clone(),
                    kind: processor.kind.clone(),
                });
            }
            seen.push(processor.name.as_str());
        }
        Ok(())
    }

    /// Human-readable summary logged at startup
    pub fn describe(&self) -> String {
        let mut text = String::from("Application Logger Configuration\n");
        let _ = writeln!(
            text,
            "Counters: {} (category: {}, instance: {})",
            if self.logger.update_counters { "enabled" } else { "disabled" },
            self.logger.counter_category,
            self.logger.instance_name
        );

        if self.processors.is_empty() {
            text.push_str("Processors: none");
            return text;
        }

        text.push_str("Processors:");
        for processor in &self.processors {
            let _ = write!(text, "\n  Name: {}, Type: {}", processor.name, processor.kind);
            for (key, value) in &processor.attributes {
                let _ = write!(text, ", {}: {}", key, value);
            }
        }
        text
    }
}

/// Expand a leading `~` in a configured path
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Get the base configuration directory (~/.apphost)
/// Falls back to ./.apphost if home directory cannot be determined
pub fn config_dir() -> PathBuf {
    try_config_dir().unwrap_or_else(|| {
        tracing::warn!("Could not determine home directory, using current directory for config");
        PathBuf::from(".apphost")
    })
}

/// Try to get the base configuration directory, returning None if home dir is unavailable
pub fn try_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".apphost"))
}

/// Get the path to the config file
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}
