//! System event log output processor
//!
//! Entries are emitted as `tracing` events under the `apphost::event_log`
//! target, carrying the configured source and log name, so whatever subscriber
//! the host installs (journald, syslog, a file) receives them at a level that
//! matches the entry's severity.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};

use crate::config::ProcessorConfig;
use crate::error::ConfigError;
use crate::logging::entry::{LogEntry, Severity, DEFAULT_DATE_TIME_FORMAT};
use crate::logging::processor::OutputProcessor;
use crate::notify::ErrorNotifier;

/// Log name used when none is configured
pub const DEFAULT_LOG_NAME: &str = "Application";

/// Target of the emitted events
pub const EVENT_TARGET: &str = "apphost::event_log";

#[derive(Debug, Default)]
pub struct EventLogSink {
    name: String,
    source: String,
    log_name: String,
    template: String,
    date_time_format: String,
    open: AtomicBool,
    errors: ErrorNotifier,
}

impl EventLogSink {
    /// Type name used in configuration
    pub const TYPE_NAME: &'static str = "event_log";

    pub fn new() -> Self {
        Self::default()
    }

    /// Event source the entries are attributed to
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn log_name(&self) -> &str {
        &self.log_name
    }
}

impl OutputProcessor for EventLogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, config: &ProcessorConfig) -> Result<(), ConfigError> {
        self.name = config.name.clone();
        self.source = config.str_attr("source")?;
        if self.source.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                processor: config.name.clone(),
                attribute: "source".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        self.log_name = config.str_attr_or("log_name", DEFAULT_LOG_NAME)?;
        self.date_time_format = config.date_time_format_or(DEFAULT_DATE_TIME_FORMAT)?;
        self.template = config.template()?.to_string();
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn log(&self, entry: &LogEntry) -> Result<()> {
        if !self.open.load(Ordering::SeqCst) {
            bail!("event log processor '{}' is not open", self.name);
        }

        let message = entry.render_text(&self.template, &self.date_time_format, false);
        let source = self.source.as_str();
        let log_name = self.log_name.as_str();
        let kind = entry.severity().as_str();

        match entry.severity() {
            Severity::Error => {
                tracing::error!(target: EVENT_TARGET, source, log_name, kind, "{}", message)
            }
            Severity::Warning | Severity::FailureAudit => {
                tracing::warn!(target: EVENT_TARGET, source, log_name, kind, "{}", message)
            }
            Severity::Information | Severity::SuccessAudit => {
                tracing::info!(target: EVENT_TARGET, source, log_name, kind, "{}", message)
            }
        }
        Ok(())
    }

    fn errors(&self) -> &ErrorNotifier {
        &self.errors
    }

    fn dispose(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
