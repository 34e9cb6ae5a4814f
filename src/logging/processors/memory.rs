//! In-memory capture output processor
//!
//! Provides a thread-safe ring buffer of log entries, plus a smaller buffer that
//! only keeps alerts (errors, warnings, failed audits).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use anyhow::{bail, Result};

use crate::config::ProcessorConfig;
use crate::error::ConfigError;
use crate::logging::entry::{LogEntry, DEFAULT_DATE_TIME_FORMAT};
use crate::logging::processor::OutputProcessor;
use crate::notify::ErrorNotifier;

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default number of alerts kept
pub const DEFAULT_ALERT_CAPACITY: usize = 100;

/// One captured entry together with its rendered text
#[derive(Debug, Clone)]
pub struct CapturedEntry {
    pub entry: LogEntry,
    pub text: String,
}

/// Thread-safe ring buffer for captured log entries
#[derive(Debug)]
pub struct MemorySink {
    name: String,
    template: String,
    date_time_format: String,
    is_xml_template: bool,
    /// All captured entries (capped at max_entries)
    entries: RwLock<VecDeque<CapturedEntry>>,
    /// Alerts only
    alerts: RwLock<VecDeque<CapturedEntry>>,
    max_entries: usize,
    max_alerts: usize,
    closed: AtomicBool,
    errors: ErrorNotifier,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_ALERT_CAPACITY)
    }
}

impl MemorySink {
    /// Type name used in configuration
    pub const TYPE_NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink with specified capacities
    pub fn with_capacity(max_entries: usize, max_alerts: usize) -> Self {
        Self {
            name: String::new(),
            template: "#Description".to_string(),
            date_time_format: DEFAULT_DATE_TIME_FORMAT.to_string(),
            is_xml_template: false,
            entries: RwLock::new(VecDeque::with_capacity(max_entries.min(1024))),
            alerts: RwLock::new(VecDeque::with_capacity(max_alerts.min(1024))),
            max_entries,
            max_alerts,
            closed: AtomicBool::new(false),
            errors: ErrorNotifier::new(),
        }
    }

    /// Set the processor name without going through configuration
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Get all entries as a vector
    pub fn all_entries(&self) -> Vec<CapturedEntry> {
        self.entries
            .read()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Rendered text of all entries
    pub fn texts(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.iter().map(|c| c.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Get the number of entries in the buffer
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get pending alerts
    pub fn pending_alerts(&self) -> Vec<CapturedEntry> {
        self.alerts
            .read()
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().map(|a| a.len()).unwrap_or(0)
    }

    /// Clear all alerts (after they've been acknowledged)
    pub fn clear_alerts(&self) {
        if let Ok(mut alerts) = self.alerts.write() {
            alerts.clear();
        }
    }

    /// Drop every captured entry and alert
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
        self.clear_alerts();
    }

    fn push(&self, captured: CapturedEntry) {
        if captured.entry.severity().is_alert() && self.max_alerts > 0 {
            if let Ok(mut alerts) = self.alerts.write() {
                if alerts.len() >= self.max_alerts {
                    alerts.pop_front();
                }
                alerts.push_back(captured.clone());
            }
        }

        if self.max_entries == 0 {
            return;
        }
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.max_entries {
                entries.pop_front();
            }
            entries.push_back(captured);
        }
    }
}

impl OutputProcessor for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, config: &ProcessorConfig) -> Result<(), ConfigError> {
        self.name = config.name.clone();
        self.template = config.template()?.to_string();
        self.date_time_format = config.date_time_format_or(DEFAULT_DATE_TIME_FORMAT)?;
        self.is_xml_template = config.is_xml_template;
        self.max_entries = config.u64_attr_or("capacity", DEFAULT_CAPACITY as u64)? as usize;
        self.max_alerts = config.u64_attr_or("alert_capacity", DEFAULT_ALERT_CAPACITY as u64)? as usize;
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn log(&self, entry: &LogEntry) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("memory processor '{}' is disposed", self.name);
        }
        let text = entry.render_text(&self.template, &self.date_time_format, self.is_xml_template);
        self.push(CapturedEntry {
            entry: entry.clone(),
            text,
        });
        Ok(())
    }

    fn errors(&self) -> &ErrorNotifier {
        &self.errors
    }

    fn dispose(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::entry::Severity;

    #[test]
    fn test_push_and_retrieve() {
        let sink = MemorySink::with_capacity(100, 10);

        sink.log(&LogEntry::new(Severity::Information, "message 1")).unwrap();
        sink.log(&LogEntry::new(Severity::Warning, "warning 1")).unwrap();
        sink.log(&LogEntry::new(Severity::Error, "error 1")).unwrap();

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.alert_count(), 2);
        assert_eq!(sink.texts(), ["message 1", "warning 1", "error 1"]);

        let alerts = sink.pending_alerts();
        assert_eq!(alerts[0].entry.description(), "warning 1");
        assert_eq!(alerts[1].entry.severity(), Severity::Error);

        sink.clear_alerts();
        assert_eq!(sink.alert_count(), 0);
        assert_eq!(sink.len(), 3);
    }

    #[test]
    fn test_capacity() {
        let sink = MemorySink::with_capacity(3, 2);

        for i in 0..5 {
            sink.log(&LogEntry::new(Severity::Warning, format!("msg {}", i)))
                .unwrap();
        }

        assert_eq!(sink.texts(), ["msg 2", "msg 3", "msg 4"]);
        assert_eq!(sink.alert_count(), 2);
    }

    #[test]
    fn test_prepare_applies_template_and_capacity() {
        let mut sink = MemorySink::new();
        let config = ProcessorConfig::new("capture", MemorySink::TYPE_NAME)
            .with_template("[#Type] #Description")
            .with_xml_template(true)
            .with_attribute("capacity", 2);
        sink.prepare(&config).unwrap();

        sink.log(&LogEntry::new(Severity::SuccessAudit, "a & b")).unwrap();
        sink.log(&LogEntry::new(Severity::Information, "two")).unwrap();
        sink.log(&LogEntry::new(Severity::Information, "three")).unwrap();

        assert_eq!(sink.name(), "capture");
        assert_eq!(sink.texts(), ["[Information] two", "[Information] three"]);

        sink.clear();
        sink.log(&LogEntry::new(Severity::SuccessAudit, "a & b")).unwrap();
        assert_eq!(sink.texts(), ["[SuccessAudit] a &amp; b"]);
    }

    #[test]
    fn test_disposed_sink_rejects_entries() {
        let sink = MemorySink::new().named("m");
        sink.dispose();
        assert!(sink.log(&LogEntry::new(Severity::Information, "x")).is_err());
        assert!(sink.is_empty());
    }
}
