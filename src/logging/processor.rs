//! Output processor contract and construction from configuration

use anyhow::Result;

use crate::config::ProcessorConfig;
use crate::error::ConfigError;
use crate::notify::ErrorNotifier;

use super::entry::LogEntry;
use super::processors::{EventLogSink, MemorySink, RotatingFileSink};

/// A destination for log entries
///
/// Processors are configured with [`prepare`](OutputProcessor::prepare) before
/// they are shared with a dispatcher. Faults from their own background work
/// (rotation, purging) are raised through [`errors`](OutputProcessor::errors);
/// faults while logging are returned from [`log`](OutputProcessor::log).
pub trait OutputProcessor: Send + Sync {
    /// Processor name, unique within one logger configuration
    fn name(&self) -> &str;

    /// Apply configuration and acquire resources
    fn prepare(&mut self, config: &ProcessorConfig) -> Result<(), ConfigError>;

    /// Write one entry
    fn log(&self, entry: &LogEntry) -> Result<()>;

    /// Channel for faults raised outside of `log`
    fn errors(&self) -> &ErrorNotifier;

    /// Release resources and stop background work. Safe to call more than once.
    fn dispose(&self);
}

/// Processor type names accepted in configuration
pub const PROCESSOR_TYPES: &[&str] = &[
    RotatingFileSink::TYPE_NAME,
    EventLogSink::TYPE_NAME,
    MemorySink::TYPE_NAME,
];

/// Instantiate and prepare the processor described by `config`
pub fn create_processor(config: &ProcessorConfig) -> Result<Box<dyn OutputProcessor>, ConfigError> {
    let mut processor: Box<dyn OutputProcessor> = match config.kind.as_str() {
        RotatingFileSink::TYPE_NAME => Box::new(RotatingFileSink::new()),
        EventLogSink::TYPE_NAME => Box::new(EventLogSink::new()),
        MemorySink::TYPE_NAME => Box::new(MemorySink::new()),
        other => {
            return Err(ConfigError::UnknownType {
                processor: config.name.clone(),
                kind: other.to_string(),
            })
        }
    };

    processor.prepare(config)?;
    Ok(processor)
}
