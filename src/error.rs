//! Error types shared across the logger, housekeeping tasks and host

use std::sync::Arc;

/// Errors raised through error notifications
///
/// These never escape a `log()` call or a timer tick as a return value. They are
/// delivered to the subscribers of an [`ErrorNotifier`](crate::notify::ErrorNotifier).
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An output processor failed while handling a log entry
    #[error("output processor '{processor}' failed to log: {error:#}")]
    Sink {
        /// Name of the failing processor
        processor: String,
        /// The processor's failure
        error: anyhow::Error,
    },

    /// One `log()` call produced failures in one or more processors
    #[error("{} output processor(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<LogError>),

    /// A processor reported a fault from its background work
    #[error("output processor '{processor}' reported: {error}")]
    Processor {
        /// Name of the reporting processor
        processor: String,
        /// The forwarded notification
        error: Arc<LogError>,
    },

    /// A recurring task action returned an error or panicked
    #[error("recurring task '{task}' failed: {error:#}")]
    Action {
        /// Name of the task
        task: String,
        /// The action's failure
        error: anyhow::Error,
    },
}

impl LogError {
    /// Number of leaf failures carried by this error
    pub fn failure_count(&self) -> usize {
        match self {
            LogError::Aggregate(errors) => errors.iter().map(LogError::failure_count).sum(),
            LogError::Processor { error, .. } => error.failure_count(),
            _ => 1,
        }
    }
}

fn join_errors(errors: &[LogError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Configuration faults, raised synchronously during setup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required attribute was not present
    #[error("processor '{processor}': missing required attribute '{attribute}'")]
    MissingAttribute {
        /// Processor being configured
        processor: String,
        /// Attribute name
        attribute: String,
    },

    /// An attribute was present but could not be used
    #[error("processor '{processor}': invalid value for attribute '{attribute}': {reason}")]
    InvalidValue {
        /// Processor being configured
        processor: String,
        /// Attribute name
        attribute: String,
        /// Why the value was rejected
        reason: String,
    },

    /// Two processors share a name
    #[error("duplicated processor name: {0}")]
    DuplicateName(String),

    /// No processor implementation is registered for the type
    #[error("processor '{processor}': unknown type '{kind}'")]
    UnknownType {
        /// Processor being configured
        processor: String,
        /// The configured type
        kind: String,
    },

    /// Preparing the processor's resources failed
    #[error("processor '{processor}': {reason}")]
    Setup {
        /// Processor being configured
        processor: String,
        /// What went wrong
        reason: String,
    },
}

/// Host-level failures
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The logger was requested before the host initialized it
    #[error("application logger is not initialized")]
    LoggerNotInitialized,

    /// The configuration could not be applied
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The hostable process failed in one of its lifecycle calls
    #[error("hostable process '{process}' failed to {stage}: {error:#}")]
    Process {
        /// Process name
        process: String,
        /// Lifecycle stage (init, start, stop, ...)
        stage: &'static str,
        /// Underlying failure
        error: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_display_preserves_order() {
        let error = LogError::Aggregate(vec![
            LogError::Sink {
                processor: "first".to_string(),
                error: anyhow::anyhow!("disk full"),
            },
            LogError::Sink {
                processor: "second".to_string(),
                error: anyhow::anyhow!("closed"),
            },
        ]);

        let text = error.to_string();
        assert!(text.starts_with("2 output processor(s) failed"));
        let first = text.find("first").unwrap();
        let second = text.find("second").unwrap();
        assert!(first < second);
        assert_eq!(error.failure_count(), 2);
    }

    #[test]
    fn test_processor_error_wraps_inner() {
        let inner = Arc::new(LogError::Action {
            task: "size-monitor".to_string(),
            error: anyhow::anyhow!("file not found"),
        });
        let error = LogError::Processor {
            processor: "file".to_string(),
            error: inner,
        };
        assert_eq!(
            error.to_string(),
            "output processor 'file' reported: recurring task 'size-monitor' failed: file not found"
        );
        assert_eq!(error.failure_count(), 1);
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingAttribute {
            processor: "eventlog".to_string(),
            attribute: "source".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "processor 'eventlog': missing required attribute 'source'"
        );
    }
}
