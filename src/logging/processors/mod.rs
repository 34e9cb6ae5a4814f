//! Concrete output processors

mod event_log;
mod file;
mod memory;

pub use event_log::{EventLogSink, DEFAULT_LOG_NAME, EVENT_TARGET};
pub use file::{rotated_file_name, RotatingFileSink};
pub use memory::{CapturedEntry, MemorySink, DEFAULT_ALERT_CAPACITY, DEFAULT_CAPACITY};
