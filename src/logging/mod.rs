//! Logging system for apphost
//!
//! Provides the application logger (a fan-out dispatcher with per-severity
//! counters), pluggable output processors, performance-counter publishing and
//! the process's own `tracing` diagnostics.

pub mod application;
pub mod counters;
pub mod diagnostics;
pub mod dispatcher;
pub mod entry;
pub mod processor;
pub mod processors;

pub use application::ApplicationLogger;
pub use counters::{InMemoryCounters, NoopCounters, PerformanceCounters};
pub use diagnostics::{cleanup_old_diagnostics, init_diagnostics, DiagnosticsGuard};
pub use dispatcher::{CounterSnapshot, LogDispatcher};
pub use entry::{CustomLogItem, LogEntry, Severity};
pub use processor::{create_processor, OutputProcessor};
pub use processors::{EventLogSink, MemorySink, RotatingFileSink};
