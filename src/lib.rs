//! apphost - application hosting shim with a pluggable multi-sink logger
//!
//! This library provides a fan-out application logger with per-severity counters,
//! rotating file / event log / in-memory output processors, a non-reentrant
//! recurring task used for housekeeping, and a host that drives one hostable
//! process through its lifecycle.

pub mod config;
pub mod error;
pub mod fs;
pub mod host;
pub mod logging;
pub mod notify;
pub mod timer;
