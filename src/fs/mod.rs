//! File-system housekeeping driven by recurring tasks

pub mod expired;
pub mod size_monitor;

pub use expired::{expiry_cutoff, purge_expired, purge_expired_except, AgeBasedPurger};
pub use size_monitor::{oversized, SizeTriggeredRotator};
