//! Demo hostable process that logs a heartbeat on an interval

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::logging::ApplicationLogger;
use crate::timer::RecurringTask;

use super::HostableProcess;

/// Logs `"<name> heartbeat #<n>"` as an information entry on every tick
pub struct HeartbeatProcess {
    name: String,
    interval: Duration,
    beats: Arc<AtomicU64>,
    task: Option<RecurringTask>,
}

impl std::fmt::Debug for HeartbeatProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatProcess")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("beats", &self.beats())
            .finish()
    }
}

impl HeartbeatProcess {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            beats: Arc::new(AtomicU64::new(0)),
            task: None,
        }
    }

    /// Heartbeats logged so far
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::SeqCst)
    }

    fn task(&self) -> Result<&RecurringTask> {
        self.task
            .as_ref()
            .with_context(|| format!("{} was not initialized", self.name))
    }
}

impl HostableProcess for HeartbeatProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, logger: Arc<ApplicationLogger>) -> Result<()> {
        let name = self.name.clone();
        let beats = Arc::clone(&self.beats);
        let beat_logger = Arc::clone(&logger);
        let task = RecurringTask::new(format!("{}-heartbeat", self.name), self.interval, move || {
            let n = beats.fetch_add(1, Ordering::SeqCst) + 1;
            beat_logger.info(format!("{} heartbeat #{}", name, n));
            Ok(())
        });

        task.errors().subscribe(move |error| {
            logger.error_with_error("Error in heartbeat.", &error);
        });

        self.task = Some(task);
        Ok(())
    }

    fn start(&mut self, _args: &[String]) -> Result<()> {
        self.task()?.start();
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let task = self.task()?;
        if !task.stop() {
            tracing::warn!(process = %self.name, "Heartbeat still running after stop timeout");
        }
        Ok(())
    }

    fn can_pause_and_continue(&self) -> bool {
        true
    }

    fn pause(&mut self) -> Result<()> {
        self.stop()
    }

    fn resume(&mut self) -> Result<()> {
        self.start(&[])
    }
}
