//! Size-triggered file rotation
//!
//! Polls a file's size on a recurring task and invokes a callback whenever the
//! file is larger than the configured threshold.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::notify::ErrorNotifier;
use crate::timer::RecurringTask;

/// Task name used in error notifications
pub const TASK_NAME: &str = "size-monitor";

/// Return the file's current size if it exceeds `max_size`
///
/// The size is read fresh from the file system on every call.
pub fn oversized(path: &Path, max_size: u64) -> Result<Option<u64>> {
    let size = fs::metadata(path)
        .with_context(|| format!("Failed to read size of {}", path.display()))?
        .len();
    Ok((size > max_size).then_some(size))
}

/// One poll of a watched file: invokes the callback when it is oversized
struct SizeCheck<F> {
    path: PathBuf,
    max_size: u64,
    on_max_size: F,
}

impl<F> SizeCheck<F>
where
    F: FnMut(u64) -> Result<()>,
{
    /// Returns whether the callback ran
    fn poll(&mut self) -> Result<bool> {
        let Some(size) = oversized(&self.path, self.max_size)? else {
            return Ok(false);
        };
        tracing::debug!(path = %self.path.display(), size, max_size = self.max_size, "Maximum file size reached");
        (self.on_max_size)(size)?;
        Ok(true)
    }
}

/// Watches one file and signals when it grows past a threshold
///
/// The callback runs on every poll while the file stays above the threshold;
/// shrinking the file (by rotating it) is the callback's job.
pub struct SizeTriggeredRotator {
    path: PathBuf,
    max_size: u64,
    task: RecurringTask,
}

impl std::fmt::Debug for SizeTriggeredRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SizeTriggeredRotator")
            .field("path", &self.path)
            .field("max_size", &self.max_size)
            .field("task", &self.task)
            .finish()
    }
}

impl SizeTriggeredRotator {
    /// Create a stopped monitor; `on_max_size` receives the observed size
    pub fn new<F>(
        path: impl Into<PathBuf>,
        max_size: u64,
        poll_interval: Duration,
        on_max_size: F,
    ) -> Self
    where
        F: FnMut(u64) -> Result<()> + Send + 'static,
    {
        let path = path.into();
        let mut check = SizeCheck {
            path: path.clone(),
            max_size,
            on_max_size,
        };
        let task = RecurringTask::new(TASK_NAME, poll_interval, move || check.poll().map(|_| ()));

        Self {
            path,
            max_size,
            task,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Faults from reading the size or from the callback
    pub fn errors(&self) -> &ErrorNotifier {
        self.task.errors()
    }

    pub fn start(&self) {
        self.task.start();
    }

    pub fn stop(&self) -> bool {
        self.task.stop()
    }

    pub fn dispose(&self) {
        self.task.dispose();
    }
}
