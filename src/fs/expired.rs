//! Age-based file deletion
//!
//! Handles cleanup of files whose last write is older than a maximum age.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};

use crate::notify::ErrorNotifier;
use crate::timer::RecurringTask;

/// Task name used in error notifications
pub const TASK_NAME: &str = "expired-file-purger";

/// Compute the reference point for files older than `max_age`
pub fn expiry_cutoff(now: SystemTime, max_age: Duration) -> SystemTime {
    now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Delete files in `dir` matching `pattern` last written strictly before `reference`
///
/// Returns the number of files deleted. A listing failure aborts immediately.
/// A deletion failure does not: every remaining file is still processed and all
/// failures are returned together afterwards.
pub fn purge_expired(dir: &Path, pattern: &str, reference: SystemTime) -> Result<usize> {
    purge_expired_except(dir, pattern, reference, None)
}

/// Like [`purge_expired`], but never deletes the file named `keep`
pub fn purge_expired_except(
    dir: &Path,
    pattern: &str,
    reference: SystemTime,
    keep: Option<&OsStr>,
) -> Result<usize> {
    let metadata = fs::metadata(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;
    anyhow::ensure!(metadata.is_dir(), "{} is not a directory", dir.display());

    let full_pattern = format!(
        "{}{}{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        MAIN_SEPARATOR,
        pattern
    );
    let candidates: Vec<PathBuf> = glob::glob(&full_pattern)
        .with_context(|| format!("Invalid file pattern '{}'", pattern))?
        .collect::<Result<_, _>>()
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    let mut deleted = 0;
    let mut failures = Vec::new();

    for path in candidates {
        if keep.is_some() && path.file_name() == keep {
            continue;
        }
        // Modification time is re-read per file, never taken from the listing
        let modified = match fs::metadata(&path) {
            Ok(meta) if !meta.is_file() => continue,
            Ok(meta) => meta.modified(),
            Err(e) => Err(e),
        };

        let outcome = modified.and_then(|modified| {
            if modified < reference {
                fs::remove_file(&path).map(|_| true)
            } else {
                Ok(false)
            }
        });

        match outcome {
            Ok(true) => {
                tracing::debug!(path = %path.display(), "Deleted expired file");
                deleted += 1;
            }
            Ok(false) => {}
            Err(e) => failures.push(format!("{}: {}", path.display(), e)),
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(anyhow!(
            "failed to delete {} expired file(s) ({} deleted): {}",
            failures.len(),
            deleted,
            failures.join("; ")
        ))
    }
}

/// Periodically deletes expired files from one directory
pub struct AgeBasedPurger {
    dir: PathBuf,
    pattern: String,
    max_age: Duration,
    keep: Option<OsString>,
    task: RecurringTask,
}

impl std::fmt::Debug for AgeBasedPurger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeBasedPurger")
            .field("dir", &self.dir)
            .field("pattern", &self.pattern)
            .field("max_age", &self.max_age)
            .field("keep", &self.keep)
            .finish()
    }
}

impl AgeBasedPurger {
    /// Create a stopped purger for files in `dir` matching `pattern`
    pub fn new(
        dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        max_age: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self::build(dir.into(), pattern.into(), max_age, poll_interval, None)
    }

    /// Create a stopped purger that leaves the file named `keep` in place
    ///
    /// Used for directories holding a file that is still being written.
    pub fn excluding(
        dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        max_age: Duration,
        poll_interval: Duration,
        keep: impl Into<OsString>,
    ) -> Self {
        Self::build(
            dir.into(),
            pattern.into(),
            max_age,
            poll_interval,
            Some(keep.into()),
        )
    }

    fn build(
        dir: PathBuf,
        pattern: String,
        max_age: Duration,
        poll_interval: Duration,
        keep: Option<OsString>,
    ) -> Self {
        let scan_dir = dir.clone();
        let scan_pattern = pattern.clone();
        let scan_keep = keep.clone();
        let task = RecurringTask::new(TASK_NAME, poll_interval, move || {
            let reference = expiry_cutoff(SystemTime::now(), max_age);
            let deleted =
                purge_expired_except(&scan_dir, &scan_pattern, reference, scan_keep.as_deref())?;
            if deleted > 0 {
                tracing::info!(dir = %scan_dir.display(), deleted, "Purged expired files");
            }
            Ok(())
        });

        Self {
            dir,
            pattern,
            max_age,
            keep,
            task,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Listing and deletion faults
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
