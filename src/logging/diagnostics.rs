//! apphost's own diagnostics output
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` plus a fmt layer that
//! writes either to a timestamped file in the diagnostics directory or to stderr.
//! Old diagnostics files are removed with the same age-based purge the file
//! processor uses.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::Local;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::DiagnosticsSettings;
use crate::fs::{expiry_cutoff, purge_expired};

/// Pattern matching diagnostics files
pub const DIAGNOSTICS_FILE_PATTERN: &str = "apphost-*.log";

/// Generate a timestamped diagnostics file path
pub fn create_diagnostics_file_path(dir: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
    dir.join(format!("apphost-{}.log", timestamp))
}

/// A writer appending to the shared diagnostics file
struct FileWriter {
    file: Arc<Mutex<File>>,
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(mut file) = self.file.lock() {
            file.write_all(buf)?;
            file.flush()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if let Ok(mut file) = self.file.lock() {
            file.flush()
        } else {
            Ok(())
        }
    }
}

/// Writer factory for tracing-subscriber
struct FileWriterMaker {
    file: Arc<Mutex<File>>,
}

impl<'a> MakeWriter<'a> for FileWriterMaker {
    type Writer = FileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Keeps the diagnostics file open for the life of the process
#[derive(Debug)]
pub struct DiagnosticsGuard {
    path: Option<PathBuf>,
    _file: Option<Arc<Mutex<File>>>,
}

impl DiagnosticsGuard {
    /// Path of the diagnostics file, `None` when writing to stderr
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured filter.
pub fn init_diagnostics(settings: &DiagnosticsSettings) -> Result<DiagnosticsGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| settings.filter.as_str().into());

    let Some(dir) = &settings.log_dir else {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init()
            .context("Failed to install diagnostics subscriber")?;
        return Ok(DiagnosticsGuard {
            path: None,
            _file: None,
        });
    };

    fs::create_dir_all(dir).context("Failed to create diagnostics directory")?;
    let path = create_diagnostics_file_path(dir);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .context("Failed to open diagnostics file")?;
    let file = Arc::new(Mutex::new(file));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(FileWriterMaker {
            file: Arc::clone(&file),
        })
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("Failed to install diagnostics subscriber")?;

    Ok(DiagnosticsGuard {
        path: Some(path),
        _file: Some(file),
    })
}

/// Delete diagnostics files older than `retention_days`
///
/// Returns the number of files deleted.
pub fn cleanup_old_diagnostics(dir: &Path, retention_days: u64) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let retention = Duration::from_secs(retention_days.saturating_mul(24 * 60 * 60));
    let cutoff = expiry_cutoff(SystemTime::now(), retention);
    purge_expired(dir, DIAGNOSTICS_FILE_PATTERN, cutoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use tempfile::TempDir;

    fn write_aged(dir: &Path, name: &str, age_days: u64) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"test log content").unwrap();
        let modified = SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60);
        set_file_mtime(&path, FileTime::from_system_time(modified)).unwrap();
        path
    }

    #[test]
    fn test_create_diagnostics_file_path() {
        let dir = PathBuf::from("/tmp/apphost/logs");
        let path = create_diagnostics_file_path(&dir);
        assert!(path.starts_with(&dir));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("apphost-"));
        assert!(name.ends_with(".log"));
    }

    #[test]
    fn test_cleanup_nonexistent_dir() {
        let path = Path::new("/nonexistent/path/for/testing");
        assert_eq!(cleanup_old_diagnostics(path, 7).unwrap(), 0);
    }

    #[test]
    fn test_cleanup_removes_only_old_diagnostics() {
        let temp_dir = TempDir::new().unwrap();
        let old = write_aged(temp_dir.path(), "apphost-2024-01-01_00-00-00.log", 30);
        let recent = write_aged(temp_dir.path(), "apphost-2024-02-01_00-00-00.log", 1);
        let foreign = write_aged(temp_dir.path(), "other-2024-01-01_00-00-00.log", 30);

        let count = cleanup_old_diagnostics(temp_dir.path(), 7).unwrap();

        assert_eq!(count, 1);
        assert!(!old.exists());
        assert!(recent.exists());
        assert!(foreign.exists());
    }

    #[test]
    fn test_file_writer_appends() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("apphost-test.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let maker = FileWriterMaker {
            file: Arc::new(Mutex::new(file)),
        };

        maker.make_writer().write_all(b"first\n").unwrap();
        maker.make_writer().write_all(b"second\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
