//! Rotating log file output processor
//!
//! Appends rendered entries to one file. A size monitor renames the file to
//! `<stem>-<timestamp>.<ext>` once it grows past `max_log_size_kb` and reopens a
//! fresh file at the configured path; a purger deletes rotated files older than
//! `max_log_age_secs`. The active file is never purged.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};

use crate::config::{expand_path, ProcessorConfig};
use crate::error::ConfigError;
use crate::fs::{AgeBasedPurger, SizeTriggeredRotator};
use crate::logging::entry::LogEntry;
use crate::logging::processor::OutputProcessor;
use crate::notify::ErrorNotifier;

/// Default `#DateTime` format for file output
pub const DEFAULT_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%3f";

const DEFAULT_MAX_LOG_SIZE_KB: u64 = 10 * 1024;
const DEFAULT_MAX_LOG_AGE_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SIZE_CHECK_INTERVAL_MS: u64 = 10_000;
const DEFAULT_PURGE_INTERVAL_SECS: u64 = 60 * 60;

const ROTATION_TIMESTAMP: &str = "%Y-%m-%d-%H-%M-%S";
const LEGACY_ROTATION_TIMESTAMP: &str = "%Y-%m-%d-%M-%H-%S";

/// Name for a rotated copy of `path`, unique within its directory
pub fn rotated_file_name(path: &Path, timestamp: DateTime<Local>, legacy: bool) -> PathBuf {
    let format = if legacy {
        LEGACY_ROTATION_TIMESTAMP
    } else {
        ROTATION_TIMESTAMP
    };
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = format!("{}-{}", stem, timestamp.format(format));
    let extension = path.extension().map(|e| e.to_string_lossy().into_owned());

    let with_extension = |name: String| match &extension {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    };

    let mut candidate = path.with_file_name(with_extension(base.clone()));
    let mut counter = 1;
    while candidate.exists() {
        candidate = path.with_file_name(with_extension(format!("{}-{}", base, counter)));
        counter += 1;
    }
    candidate
}

/// The open log file, shared between the sink and its size monitor
#[derive(Debug)]
struct ActiveFile {
    path: PathBuf,
    legacy_names: bool,
    file: Mutex<Option<File>>,
}

impl ActiveFile {
    fn open(path: PathBuf, legacy_names: bool) -> std::io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self {
            path,
            legacy_names,
            file: Mutex::new(Some(file)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.file.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, text: &str) -> Result<()> {
        let mut guard = self.lock();
        let Some(file) = guard.as_mut() else {
            bail!("log file {} is closed", self.path.display());
        };
        file.write_all(text.as_bytes())
            .and_then(|_| file.flush())
            .with_context(|| format!("Failed to write to {}", self.path.display()))
    }

    /// Rename the current file aside and start a fresh one at the same path
    fn rotate(&self) -> Result<PathBuf> {
        let mut guard = self.lock();
        if guard.is_none() {
            bail!("log file {} is closed", self.path.display());
        }

        let rotated = rotated_file_name(&self.path, Local::now(), self.legacy_names);
        // Close before renaming; some platforms refuse to move an open file
        drop(guard.take());
        let renamed = fs::rename(&self.path, &rotated);

        let reopened = open_append(&self.path)
            .with_context(|| format!("Failed to reopen {}", self.path.display()))?;
        *guard = Some(reopened);

        renamed.with_context(|| {
            format!(
                "Failed to rename {} to {}",
                self.path.display(),
                rotated.display()
            )
        })?;
        Ok(rotated)
    }

    fn close(&self) {
        self.lock().take();
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// `<exe dir>/<exe stem>.log`
fn default_filename() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let stem = exe.file_stem()?.to_string_lossy().into_owned();
    Some(exe.with_file_name(format!("{}.log", stem)))
}

/// Output processor writing to a size-rotated, age-purged log file
#[derive(Debug, Default)]
pub struct RotatingFileSink {
    name: String,
    template: String,
    date_time_format: String,
    is_xml_template: bool,
    max_log_size: u64,
    max_log_age: Duration,
    file: Option<Arc<ActiveFile>>,
    rotator: Option<SizeTriggeredRotator>,
    purger: Option<AgeBasedPurger>,
    errors: ErrorNotifier,
}

impl RotatingFileSink {
    /// Type name used in configuration
    pub const TYPE_NAME: &'static str = "file";

    /// Create an unprepared sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the active log file, once prepared
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    pub fn max_log_size(&self) -> u64 {
        self.max_log_size
    }

    pub fn max_log_age(&self) -> Duration {
        self.max_log_age
    }

    pub fn is_xml_template(&self) -> bool {
        self.is_xml_template
    }

    /// Rotate immediately, returning the rotated file's path
    pub fn rotate(&self) -> Result<PathBuf> {
        match &self.file {
            Some(file) => file.rotate(),
            None => bail!("file processor '{}' is not prepared", self.name),
        }
    }
}

impl OutputProcessor for RotatingFileSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&mut self, config: &ProcessorConfig) -> Result<(), ConfigError> {
        self.name = config.name.clone();
        self.template = config.template()?.to_string();
        self.date_time_format = config.date_time_format_or(DEFAULT_DATE_TIME_FORMAT)?;
        self.is_xml_template = config.is_xml_template;

        let path = if config.attributes.contains_key("filename") {
            expand_path(&config.str_attr("filename")?)
        } else {
            default_filename()
                .ok_or_else(|| config.setup_error("cannot determine default log file name"))?
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| config.setup_error(format!("{} has no file name", path.display())))?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .ok_or_else(|| config.setup_error(format!("{} has no file extension", path.display())))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        self.max_log_size = config
            .u64_attr_or("max_log_size_kb", DEFAULT_MAX_LOG_SIZE_KB)?
            .saturating_mul(1024);
        self.max_log_age =
            Duration::from_secs(config.u64_attr_or("max_log_age_secs", DEFAULT_MAX_LOG_AGE_SECS)?);
        let size_check_interval = Duration::from_millis(
            config.u64_attr_or("size_check_interval_ms", DEFAULT_SIZE_CHECK_INTERVAL_MS)?,
        );
        let purge_interval =
            Duration::from_secs(config.u64_attr_or("purge_interval_secs", DEFAULT_PURGE_INTERVAL_SECS)?);
        let legacy_names = config.bool_attr_or("legacy_rotation_names", false)?;

        fs::create_dir_all(&dir).map_err(|e| {
            config.setup_error(format!("failed to create directory {}: {}", dir.display(), e))
        })?;
        let file = ActiveFile::open(path.clone(), legacy_names)
            .map_err(|e| config.setup_error(format!("failed to open {}: {}", path.display(), e)))?;
        let file = Arc::new(file);

        // Preparing twice replaces the previous file and housekeeping
        self.dispose();

        let rotating = Arc::clone(&file);
        let rotator = SizeTriggeredRotator::new(&path, self.max_log_size, size_check_interval, move |_| {
            let rotated = rotating.rotate()?;
            tracing::info!(rotated = %rotated.display(), "Rotated log file");
            Ok(())
        });
        // The active file matches the pattern too and must outlive any quiet period
        let purger = AgeBasedPurger::excluding(
            &dir,
            format!("*.{}", extension),
            self.max_log_age,
            purge_interval,
            file_name,
        );

        for source in [rotator.errors(), purger.errors()] {
            let forward = self.errors.clone();
            source.subscribe(move |e| forward.raise_shared(e));
        }

        rotator.start();
        purger.start();

        tracing::debug!(processor = %self.name, path = %path.display(), "File processor prepared");
        self.file = Some(file);
        self.rotator = Some(rotator);
        self.purger = Some(purger);
        Ok(())
    }

    fn log(&self, entry: &LogEntry) -> Result<()> {
        let Some(file) = &self.file else {
            bail!("file processor '{}' is not prepared", self.name);
        };
        let text = entry.render_text(&self.template, &self.date_time_format, self.is_xml_template);
        file.append(&text)
    }

    fn errors(&self) -> &ErrorNotifier {
        &self.errors
    }

    fn dispose(&self) {
        if let Some(rotator) = &self.rotator {
            rotator.dispose();
        }
        if let Some(purger) = &self.purger {
            purger.dispose();
        }
        if let Some(file) = &self.file {
            file.close();
        }
    }
}

impl Drop for RotatingFileSink {
    fn drop(&mut self) {
        self.dispose();
    }
}
