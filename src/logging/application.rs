//! Application-wide logger
//!
//! [`ApplicationLogger`] wraps one [`LogDispatcher`] and, when enabled, a
//! recurring task that publishes the error and warning totals as performance
//! counters. The host constructs it once and hands out `Arc` handles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;

use crate::config::{LoggerSettings, ProcessorConfig};
use crate::error::{ConfigError, LogError};
use crate::notify::SubscriptionId;
use crate::timer::RecurringTask;

use super::counters::{CounterUpdater, PerformanceCounters};
use super::dispatcher::{CounterSnapshot, LogDispatcher};
use super::entry::{CustomLogItem, LogEntry, Severity};
use super::processor::{create_processor, OutputProcessor};

/// How often counters are published
pub const COUNTER_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

const COUNTER_TASK_NAME: &str = "counter-updater";

/// Process-wide logging facade
pub struct ApplicationLogger {
    dispatcher: Arc<LogDispatcher>,
    settings: LoggerSettings,
    counter_task: Option<RecurringTask>,
    disposed: AtomicBool,
}

impl fmt::Debug for ApplicationLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationLogger")
            .field("dispatcher", &self.dispatcher)
            .field("update_counters", &self.settings.update_counters)
            .finish()
    }
}

impl ApplicationLogger {
    /// Create the logger; counters are published every second when enabled
    pub fn new(settings: LoggerSettings, counters: Arc<dyn PerformanceCounters>) -> Self {
        Self::with_update_interval(settings, counters, COUNTER_UPDATE_INTERVAL)
    }

    /// Create the logger with a custom counter publishing interval
    pub fn with_update_interval(
        settings: LoggerSettings,
        counters: Arc<dyn PerformanceCounters>,
        interval: Duration,
    ) -> Self {
        let dispatcher = Arc::new(LogDispatcher::new("Application Logger"));

        let counter_task = settings.update_counters.then(|| {
            let task = counter_task(&settings, counters, Arc::clone(&dispatcher), interval);
            let report_to = Arc::clone(&dispatcher);
            task.errors().subscribe(move |error| {
                report_to.error(with_error("Error in counter updater.", &error));
            });
            task.start();
            task
        });

        Self {
            dispatcher,
            settings,
            counter_task,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &LoggerSettings {
        &self.settings
    }

    /// The underlying dispatcher
    pub fn dispatcher(&self) -> &Arc<LogDispatcher> {
        &self.dispatcher
    }

    pub fn add_processor(&self, processor: Arc<dyn OutputProcessor>) {
        self.dispatcher.add_processor(processor);
    }

    pub fn remove_processor(&self, processor: &Arc<dyn OutputProcessor>) -> bool {
        self.dispatcher.remove_processor(processor)
    }

    /// Build, prepare and attach every configured processor
    ///
    /// Stops at the first configuration error; processors attached before it
    /// stay attached.
    pub fn add_processors_from_config(&self, configs: &[ProcessorConfig]) -> Result<(), ConfigError> {
        for config in configs {
            if self.dispatcher.processor_names().contains(&config.name) {
                return Err(ConfigError::DuplicateName(config.name.clone()));
            }
            let processor: Arc<dyn OutputProcessor> = Arc::from(create_processor(config)?);
            self.dispatcher.add_processor(processor);
            tracing::info!(processor = %config.name, kind = %config.kind, "Output processor added");
        }
        Ok(())
    }

    pub fn dispose_processors(&self) {
        self.dispatcher.dispose_all_processors();
    }

    pub fn log(&self, entry: &LogEntry) {
        self.dispatcher.log(entry);
    }

    pub fn log_with(
        &self,
        severity: Severity,
        description: impl Into<String>,
        custom: Option<Box<dyn CustomLogItem>>,
    ) {
        self.dispatcher.log_with(severity, description, custom);
    }

    pub fn info(&self, description: impl Into<String>) {
        self.dispatcher.info(description);
    }

    pub fn warning(&self, description: impl Into<String>) {
        self.dispatcher.warning(description);
    }

    pub fn error(&self, description: impl Into<String>) {
        self.dispatcher.error(description);
    }

    pub fn success_audit(&self, description: impl Into<String>) {
        self.dispatcher.success_audit(description);
    }

    pub fn failure_audit(&self, description: impl Into<String>) {
        self.dispatcher.failure_audit(description);
    }

    /// Log a warning followed by the error chain
    pub fn warning_with_error(&self, description: impl fmt::Display, error: impl fmt::Display) {
        self.dispatcher.warning(with_error(description, error));
    }

    /// Log an error followed by the error chain
    pub fn error_with_error(&self, description: impl fmt::Display, error: impl fmt::Display) {
        self.dispatcher.error(with_error(description, error));
    }

    /// Dispatch an entry on a Tokio blocking worker
    ///
    /// The entry (timestamp and thread) is created on the calling thread. Fails
    /// when called outside a Tokio runtime.
    pub fn schedule_log(
        &self,
        severity: Severity,
        description: impl Into<String>,
        custom: Option<Box<dyn CustomLogItem>>,
    ) -> Result<JoinHandle<()>, TryCurrentError> {
        let runtime = Handle::try_current()?;
        let entry = LogEntry::with_custom(severity, description, custom);
        let dispatcher = Arc::clone(&self.dispatcher);
        Ok(runtime.spawn_blocking(move || dispatcher.log(&entry)))
    }

    /// Subscribe to logging failures
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<LogError>) + Send + Sync + 'static,
    {
        self.dispatcher.on_error(handler)
    }

    pub fn remove_error_handler(&self, id: SubscriptionId) -> bool {
        self.dispatcher.errors().unsubscribe(id)
    }

    pub fn error_count(&self) -> u64 {
        self.dispatcher.error_count()
    }

    pub fn warning_count(&self) -> u64 {
        self.dispatcher.warning_count()
    }

    pub fn information_count(&self) -> u64 {
        self.dispatcher.information_count()
    }

    pub fn success_audit_count(&self) -> u64 {
        self.dispatcher.success_audit_count()
    }

    pub fn failure_audit_count(&self) -> u64 {
        self.dispatcher.failure_audit_count()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.dispatcher.counters()
    }

    /// Stop publishing counters. Processors are left attached.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = &self.counter_task {
            task.dispose();
        }
        tracing::debug!("Application logger disposed");
    }
}

impl Drop for ApplicationLogger {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn with_error(description: impl fmt::Display, error: impl fmt::Display) -> String {
    format!("{}\nException:\n{:#}", description, error)
}

fn counter_task(
    settings: &LoggerSettings,
    counters: Arc<dyn PerformanceCounters>,
    dispatcher: Arc<LogDispatcher>,
    interval: Duration,
) -> RecurringTask {
    let mut updater = CounterUpdater::new(
        settings.counter_category.clone(),
        settings.instance_name.clone(),
        settings.counters,
        counters,
    );
    let mut initialized = false;

    RecurringTask::new(COUNTER_TASK_NAME, interval, move || {
        if !initialized {
            updater.initialize()?;
            initialized = true;
        }
        updater.update(dispatcher.error_count(), dispatcher.warning_count())
    })
}
