//! Application hosting
//!
//! An [`ApplicationHost`] owns the process-wide [`ApplicationLogger`] and drives
//! one [`HostableProcess`] through its lifecycle: init, start, optional
//! pause/resume, stop. Every transition is logged through the application
//! logger.

mod heartbeat;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::AppConfig;
use crate::error::HostError;
use crate::logging::{ApplicationLogger, InMemoryCounters, PerformanceCounters};
use crate::notify::SubscriptionId;

pub use heartbeat::HeartbeatProcess;

/// Business logic run by the host
pub trait HostableProcess: Send {
    /// Name used in lifecycle messages
    fn name(&self) -> &str;

    /// One-time setup; the logger stays valid until the host shuts down
    fn init(&mut self, logger: Arc<ApplicationLogger>) -> Result<()>;

    fn start(&mut self, args: &[String]) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Whether [`pause`](HostableProcess::pause) and
    /// [`resume`](HostableProcess::resume) are supported
    fn can_pause_and_continue(&self) -> bool {
        false
    }

    fn pause(&mut self) -> Result<()> {
        bail!("{} does not support pause", self.name())
    }

    fn resume(&mut self) -> Result<()> {
        bail!("{} does not support resume", self.name())
    }
}

/// Lifecycle state of the hosted process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HostStatus {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HostStatus::Stopped => "stopped",
            HostStatus::Running => "running",
            HostStatus::Paused => "paused",
        };
        f.write_str(text)
    }
}

/// Runs one hostable process with a configured application logger
pub struct ApplicationHost {
    config: AppConfig,
    args: Vec<String>,
    counters: Arc<dyn PerformanceCounters>,
    logger: Option<Arc<ApplicationLogger>>,
    error_subscription: Option<SubscriptionId>,
    status: HostStatus,
}

impl fmt::Debug for ApplicationHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationHost")
            .field("service_name", &self.config.host.service_name)
            .field("initialized", &self.logger.is_some())
            .field("status", &self.status)
            .finish()
    }
}

impl ApplicationHost {
    /// Create a host; counters are kept in memory unless replaced
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            args: Vec::new(),
            counters: Arc::new(InMemoryCounters::new()),
            logger: None,
            error_subscription: None,
            status: HostStatus::Stopped,
        }
    }

    /// Arguments passed to the process on start
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Use a different performance-counter backend
    pub fn with_counters(mut self, counters: Arc<dyn PerformanceCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    /// The application logger; fails until [`initialize`](Self::initialize) ran
    pub fn logger(&self) -> Result<Arc<ApplicationLogger>, HostError> {
        self.logger.clone().ok_or(HostError::LoggerNotInitialized)
    }

    /// Create the logger and attach the configured processors
    ///
    /// Calling it again returns the existing logger.
    pub fn initialize(&mut self) -> Result<Arc<ApplicationLogger>, HostError> {
        if let Some(logger) = &self.logger {
            return Ok(Arc::clone(logger));
        }

        let logger = Arc::new(ApplicationLogger::new(
            self.config.logger.clone(),
            Arc::clone(&self.counters),
        ));
        if let Err(e) = logger.add_processors_from_config(&self.config.processors) {
            logger.dispose_processors();
            logger.dispose();
            return Err(e.into());
        }

        let subscription = logger.on_error(|error| {
            tracing::error!(error = %error, "Logger error");
        });

        tracing::info!(
            processors = self.config.processors.len(),
            "Application host initialized"
        );
        self.error_subscription = Some(subscription);
        self.logger = Some(Arc::clone(&logger));
        Ok(logger)
    }

    /// Log the loaded configuration through the application logger
    pub fn log_configuration(&self) -> Result<(), HostError> {
        self.logger()?.info(self.config.describe());
        Ok(())
    }

    /// Start a stopped process
    pub fn start(&mut self, process: &mut dyn HostableProcess) -> Result<(), HostError> {
        if self.status != HostStatus::Stopped {
            return Ok(());
        }
        let logger = self.logger()?;
        process
            .start(&self.args)
            .map_err(|error| process_error(process, "start", error))?;
        self.transition(&logger, process, HostStatus::Running, "started");
        Ok(())
    }

    /// Stop a running or paused process
    pub fn stop(&mut self, process: &mut dyn HostableProcess) -> Result<(), HostError> {
        if self.status == HostStatus::Stopped {
            return Ok(());
        }
        let logger = self.logger()?;
        process
            .stop()
            .map_err(|error| process_error(process, "stop", error))?;
        self.transition(&logger, process, HostStatus::Stopped, "stopped");
        Ok(())
    }

    /// Pause a running process that supports it
    pub fn pause(&mut self, process: &mut dyn HostableProcess) -> Result<(), HostError> {
        if self.status != HostStatus::Running {
            return Ok(());
        }
        let logger = self.logger()?;
        if !process.can_pause_and_continue() {
            return Err(process_error(
                process,
                "pause",
                anyhow::anyhow!("pause and continue are not supported"),
            ));
        }
        process
            .pause()
            .map_err(|error| process_error(process, "pause", error))?;
        self.transition(&logger, process, HostStatus::Paused, "paused");
        Ok(())
    }

    /// Resume a paused process
    pub fn resume(&mut self, process: &mut dyn HostableProcess) -> Result<(), HostError> {
        if self.status != HostStatus::Paused {
            return Ok(());
        }
        let logger = self.logger()?;
        process
            .resume()
            .map_err(|error| process_error(process, "resume", error))?;
        self.transition(&logger, process, HostStatus::Running, "resumed");
        Ok(())
    }

    fn transition(
        &mut self,
        logger: &ApplicationLogger,
        process: &dyn HostableProcess,
        status: HostStatus,
        verb: &str,
    ) {
        self.status = status;
        logger.info(format!("{} {}.", process.name(), verb));
        tracing::info!(process = %process.name(), %status, "Hostable process {}", verb);
    }

    /// Run `process` until `shutdown` completes
    ///
    /// Initializes the logger, starts the process when `autostart` is set, waits
    /// for the shutdown signal, stops the process and releases the logger. The
    /// logger is released on failure too.
    pub async fn run<F>(&mut self, process: &mut dyn HostableProcess, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()>,
    {
        let outcome = self.run_until(process, shutdown).await;
        if let Err(e) = &outcome {
            if let Ok(logger) = self.logger() {
                logger.error_with_error("Application host failed.", e);
            }
            tracing::error!(error = %e, "Application host failed");
        }
        self.finalize();
        outcome
    }

    async fn run_until<F>(&mut self, process: &mut dyn HostableProcess, shutdown: F) -> Result<(), HostError>
    where
        F: Future<Output = ()>,
    {
        let logger = self.initialize()?;
        self.log_configuration()?;

        process
            .init(Arc::clone(&logger))
            .map_err(|error| process_error(process, "init", error))?;

        if self.config.host.autostart {
            self.start(process)?;
        } else {
            logger.info(format!("{} is waiting; autostart is disabled.", process.name()));
        }

        shutdown.await;
        tracing::info!("Shutdown requested");

        self.stop(process)
    }

    /// Dispose processors and the logger; later `logger()` calls fail
    pub fn finalize(&mut self) {
        let Some(logger) = self.logger.take() else {
            return;
        };
        if let Some(subscription) = self.error_subscription.take() {
            logger.remove_error_handler(subscription);
        }
        logger.dispose_processors();
        logger.dispose();
        tracing::info!("Application host finalized");
    }
}

impl Drop for ApplicationHost {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn process_error(process: &dyn HostableProcess, stage: &'static str, error: anyhow::Error) -> HostError {
    HostError::Process {
        process: process.name().to_string(),
        stage,
        error,
    }
}
