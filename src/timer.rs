//! Non-reentrant recurring task
//!
//! Runs an action on a fixed interval from a dedicated ticker thread. A tick that
//! elapses while the previous execution is still running is dropped, never queued,
//! so executions can't overlap or pile up. Action failures (errors and panics) are
//! reported through the task's [`ErrorNotifier`] and the task keeps running.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::LogError;
use crate::notify::ErrorNotifier;

/// Default time `stop()` waits for an in-flight action
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_millis(1000);

/// Smallest interval a task will tick at
const MIN_INTERVAL: Duration = Duration::from_millis(1);

type PlainAction = Box<dyn FnMut() -> Result<()> + Send>;
type CancelableAction = Box<dyn FnMut(&CancellationToken) -> Result<()> + Send>;

/// The work executed on every tick
enum TaskAction {
    Plain(PlainAction),
    Cancelable(CancelableAction),
}

impl TaskAction {
    fn run(&mut self, token: &CancellationToken) -> Result<()> {
        match self {
            TaskAction::Plain(action) => action(),
            TaskAction::Cancelable(action) => action(token),
        }
    }
}

#[derive(Debug, Default)]
struct TaskState {
    enabled: bool,
    executing: bool,
    disposed: bool,
    /// Bumped on every start so a ticker from an older start knows to exit
    generation: u64,
    cancel: Option<CancellationToken>,
}

struct Shared {
    name: String,
    interval: Duration,
    state: Mutex<TaskState>,
    /// Wakes the ticker when the task is stopped
    wake: Condvar,
    /// Signalled whenever an execution completes
    idle: Condvar,
    action: Mutex<TaskAction>,
    errors: ErrorNotifier,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A timer that runs an action periodically without reentrancy
pub struct RecurringTask {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecurringTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock_state();
        f.debug_struct("RecurringTask")
            .field("name", &self.shared.name)
            .field("interval", &self.shared.interval)
            .field("enabled", &state.enabled)
            .field("executing", &state.executing)
            .finish()
    }
}

impl RecurringTask {
    /// Create a disabled task running `action` every `interval`
    pub fn new<F>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Self::with_action(name.into(), interval, TaskAction::Plain(Box::new(action)))
    }

    /// Create a disabled task whose action observes a cancellation token
    ///
    /// The token is cancelled when the task is stopped; the action should poll
    /// [`CancellationToken::is_cancelled`] and return early.
    pub fn new_cancelable<F>(name: impl Into<String>, interval: Duration, action: F) -> Self
    where
        F: FnMut(&CancellationToken) -> Result<()> + Send + 'static,
    {
        Self::with_action(
            name.into(),
            interval,
            TaskAction::Cancelable(Box::new(action)),
        )
    }

    fn with_action(name: String, interval: Duration, action: TaskAction) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                interval: interval.max(MIN_INTERVAL),
                state: Mutex::new(TaskState::default()),
                wake: Condvar::new(),
                idle: Condvar::new(),
                action: Mutex::new(action),
                errors: ErrorNotifier::new(),
            }),
        }
    }

    /// Task name used in diagnostics and error notifications
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Tick interval
    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Error channel for action failures
    pub fn errors(&self) -> &ErrorNotifier {
        &self.shared.errors
    }

    /// Whether ticks are currently enabled
    pub fn is_enabled(&self) -> bool {
        self.shared.lock_state().enabled
    }

    /// Whether an action is running right now
    pub fn is_executing(&self) -> bool {
        self.shared.lock_state().executing
    }

    /// Start ticking. No-op if already started or disposed.
    pub fn start(&self) {
        let mut state = self.shared.lock_state();
        if state.disposed {
            warn!(task = %self.shared.name, "Ignoring start of disposed recurring task");
            return;
        }
        if state.enabled {
            return;
        }

        state.cancel = Some(CancellationToken::new());
        state.enabled = true;
        state.generation += 1;
        let generation = state.generation;

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("task-{}", self.shared.name))
            .spawn(move || run_ticker(shared, generation));

        if let Err(e) = spawned {
            state.enabled = false;
            state.cancel = None;
            drop(state);
            self.shared.errors.raise(LogError::Action {
                task: self.shared.name.clone(),
                error: anyhow!(e).context("failed to spawn ticker thread"),
            });
            return;
        }

        debug!(task = %self.shared.name, interval = ?self.shared.interval, "Recurring task started");
    }

    /// Stop ticking, waiting up to [`DEFAULT_STOP_TIMEOUT`] for a running action
    pub fn stop(&self) -> bool {
        self.stop_with_timeout(DEFAULT_STOP_TIMEOUT)
    }

    /// Stop ticking and cancel a running action
    ///
    /// Blocks until the in-flight execution (if any) finishes or `timeout`
    /// elapses. Returns `true` if nothing is executing when it returns. Stopping a
    /// stopped task returns `true` immediately.
    pub fn stop_with_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.lock_state();
        if !state.enabled {
            return true;
        }

        state.enabled = false;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        self.shared.wake.notify_all();

        let (state, result) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| s.executing)
            .unwrap_or_else(|e| e.into_inner());
        drop(state);

        if result.timed_out() {
            warn!(task = %self.shared.name, ?timeout, "Recurring task action did not finish before stop timeout");
            false
        } else {
            debug!(task = %self.shared.name, "Recurring task stopped");
            true
        }
    }

    /// Stop the task and refuse later starts. Safe to call more than once.
    pub fn dispose(&self) {
        self.stop();
        self.shared.lock_state().disposed = true;
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Ticker loop for one start generation
fn run_ticker(shared: Arc<Shared>, generation: u64) {
    let mut next_tick = Instant::now() + shared.interval;

    loop {
        let token = {
            let mut state = shared.lock_state();

            // Sleep until the tick is due, bailing out if stopped or restarted
            loop {
                if !state.enabled || state.generation != generation {
                    return;
                }
                let now = Instant::now();
                if now >= next_tick {
                    break;
                }
                state = shared
                    .wake
                    .wait_timeout(state, next_tick - now)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
            }

            let now = Instant::now();
            next_tick += shared.interval;
            if next_tick <= now {
                next_tick = now + shared.interval;
            }

            if state.executing {
                trace!(task = %shared.name, "Dropping tick, previous execution still running");
                continue;
            }

            state.executing = true;
            state.cancel.clone().unwrap_or_else(CancellationToken::new)
        };

        execute(&shared, &token);

        let mut state = shared.lock_state();
        state.executing = false;
        shared.idle.notify_all();
    }
}

/// Run the action once, routing errors and panics to the error channel
fn execute(shared: &Shared, token: &CancellationToken) {
    let mut action = shared.action.lock().unwrap_or_else(|e| e.into_inner());
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| action.run(token)));
    drop(action);

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(payload) => anyhow!("action panicked: {}", panic_message(payload.as_ref())),
    };

    shared.errors.raise(LogError::Action {
        task: shared.name.clone(),
        error,
    });
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread::sleep;

    fn counting_task(interval_ms: u64) -> (RecurringTask, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = RecurringTask::new("count", Duration::from_millis(interval_ms), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (task, count)
    }

    #[test]
    fn test_new_task_is_disabled() {
        let (task, count) = counting_task(10);
        assert!(!task.is_enabled());
        sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_runs_action() {
        let (task, count) = counting_task(50);
        task.start();
        sleep(Duration::from_millis(250));
        assert!(count.load(Ordering::SeqCst) > 0);
        assert!(task.stop());
    }

    #[test]
    fn test_stop_halts_future_ticks() {
        let (task, count) = counting_task(50);
        task.start();
        sleep(Duration::from_millis(250));
        assert!(task.stop());
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        sleep(Duration::from_millis(250));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_stop_before_first_tick() {
        let (task, count) = counting_task(2000);
        task.start();
        sleep(Duration::from_millis(100));
        assert!(task.stop());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_and_stop_are_idempotent() {
        let (task, _count) = counting_task(1000);
        assert!(task.stop());
        task.start();
        task.start();
        assert!(task.is_enabled());
        assert!(task.stop());
        assert!(task.stop());
        assert!(!task.is_enabled());
    }

    #[test]
    fn test_overlapping_ticks_are_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = RecurringTask::new("slow", Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(1000));
            Ok(())
        });

        task.start();
        // First tick at ~100ms, action runs until ~1100ms
        sleep(Duration::from_millis(450));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(task.is_executing());
        task.stop_with_timeout(Duration::from_millis(2000));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_returns_false_when_action_outlives_timeout() {
        let task = RecurringTask::new("sleepy", Duration::from_millis(100), || {
            sleep(Duration::from_millis(2000));
            Ok(())
        });
        task.start();
        sleep(Duration::from_millis(500));
        assert!(!task.stop_with_timeout(Duration::from_millis(500)));
    }

    #[test]
    fn test_stop_returns_true_when_action_finishes_in_time() {
        let task = RecurringTask::new("brief", Duration::from_millis(100), || {
            sleep(Duration::from_millis(300));
            Ok(())
        });
        task.start();
        sleep(Duration::from_millis(200));
        assert!(task.stop_with_timeout(Duration::from_millis(1000)));
        assert!(!task.is_executing());
    }

    #[test]
    fn test_stop_cancels_cancelable_action() {
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        let task = RecurringTask::new_cancelable("cancel", Duration::from_millis(50), move |token| {
            let deadline = Instant::now() + Duration::from_secs(5);
            while Instant::now() < deadline {
                if token.is_cancelled() {
                    flag.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                sleep(Duration::from_millis(10));
            }
            Ok(())
        });

        task.start();
        sleep(Duration::from_millis(200));
        assert!(task.stop_with_timeout(Duration::from_millis(1000)));
        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_restart_uses_fresh_token() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&observed);
        let task = RecurringTask::new_cancelable("restart", Duration::from_millis(30), move |token| {
            record.lock().unwrap().push(token.is_cancelled());
            Ok(())
        });

        task.start();
        sleep(Duration::from_millis(100));
        assert!(task.stop());
        let first_phase = observed.lock().unwrap().len();

        task.start();
        sleep(Duration::from_millis(100));
        assert!(task.stop());

        let observed = observed.lock().unwrap();
        assert!(observed.len() > first_phase);
        assert!(!observed[first_phase]);
    }

    #[test]
    fn test_action_errors_are_reported_and_task_keeps_running() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let task = RecurringTask::new("failing", Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("tick failed")
        });

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        task.errors()
            .subscribe(move |e| sink.lock().unwrap().push(e.to_string()));

        task.start();
        sleep(Duration::from_millis(200));
        assert!(task.stop());

        let errors = errors.lock().unwrap();
        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(errors.len(), count.load(Ordering::SeqCst));
        assert_eq!(errors[0], "recurring task 'failing' failed: tick failed");
    }

    #[test]
    fn test_action_panic_is_reported() {
        let task = RecurringTask::new("panicky", Duration::from_millis(30), || {
            panic!("kaboom");
        });
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        task.errors()
            .subscribe(move |e| sink.lock().unwrap().push(e.to_string()));

        task.start();
        sleep(Duration::from_millis(150));
        assert!(task.stop());

        let errors = errors.lock().unwrap();
        assert!(!errors.is_empty());
        assert!(errors[0].contains("action panicked: kaboom"));
        assert!(!task.is_executing());
    }

    #[test]
    fn test_interval_between_executions() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&stamps);
        let task = RecurringTask::new("interval", Duration::from_millis(250), move || {
            record.lock().unwrap().push(Instant::now());
            Ok(())
        });

        task.start();
        sleep(Duration::from_millis(600));
        assert!(task.stop());

        let stamps = stamps.lock().unwrap();
        assert!(stamps.len() >= 2);
        let elapsed = stamps[1] - stamps[0];
        assert!(
            elapsed >= Duration::from_millis(200) && elapsed <= Duration::from_millis(350),
            "elapsed: {:?}",
            elapsed
        );
    }

    #[test]
    fn test_dispose_prevents_restart() {
        let (task, count) = counting_task(20);
        task.dispose();
        task.dispose();
        task.start();
        assert!(!task.is_enabled());
        sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
