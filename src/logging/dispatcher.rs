//! Fan-out of log entries to output processors
//!
//! A [`LogDispatcher`] owns an ordered list of processors. Every entry is handed
//! to each of them in insertion order; a failing processor never prevents the
//! others from receiving the entry. Failures of one `log()` call are reported
//! together as a single [`LogError::Aggregate`] notification.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::LogError;
use crate::notify::{ErrorNotifier, SubscriptionId};

use super::entry::{CustomLogItem, LogEntry, Severity};
use super::processor::OutputProcessor;

/// Point-in-time copy of the per-severity counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub error: u64,
    pub warning: u64,
    pub information: u64,
    pub success_audit: u64,
    pub failure_audit: u64,
}

impl CounterSnapshot {
    /// Count for one severity
    pub fn get(&self, severity: Severity) -> u64 {
        match severity {
            Severity::Error => self.error,
            Severity::Warning => self.warning,
            Severity::Information => self.information,
            Severity::SuccessAudit => self.success_audit,
            Severity::FailureAudit => self.failure_audit,
        }
    }

    pub fn total(&self) -> u64 {
        Severity::ALL.iter().map(|s| self.get(*s)).sum()
    }
}

/// Monotonic per-severity counters
#[derive(Debug, Default)]
struct SeverityCounters {
    counts: [AtomicU64; 5],
}

impl SeverityCounters {
    fn slot(severity: Severity) -> usize {
        match severity {
            Severity::Error => 0,
            Severity::Warning => 1,
            Severity::Information => 2,
            Severity::SuccessAudit => 3,
            Severity::FailureAudit => 4,
        }
    }

    fn increment(&self, severity: Severity) {
        self.counts[Self::slot(severity)].fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self, severity: Severity) -> u64 {
        self.counts[Self::slot(severity)].load(Ordering::Relaxed)
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            error: self.get(Severity::Error),
            warning: self.get(Severity::Warning),
            information: self.get(Severity::Information),
            success_audit: self.get(Severity::SuccessAudit),
            failure_audit: self.get(Severity::FailureAudit),
        }
    }
}

/// An attached processor and its error forwarding subscription
struct Attached {
    processor: Arc<dyn OutputProcessor>,
    subscription: SubscriptionId,
}

impl Attached {
    fn detach(&self) {
        self.processor.errors().unsubscribe(self.subscription);
    }
}

fn same_processor(a: &Arc<dyn OutputProcessor>, b: &Arc<dyn OutputProcessor>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Thread-safe fan-out logger
pub struct LogDispatcher {
    name: String,
    processors: Mutex<Vec<Attached>>,
    counters: SeverityCounters,
    errors: ErrorNotifier,
}

impl std::fmt::Debug for LogDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDispatcher")
            .field("name", &self.name)
            .field("processors", &self.processor_names())
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}

impl LogDispatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            processors: Mutex::new(Vec::new()),
            counters: SeverityCounters::default(),
            errors: ErrorNotifier::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Attached>> {
        self.processors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Channel for sink failures and forwarded processor faults
    pub fn errors(&self) -> &ErrorNotifier {
        &self.errors
    }

    /// Subscribe to the dispatcher's error channel
    pub fn on_error<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<LogError>) + Send + Sync + 'static,
    {
        self.errors.subscribe(handler)
    }

    /// Attach a processor at the end of the dispatch order
    pub fn add_processor(&self, processor: Arc<dyn OutputProcessor>) {
        let forward = self.errors.clone();
        let processor_name = processor.name().to_string();
        let subscription = processor.errors().subscribe(move |error| {
            forward.raise(LogError::Processor {
                processor: processor_name.clone(),
                error,
            });
        });

        tracing::debug!(dispatcher = %self.name, processor = %processor.name(), "Processor attached");
        self.lock().push(Attached {
            processor,
            subscription,
        });
    }

    /// Detach a processor, returning whether it was attached
    ///
    /// The processor is not disposed; it belongs to the caller again.
    pub fn remove_processor(&self, processor: &Arc<dyn OutputProcessor>) -> bool {
        self.detach_where(|attached| same_processor(&attached.processor, processor))
            .is_some()
    }

    /// Detach the first processor with `name`, handing it back to the caller
    pub fn remove_processor_by_name(&self, name: &str) -> Option<Arc<dyn OutputProcessor>> {
        self.detach_where(|attached| attached.processor.name() == name)
    }

    fn detach_where<P>(&self, predicate: P) -> Option<Arc<dyn OutputProcessor>>
    where
        P: Fn(&Attached) -> bool,
    {
        let mut processors = self.lock();
        let index = processors.iter().position(predicate)?;
        let attached = processors.remove(index);
        drop(processors);

        attached.detach();
        tracing::debug!(dispatcher = %self.name, processor = %attached.processor.name(), "Processor detached");
        Some(attached.processor)
    }

    /// Names of attached processors in dispatch order
    pub fn processor_names(&self) -> Vec<String> {
        self.lock()
            .iter()
            .map(|a| a.processor.name().to_string())
            .collect()
    }

    pub fn processor_count(&self) -> usize {
        self.lock().len()
    }

    /// Detach and dispose every processor
    pub fn dispose_all_processors(&self) {
        let mut processors = self.lock();
        for attached in processors.drain(..) {
            attached.detach();
            attached.processor.dispose();
        }
    }

    /// Count and dispatch one entry
    ///
    /// The severity counter is incremented before dispatch. Processor failures
    /// are collected and raised as one notification after every processor has
    /// been called; nothing is returned to the caller.
    pub fn log(&self, entry: &LogEntry) {
        self.counters.increment(entry.severity());

        let mut failures = Vec::new();
        {
            let processors = self.lock();
            for attached in processors.iter() {
                if let Err(error) = attached.processor.log(entry) {
                    failures.push(LogError::Sink {
                        processor: attached.processor.name().to_string(),
                        error,
                    });
                }
            }
        }

        if !failures.is_empty() {
            self.errors.raise(LogError::Aggregate(failures));
        }
    }

    /// Build and dispatch an entry
    pub fn log_with(
        &self,
        severity: Severity,
        description: impl Into<String>,
        custom: Option<Box<dyn CustomLogItem>>,
    ) {
        self.log(&LogEntry::with_custom(severity, description, custom));
    }

    pub fn error(&self, description: impl Into<String>) {
        self.log_with(Severity::Error, description, None);
    }

    pub fn warning(&self, description: impl Into<String>) {
        self.log_with(Severity::Warning, description, None);
    }

    pub fn info(&self, description: impl Into<String>) {
        self.log_with(Severity::Information, description, None);
    }

    pub fn success_audit(&self, description: impl Into<String>) {
        self.log_with(Severity::SuccessAudit, description, None);
    }

    pub fn failure_audit(&self, description: impl Into<String>) {
        self.log_with(Severity::FailureAudit, description, None);
    }

    pub fn error_count(&self) -> u64 {
        self.counters.get(Severity::Error)
    }

    pub fn warning_count(&self) -> u64 {
        self.counters.get(Severity::Warning)
    }

    pub fn information_count(&self) -> u64 {
        self.counters.get(Severity::Information)
    }

    pub fn success_audit_count(&self) -> u64 {
        self.counters.get(Severity::SuccessAudit)
    }

    pub fn failure_audit_count(&self) -> u64 {
        self.counters.get(Severity::FailureAudit)
    }

    /// Copy of all counters
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

impl Drop for LogDispatcher {
    fn drop(&mut self) {
        for attached in self.lock().iter() {
            attached.detach();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessorConfig;
    use crate::error::ConfigError;
    use crate::logging::processors::MemorySink;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    /// Processor that fails every log call
    struct FailingSink {
        name: String,
        calls: AtomicUsize,
        errors: ErrorNotifier,
    }

    impl FailingSink {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                calls: AtomicUsize::new(0),
                errors: ErrorNotifier::new(),
            }
        }
    }

    impl OutputProcessor for FailingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn prepare(&mut self, _config: &ProcessorConfig) -> Result<(), ConfigError> {
            Ok(())
        }

        fn log(&self, _entry: &LogEntry) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("{} is broken", self.name)
        }

        fn errors(&self) -> &ErrorNotifier {
            &self.errors
        }

        fn dispose(&self) {}
    }

    fn collect_errors(dispatcher: &LogDispatcher) -> Arc<Mutex<Vec<Arc<LogError>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.on_error(move |e| sink.lock().unwrap().push(e));
        seen
    }

    #[test]
    fn test_counters_track_each_severity() {
        let dispatcher = LogDispatcher::new("test");
        dispatcher.error("e");
        dispatcher.warning("w1");
        dispatcher.warning("w2");
        dispatcher.info("i");
        dispatcher.success_audit("s");
        dispatcher.failure_audit("f1");
        dispatcher.failure_audit("f2");
        dispatcher.failure_audit("f3");

        assert_eq!(dispatcher.error_count(), 1);
        assert_eq!(dispatcher.warning_count(), 2);
        assert_eq!(dispatcher.information_count(), 1);
        assert_eq!(dispatcher.success_audit_count(), 1);
        assert_eq!(dispatcher.failure_audit_count(), 3);
        assert_eq!(dispatcher.counters().total(), 8);
    }

    #[test]
    fn test_counters_ignore_sink_failures() {
        let dispatcher = LogDispatcher::new("test");
        dispatcher.add_processor(Arc::new(FailingSink::new("broken")));
        let _errors = collect_errors(&dispatcher);

        for _ in 0..5 {
            dispatcher.error("failing");
        }
        dispatcher.info("still counted");

        assert_eq!(dispatcher.error_count(), 5);
        assert_eq!(dispatcher.information_count(), 1);
    }

    #[test]
    fn test_healthy_sink_receives_every_entry_when_another_fails() {
        let dispatcher = LogDispatcher::new("test");
        let failing = Arc::new(FailingSink::new("a"));
        let memory = Arc::new(MemorySink::new().named("b"));
        dispatcher.add_processor(failing.clone());
        dispatcher.add_processor(memory.clone());
        let errors = collect_errors(&dispatcher);

        for i in 0..10 {
            dispatcher.info(format!("entry {}", i));
        }

        assert_eq!(memory.len(), 10);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 10);
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 10);
        assert!(matches!(errors[0].as_ref(), LogError::Aggregate(v) if v.len() == 1));
    }

    #[test]
    fn test_aggregate_preserves_processor_order() {
        let dispatcher = LogDispatcher::new("test");
        dispatcher.add_processor(Arc::new(FailingSink::new("first")));
        dispatcher.add_processor(Arc::new(MemorySink::new().named("ok")));
        dispatcher.add_processor(Arc::new(FailingSink::new("second")));
        let errors = collect_errors(&dispatcher);

        dispatcher.warning("one call");

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        match errors[0].as_ref() {
            LogError::Aggregate(failures) => {
                let names: Vec<_> = failures
                    .iter()
                    .map(|f| match f {
                        LogError::Sink { processor, .. } => processor.as_str(),
                        _ => "",
                    })
                    .collect();
                assert_eq!(names, ["first", "second"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(errors[0].failure_count(), 2);
    }

    #[test]
    fn test_no_notification_without_failures() {
        let dispatcher = LogDispatcher::new("test");
        dispatcher.add_processor(Arc::new(MemorySink::new().named("ok")));
        let errors = collect_errors(&dispatcher);
        dispatcher.info("fine");
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn test_processor_added_and_removed_mid_stream() {
        let dispatcher = LogDispatcher::new("test");
        let always = Arc::new(MemorySink::new().named("always"));
        dispatcher.add_processor(always.clone());

        dispatcher.info("before");
        let late: Arc<dyn OutputProcessor> = Arc::new(MemorySink::new().named("late"));
        let late_memory = Arc::new(MemorySink::new().named("late-memory"));
        dispatcher.add_processor(late.clone());
        dispatcher.add_processor(late_memory.clone());
        dispatcher.info("during 1");
        dispatcher.info("during 2");
        assert!(dispatcher.remove_processor(&late));
        assert!(dispatcher.remove_processor_by_name("late-memory").is_some());
        dispatcher.info("after");

        assert_eq!(late_memory.texts(), ["during 1", "during 2"]);
        assert_eq!(always.len(), 4);
        assert!(!dispatcher.remove_processor(&late));
        assert!(dispatcher.remove_processor_by_name("late-memory").is_none());
        assert_eq!(dispatcher.processor_names(), ["always"]);
    }

    #[test]
    fn test_dispatch_follows_insertion_order() {
        let dispatcher = LogDispatcher::new("test");
        for name in ["x", "y", "z"] {
            dispatcher.add_processor(Arc::new(MemorySink::new().named(name)));
        }
        assert_eq!(dispatcher.processor_names(), ["x", "y", "z"]);
        assert_eq!(dispatcher.processor_count(), 3);
    }

    #[test]
    fn test_processor_errors_are_forwarded_until_removed() {
        let dispatcher = LogDispatcher::new("test");
        let sink = Arc::new(FailingSink::new("noisy"));
        let as_processor: Arc<dyn OutputProcessor> = sink.clone();
        dispatcher.add_processor(as_processor.clone());
        let errors = collect_errors(&dispatcher);

        sink.errors.raise(LogError::Action {
            task: "size-monitor".to_string(),
            error: anyhow::anyhow!("stat failed"),
        });
        assert!(dispatcher.remove_processor(&as_processor));
        sink.errors.raise(LogError::Action {
            task: "size-monitor".to_string(),
            error: anyhow::anyhow!("ignored"),
        });

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            "output processor 'noisy' reported: recurring task 'size-monitor' failed: stat failed"
        );
        assert_eq!(sink.errors.subscriber_count(), 0);
    }

    #[test]
    fn test_dispose_all_processors() {
        let dispatcher = LogDispatcher::new("test");
        let memory = Arc::new(MemorySink::new().named("m"));
        dispatcher.add_processor(memory.clone());
        let errors = collect_errors(&dispatcher);

        dispatcher.dispose_all_processors();
        dispatcher.info("reaches nobody");

        assert_eq!(dispatcher.processor_count(), 0);
        assert!(memory.is_empty());
        assert!(memory.log(&LogEntry::new(Severity::Information, "x")).is_err());
        assert!(errors.lock().unwrap().is_empty());
        assert_eq!(dispatcher.information_count(), 1);
    }

    #[test]
    fn test_concurrent_logging_loses_no_counts() {
        let dispatcher = Arc::new(LogDispatcher::new("test"));
        let memory = Arc::new(MemorySink::with_capacity(10_000, 10).named("m"));
        dispatcher.add_processor(memory.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                thread::spawn(move || {
                    for _ in 0..250 {
                        dispatcher.warning("concurrent");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(dispatcher.warning_count(), 2000);
        assert_eq!(memory.len(), 2000);
    }

    #[test]
    fn test_log_with_custom_item() {
        #[derive(Debug)]
        struct Order(u32);

        impl std::fmt::Display for Order {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "order #{}", self.0)
            }
        }

        impl CustomLogItem for Order {
            fn clone_item(&self) -> Box<dyn CustomLogItem> {
                Box::new(Order(self.0))
            }
        }

        let dispatcher = LogDispatcher::new("test");
        let memory = Arc::new(MemorySink::new().named("m"));
        dispatcher.add_processor(memory.clone());
        dispatcher.log_with(Severity::SuccessAudit, "paid", Some(Box::new(Order(7))));

        let captured = memory.all_entries();
        assert_eq!(captured[0].entry.custom().unwrap().to_string(), "order #7");
        assert_eq!(dispatcher.success_audit_count(), 1);
    }
}
