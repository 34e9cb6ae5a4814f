//! Error notification channel
//!
//! Background work (timer ticks, processor housekeeping, fan-out failures) never
//! returns its failures to a caller. Instead each component owns an `ErrorNotifier`
//! and raises errors through it; interested parties subscribe with a callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::LogError;

/// Callback invoked for every raised error
pub type ErrorHandler = Arc<dyn Fn(Arc<LogError>) + Send + Sync>;

/// Identifies one subscription so it can be removed later
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriptionId, ErrorHandler)>>,
}

/// A cloneable, thread-safe error channel
///
/// Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct ErrorNotifier {
    inner: Arc<Subscribers>,
}

impl std::fmt::Debug for ErrorNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorNotifier")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ErrorNotifier {
    /// Create a notifier with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Arc<LogError>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        handlers.push((id, Arc::new(handler)));
        id
    }

    /// Remove a callback, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        handlers.len() != before
    }

    /// Number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .map(|h| h.len())
            .unwrap_or_else(|e| e.into_inner().len())
    }

    /// Deliver an error to every subscriber
    ///
    /// Handlers are invoked outside the subscriber lock, so a handler may
    /// subscribe or unsubscribe without deadlocking. With no subscribers the
    /// error is written to the diagnostics log instead of being lost.
    pub fn raise(&self, error: LogError) {
        self.raise_shared(Arc::new(error));
    }

    /// Deliver an already shared error, e.g. one forwarded from another notifier
    pub fn raise_shared(&self, error: Arc<LogError>) {
        let handlers: Vec<ErrorHandler> = self
            .inner
            .handlers
            .read()
            .map(|h| h.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_else(|e| e.into_inner().iter().map(|(_, h)| Arc::clone(h)).collect());

        if handlers.is_empty() {
            tracing::error!(error = %error, "Unobserved error notification");
            return;
        }

        for handler in handlers {
            handler(Arc::clone(&error));
        }
    }
}
