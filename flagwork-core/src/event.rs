//! Provider lifecycle events
//!
//! An [`EventEmitter`] keeps an ordered handler list per [`ProviderEventType`].
//! Providers embed one to announce status changes; the [`FlagApi`] keeps one
//! for the process-wide scope and one per client domain.
//!
//! Handlers for one event run sequentially in registration order. Each runs
//! inside a failure boundary: a returned error or a panic is logged and the
//! remaining handlers still run.
//!
//! [`FlagApi`]: crate::FlagApi

use crate::error::{ErrorCode, EventHandlerError};
use crate::details::FlagMetadata;
use crate::status::ProviderStatus;
use dashmap::DashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{debug, error};

/// Events a provider may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventType {
    Ready,
    Error,
    Stale,
    /// Flag configuration changed; does not change status
    ConfigurationChanged,
    /// Provider reconciled with a new static context
    ContextChanged,
}

impl ProviderEventType {
    pub const ALL: [ProviderEventType; 5] = [
        ProviderEventType::Ready,
        ProviderEventType::Error,
        ProviderEventType::Stale,
        ProviderEventType::ConfigurationChanged,
        ProviderEventType::ContextChanged,
    ];

    /// Event that announces the given status, used to replay state to late listeners
    pub fn for_status(status: ProviderStatus) -> Option<Self> {
        match status {
            ProviderStatus::Ready => Some(ProviderEventType::Ready),
            ProviderStatus::Error | ProviderStatus::Fatal => Some(ProviderEventType::Error),
            ProviderStatus::Stale => Some(ProviderEventType::Stale),
            ProviderStatus::NotReady => None,
        }
    }
}

impl fmt::Display for ProviderEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderEventType::Ready => "PROVIDER_READY",
            ProviderEventType::Error => "PROVIDER_ERROR",
            ProviderEventType::Stale => "PROVIDER_STALE",
            ProviderEventType::ConfigurationChanged => "PROVIDER_CONFIGURATION_CHANGED",
            ProviderEventType::ContextChanged => "PROVIDER_CONTEXT_CHANGED",
        };
        f.write_str(name)
    }
}

/// Event payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDetails {
    /// Name of the provider the event originates from
    pub provider_name: String,

    /// Client domain, set for client-scoped listeners
    pub domain: Option<String>,

    pub message: Option<String>,

    pub error_code: Option<ErrorCode>,

    /// Keys of flags whose configuration changed
    pub flags_changed: Vec<String>,

    pub metadata: FlagMetadata,
}

impl EventDetails {
    pub fn new(provider_name: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn with_flags_changed(mut self, flags: Vec<String>) -> Self {
        self.flags_changed = flags;
        self
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }
}

/// Event handler trait
pub trait EventHandler: Send + Sync {
    /// Handle the event
    fn handle(&self, details: &EventDetails) -> Result<(), EventHandlerError>;
}

impl<F> EventHandler for F
where
    F: Fn(&EventDetails) -> Result<(), EventHandlerError> + Send + Sync,
{
    fn handle(&self, details: &EventDetails) -> Result<(), EventHandlerError> {
        self(details)
    }
}

/// Shared handler reference; removal matches by identity
pub type SharedEventHandler = Arc<dyn EventHandler>;

/// Wrap a closure as a shared handler
pub fn handler<F>(f: F) -> SharedEventHandler
where
    F: Fn(&EventDetails) -> Result<(), EventHandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered handler lists keyed by event type
#[derive(Default)]
pub struct EventEmitter {
    handlers: DashMap<ProviderEventType, Vec<SharedEventHandler>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for an event type
    pub fn add_handler(&self, event: ProviderEventType, handler: SharedEventHandler) {
        self.handlers.entry(event).or_default().push(handler);
        debug!(event = %event, "Subscribed event handler");
    }

    /// Remove a previously added handler; returns whether it was found
    pub fn remove_handler(&self, event: ProviderEventType, handler: &SharedEventHandler) -> bool {
        let Some(mut handlers) = self.handlers.get_mut(&event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !same_handler(h, handler));
        before != handlers.len()
    }

    /// Handlers currently registered for an event type, in registration order
    pub fn handlers(&self, event: ProviderEventType) -> Vec<SharedEventHandler> {
        self.handlers
            .get(&event)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, event: ProviderEventType) -> usize {
        self.handlers.get(&event).map(|h| h.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Invoke every handler for the event, in order.
    ///
    /// Handlers run on a snapshot of the list, so a handler may add or remove
    /// handlers without affecting the current emission.
    pub fn emit(&self, event: ProviderEventType, details: &EventDetails) {
        let handlers = self.handlers(event);
        debug!(
            event = %event,
            provider = %details.provider_name,
            handlers = handlers.len(),
            "Emitting provider event"
        );
        for handler in handlers {
            run_handler(event, &handler, details);
        }
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<_> = self
            .handlers
            .iter()
            .map(|entry| (*entry.key(), entry.value().len()))
            .collect();
        f.debug_struct("EventEmitter").field("handlers", &counts).finish()
    }
}

/// Run one handler inside a failure boundary
pub(crate) fn run_handler(
    event: ProviderEventType,
    handler: &SharedEventHandler,
    details: &EventDetails,
) {
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle(details)))
        .unwrap_or_else(|panic| Err(EventHandlerError::Panicked(panic_message(&panic))));
    if let Err(e) = outcome {
        error!(event = %event, provider = %details.provider_name, "Handler failed: {}", e);
    }
}

pub(crate) fn same_handler(a: &SharedEventHandler, b: &SharedEventHandler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub(crate) fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &str) -> SharedEventHandler {
        let log = log.clone();
        let label = label.to_string();
        handler(move |details: &EventDetails| {
            log.lock().push(format!("{}:{}", label, details.provider_name));
            Ok(())
        })
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.add_handler(ProviderEventType::Ready, recorder(&log, "first"));
        emitter.add_handler(ProviderEventType::Ready, recorder(&log, "second"));

        emitter.emit(ProviderEventType::Ready, &EventDetails::new("p"));

        assert_eq!(*log.lock(), vec!["first:p", "second:p"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.add_handler(
            ProviderEventType::Error,
            handler(|_: &EventDetails| Err(EventHandlerError::HandlerFailed("nope".into()))),
        );
        emitter.add_handler(
            ProviderEventType::Error,
            handler(|_: &EventDetails| panic!("handler exploded")),
        );
        emitter.add_handler(ProviderEventType::Error, recorder(&log, "after"));

        emitter.emit(ProviderEventType::Error, &EventDetails::new("p"));

        assert_eq!(*log.lock(), vec!["after:p"]);
    }

    #[test]
    fn test_remove_handler_by_identity() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let h = recorder(&log, "h");
        emitter.add_handler(ProviderEventType::Stale, h.clone());
        emitter.add_handler(ProviderEventType::Stale, recorder(&log, "other"));

        assert!(emitter.remove_handler(ProviderEventType::Stale, &h));
        assert!(!emitter.remove_handler(ProviderEventType::Stale, &h));
        assert_eq!(emitter.handler_count(ProviderEventType::Stale), 1);
    }

    #[test]
    fn test_events_are_routed_by_type() {
        let emitter = EventEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.add_handler(ProviderEventType::Ready, recorder(&log, "ready"));

        emitter.emit(ProviderEventType::ConfigurationChanged, &EventDetails::new("p"));

        assert!(log.lock().is_empty());
        assert_eq!(emitter.handlers(ProviderEventType::Error).len(), 0);
    }

    #[test]
    fn test_replay_event_for_status() {
        assert_eq!(
            ProviderEventType::for_status(ProviderStatus::Fatal),
            Some(ProviderEventType::Error)
        );
        assert_eq!(ProviderEventType::for_status(ProviderStatus::NotReady), None);
    }
}
