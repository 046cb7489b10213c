//! Observer callbacks for unsolicited session and channel events.
//!
//! Transports report events through an [`EventSink`]. The sink never calls the
//! observer directly: every event is first moved onto the delivery queue, so
//! observers run one at a time and need no synchronization of their own.
//! The observer is looked up when the event is delivered, so the last
//! registration wins, and events with no observer registered are dropped.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use super::error::TransportError;
use super::queue::SerialQueue;

/// Listener for asynchronous events.
///
/// Every method has a no-op default; implement only the ones you need.
pub trait SessionObserver: Send + Sync {
    /// The transport reported that the session disconnected.
    fn session_did_disconnect(&self, _cause: &TransportError) {}

    /// The shell produced output.
    fn channel_did_read_data(&self, _message: &str) {}

    /// The shell produced stderr output.
    fn channel_did_read_error(&self, _error: &str) {}

    /// The shell ended.
    fn channel_shell_did_close(&self) {}

    /// Reserved for errors that belong to no particular operation.
    fn additional_error_received(&self, _cause: &TransportError) {}
}

/// Event raised by a transport without a caller-initiated operation.
#[derive(Debug)]
pub enum SessionEvent {
    Disconnected(TransportError),
    Data(String),
    ErrorData(String),
    ShellClosed,
    AdditionalError(TransportError),
}

impl SessionEvent {
    fn dispatch(self, observer: &dyn SessionObserver) {
        match self {
            SessionEvent::Disconnected(cause) => observer.session_did_disconnect(&cause),
            SessionEvent::Data(message) => observer.channel_did_read_data(&message),
            SessionEvent::ErrorData(error) => observer.channel_did_read_error(&error),
            SessionEvent::ShellClosed => observer.channel_shell_did_close(),
            SessionEvent::AdditionalError(cause) => observer.additional_error_received(&cause),
        }
    }
}

/// Shared, replaceable slot holding the registered observer.
#[derive(Clone, Default)]
pub(crate) struct ObserverSlot(Arc<RwLock<Option<Arc<dyn SessionObserver>>>>);

impl ObserverSlot {
    pub(crate) fn set(&self, observer: Option<Arc<dyn SessionObserver>>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    pub(crate) fn get(&self) -> Option<Arc<dyn SessionObserver>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Entry point through which transports report events.
///
/// Cheap to clone; hand one to every session and channel.
#[derive(Clone)]
pub struct EventSink {
    delivery: SerialQueue,
    observer: ObserverSlot,
}

impl EventSink {
    pub(crate) fn new(delivery: SerialQueue, observer: ObserverSlot) -> Self {
        Self { delivery, observer }
    }

    /// Redirect an event to the delivery queue and on to the observer.
    pub fn emit(&self, event: SessionEvent) {
        let observer = self.observer.clone();
        self.delivery.enqueue_fn(move || match observer.get() {
            Some(observer) => event.dispatch(observer.as_ref()),
            None => debug!("No observer registered, dropping {:?}", event),
        });
    }
}
