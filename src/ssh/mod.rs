//! SSH session manager for a single remote host.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: credential, lifecycle state and session snapshot
//! - `config`: configuration resolution with environment variable support
//! - `error`: error taxonomy and retry classification
//! - `observer`: asynchronous event callbacks and their delivery
//! - `queue`: serial task queues backing the worker and delivery contexts
//! - `transport`: trait seam between the manager and the SSH implementation
//! - `state`: holder of the credential and the installed session
//! - `manager`: command dispatcher and lifecycle controller
//! - `client`, `session`, `shell`: the russh transport

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod observer;
pub(crate) mod queue;
pub mod session;
pub(crate) mod shell;
pub(crate) mod state;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use client::RusshTransport;
pub use config::{ManagerConfig, PtyConfig};
pub use error::{SessionError, TransportError};
pub use manager::SessionManager;
pub use observer::{EventSink, SessionEvent, SessionObserver};
pub use transport::{Transport, TransportChannel, TransportSession};
pub use types::{Credential, LifecycleState, SessionInfo};
