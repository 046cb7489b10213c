//! Trait seam between the session manager and the SSH implementation.
//!
//! The manager never speaks the SSH protocol itself. It sequences calls into
//! a [`Transport`] (a session factory), the [`TransportSession`] it opens, and
//! the session's [`TransportChannel`]. The production implementation lives in
//! [`client`](super::client) and is backed by `russh`.
//!
//! Connectivity reads (`is_connected`, `is_authorized`, `is_shell_active`) are
//! synchronous and must be cheap: they are called from any context and must
//! reflect live transport state.

use std::sync::Arc;

use async_trait::async_trait;

use super::config::PtyConfig;
use super::error::TransportError;
use super::observer::EventSink;
use super::types::Credential;

/// Factory for transport sessions.
pub trait Transport: Send + Sync {
    /// Create an unconnected session for `credential`.
    ///
    /// `events` receives the session's disconnect notifications. Must not
    /// perform network I/O.
    fn open_session(&self, credential: &Credential, events: EventSink) -> Arc<dyn TransportSession>;
}

/// One connection to a remote host.
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn is_connected(&self) -> bool;

    fn is_authorized(&self) -> bool;

    /// Establish the connection. Success here does not imply the session
    /// reports connected; callers check [`is_connected`](Self::is_connected).
    async fn connect(&self) -> Result<(), TransportError>;

    /// Authenticate with a password. `Ok(false)` means the server rejected it.
    async fn authenticate(&self, password: &str) -> Result<bool, TransportError>;

    /// Tear down the connection. Never fails; problems are logged.
    async fn disconnect(&self);

    /// The execution context derived from this session.
    fn channel(&self) -> Arc<dyn TransportChannel>;
}

/// Command and shell execution context of a session.
#[async_trait]
pub trait TransportChannel: Send + Sync {
    fn is_shell_active(&self) -> bool;

    /// Set PTY parameters and the sink for data, stderr and shell-closed
    /// events used by the next [`start_shell`](Self::start_shell).
    fn configure_shell(&self, pty: PtyConfig, events: EventSink);

    async fn start_shell(&self) -> Result<(), TransportError>;

    async fn close_shell(&self);

    /// Write raw text into the running shell.
    async fn write(&self, text: &str) -> Result<(), TransportError>;

    /// Run `command` in its own exec context and return the captured output.
    async fn execute(&self, command: &str) -> Result<String, TransportError>;
}
