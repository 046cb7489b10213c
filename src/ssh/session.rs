//! russh client handler and per-connection link state.
//!
//! # Architecture
//!
//! - [`Link`]: shared state of one connection: the russh handle plus the
//!   connected/authorized flags read by the synchronous connectivity queries.
//! - [`SshClientHandler`]: russh callback handler. Accepts every host key
//!   (like `StrictHostKeyChecking=no` in OpenSSH) and reports unexpected
//!   disconnects through the session's [`EventSink`].
//!
//! # Thread Safety
//!
//! `client::Handle` is not `Clone` and authentication needs `&mut`, so the
//! handle lives behind a Tokio mutex. Only the worker queue takes that lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use russh::{client, keys};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::error::TransportError;
use super::observer::{EventSink, SessionEvent};

/// Shared state of one SSH connection.
#[derive(Default)]
pub(crate) struct Link {
    connected: AtomicBool,
    authorized: AtomicBool,
    pub(crate) handle: Mutex<Option<client::Handle<SshClientHandler>>>,
}

impl Link {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn is_authorized(&self) -> bool {
        self.is_connected() && self.authorized.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_connected(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    /// Mark the link up for a freshly negotiated connection whose handler
    /// raises `dropped` on disconnect. Returns false, leaving the link down,
    /// when that connection already dropped.
    pub(crate) fn establish(&self, dropped: &AtomicBool) -> bool {
        self.mark_connected();
        if dropped.load(Ordering::SeqCst) {
            self.mark_disconnected();
            return false;
        }
        true
    }

    /// Clear both flags. Returns whether the link was connected before.
    pub(crate) fn mark_disconnected(&self) -> bool {
        self.authorized.store(false, Ordering::SeqCst);
        self.connected.swap(false, Ordering::SeqCst)
    }
}

/// Client handler for russh that accepts all host keys.
///
/// # Security Note
///
/// Server keys are never verified. Deployments exposed to untrusted networks
/// should check them against a known_hosts file.
pub struct SshClientHandler {
    link: Arc<Link>,
    events: EventSink,
    dropped: Arc<AtomicBool>,
}

impl SshClientHandler {
    pub(crate) fn new(link: Arc<Link>, events: EventSink) -> Self {
        Self {
            link,
            events,
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag raised once this handler's connection has gone away.
    pub(crate) fn dropped_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn disconnected(
        &mut self,
        reason: client::DisconnectReason<Self::Error>,
    ) -> Result<(), Self::Error> {
        let cause = match reason {
            client::DisconnectReason::ReceivedDisconnect(info) => {
                TransportError::RemoteDisconnect(info.message)
            }
            client::DisconnectReason::Error(e) => TransportError::Ssh(e),
        };

        self.dropped.store(true, Ordering::SeqCst);

        // A local disconnect clears the link first; only report surprises
        if self.link.mark_disconnected() {
            warn!("SSH session disconnected: {}", cause);
            self.events.emit(SessionEvent::Disconnected(cause));
        } else {
            info!("SSH session closed: {}", cause);
        }
        Ok(())
    }
}
