//! Session state holder.
//!
//! Owns the credential and the single installed transport session. Everything
//! here is a cheap, non-failing read or an in-memory swap; nothing performs
//! network I/O. Connectivity is always read from the transport itself, so
//! there is no cached flag to go stale.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use uuid::Uuid;

use super::transport::{TransportChannel, TransportSession};
use super::types::{Credential, LifecycleState, SessionInfo};

struct Installed {
    id: Uuid,
    session: Arc<dyn TransportSession>,
    connected_at: Option<String>,
}

/// Holder of the credential and the (at most one) live session.
pub(crate) struct SessionHolder {
    credential: RwLock<Credential>,
    installed: RwLock<Option<Installed>>,
}

impl SessionHolder {
    pub(crate) fn new(credential: Credential) -> Self {
        Self {
            credential: RwLock::new(credential),
            installed: RwLock::new(None),
        }
    }

    pub(crate) fn credential(&self) -> Credential {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn password(&self) -> Option<String> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .password()
            .map(str::to_string)
    }

    pub(crate) fn set_password(&self, password: Option<String>) {
        self.credential
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_password(password);
    }

    /// The installed session together with its identifier.
    pub(crate) fn current(&self) -> Option<(Uuid, Arc<dyn TransportSession>)> {
        self.installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|i| (i.id, i.session.clone()))
    }

    pub(crate) fn session(&self) -> Option<Arc<dyn TransportSession>> {
        self.current().map(|(_, session)| session)
    }

    /// Present if and only if a session is installed.
    pub(crate) fn channel(&self) -> Option<Arc<dyn TransportChannel>> {
        self.session().map(|session| session.channel())
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.session().is_some_and(|s| s.is_connected())
    }

    pub(crate) fn is_authorized(&self) -> bool {
        self.session().is_some_and(|s| s.is_authorized())
    }

    pub(crate) fn is_shell_active(&self) -> bool {
        self.channel().is_some_and(|c| c.is_shell_active())
    }

    pub(crate) fn state(&self) -> LifecycleState {
        match self.session() {
            Some(session) => LifecycleState::derive(
                session.is_connected(),
                session.is_authorized(),
                session.channel().is_shell_active(),
            ),
            None => LifecycleState::Disconnected,
        }
    }

    /// Reconnect transition: install `next` and hand back the prior session.
    ///
    /// The caller owns the returned session and must tear it down; the holder
    /// never keeps two sessions. Returns the new session's identifier.
    pub(crate) fn install(
        &self,
        next: Arc<dyn TransportSession>,
    ) -> (Uuid, Option<Arc<dyn TransportSession>>) {
        let id = Uuid::new_v4();
        let previous = self
            .installed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Installed {
                id,
                session: next,
                connected_at: None,
            });
        (id, previous.map(|i| i.session))
    }

    /// Remove the installed session, handing it back for teardown.
    pub(crate) fn take(&self) -> Option<Arc<dyn TransportSession>> {
        self.installed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|i| i.session)
    }

    /// Record the connect time, unless session `id` has since been replaced.
    pub(crate) fn mark_connected(&self, id: Uuid) {
        let mut installed = self.installed.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = installed.as_mut()
            && current.id == id
        {
            current.connected_at = Some(Utc::now().to_rfc3339());
        }
    }

    pub(crate) fn info(&self) -> SessionInfo {
        let credential = self.credential();
        let (session_id, connected_at) = self
            .installed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|i| (Some(i.id.to_string()), i.connected_at.clone()))
            .unwrap_or((None, None));

        SessionInfo {
            session_id,
            host: credential.host().to_string(),
            username: credential.username().to_string(),
            connected_at,
            state: self.state(),
        }
    }
}
