//! Value types shared by the session manager and its transport.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Host, username and (possibly late-bound) password for one remote host.
///
/// `host` may carry a port as `host:port`; port 22 is used otherwise.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    host: String,
    username: String,
    password: Option<String>,
}

impl Credential {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub(crate) fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }
}

// Hand-written so the password never reaches a log line.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Lifecycle state derived from the live transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No session, or the session's connection is down
    Disconnected,
    /// Transport connected but not yet authenticated
    Connected,
    /// Authenticated; commands may be executed
    Authorized,
    /// Authenticated with an interactive shell running
    ShellActive,
}

impl LifecycleState {
    /// Derive the state from the transport's connectivity flags.
    pub fn derive(connected: bool, authorized: bool, shell_active: bool) -> Self {
        match (connected, authorized, shell_active) {
            (false, _, _) => LifecycleState::Disconnected,
            (true, false, _) => LifecycleState::Connected,
            (true, true, false) => LifecycleState::Authorized,
            (true, true, true) => LifecycleState::ShellActive,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Disconnected => write!(f, "disconnected"),
            LifecycleState::Connected => write!(f, "connected"),
            LifecycleState::Authorized => write!(f, "authorized"),
            LifecycleState::ShellActive => write!(f, "shell_active"),
        }
    }
}

/// Snapshot of the manager's current session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Identifier of the installed session (absent when none is held)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub host: String,
    pub username: String,
    /// When the connect step last succeeded (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
    pub state: LifecycleState,
}
