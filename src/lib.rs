//! Single-host SSH session manager with serialized command dispatch.
//!
//! A [`SessionManager`] owns one logical SSH connection. Callers issue
//! non-blocking requests (connect, start a shell, send or execute commands,
//! run batches) and receive results through completion callbacks, while a
//! registered [`SessionObserver`] hears about shell output and disconnects.
//!
//! ```no_run
//! use ssh_session::{Credential, ManagerConfig, SessionManager};
//!
//! # async fn run() {
//! let credential = Credential::new("10.0.0.1:22", "admin").with_password("secret");
//! let manager = SessionManager::with_russh(credential, ManagerConfig::from_env());
//!
//! manager.connect_and_authorize_with_shell(|result| match result {
//!     Ok(()) => tracing::info!("shell ready"),
//!     Err(e) => tracing::error!("connect failed: {}", e),
//! });
//! manager.send_command("show version\n", |_| {});
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod ssh;

pub use ssh::{
    Credential, EventSink, LifecycleState, ManagerConfig, PtyConfig, RusshTransport,
    SessionError, SessionEvent, SessionInfo, SessionManager, SessionObserver, Transport,
    TransportChannel, TransportError, TransportSession,
};
