//! Command dispatcher and lifecycle controller.
//!
//! [`SessionManager`] owns one logical SSH connection and moves it through
//! the lifecycle:
//!
//! ```text
//! DISCONNECTED --connect + authenticate--> AUTHORIZED --start_shell--> SHELL_ACTIVE
//! DISCONNECTED --connect fails----------> DISCONNECTED (NotConnected)
//! SHELL_ACTIVE --close_shell / remote close--> AUTHORIZED
//! any state    --disconnect-------------> DISCONNECTED
//! ```
//!
//! ## Execution Contexts
//!
//! - **Worker**: every protocol call runs on one serial queue, strictly in
//!   enqueue order. This is the only thing keeping concurrent callers apart;
//!   there are no locks around protocol operations.
//! - **Delivery**: every completion and observer callback runs on a second
//!   serial queue, so callers and observers never race each other.
//!
//! No method blocks the caller. Operations that take a completion invoke it
//! exactly once, on the delivery queue.
//!
//! ## Ordering Limits
//!
//! FIFO order is the only guarantee. An operation made of several transport
//! calls is a single worker job, but a `disconnect()` issued from elsewhere
//! may still land between two separately enqueued operations. Enqueued work
//! cannot be cancelled.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::client::RusshTransport;
use super::config::ManagerConfig;
use super::error::SessionError;
use super::observer::{EventSink, ObserverSlot, SessionObserver};
use super::queue::SerialQueue;
use super::state::SessionHolder;
use super::transport::{Transport, TransportChannel, TransportSession};
use super::types::{Credential, LifecycleState, SessionInfo};

/// Handle to a session manager. Clones share the same session and queues.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    holder: SessionHolder,
    transport: Arc<dyn Transport>,
    config: ManagerConfig,
    worker: SerialQueue,
    delivery: SerialQueue,
    observer: ObserverSlot,
}

impl SessionManager {
    /// Create a manager over an arbitrary transport.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; the worker and delivery
    /// queues are spawned immediately.
    pub fn new(
        transport: Arc<dyn Transport>,
        credential: Credential,
        config: ManagerConfig,
    ) -> Self {
        info!(
            "Creating session manager for {}@{}",
            credential.username(),
            credential.host()
        );
        Self {
            inner: Arc::new(Inner {
                holder: SessionHolder::new(credential),
                transport,
                config,
                worker: SerialQueue::spawn("worker"),
                delivery: SerialQueue::spawn("delivery"),
                observer: ObserverSlot::default(),
            }),
        }
    }

    /// Create a manager backed by the `russh` transport.
    pub fn with_russh(credential: Credential, config: ManagerConfig) -> Self {
        let transport = Arc::new(RusshTransport::new(config.clone()));
        Self::new(transport, credential, config)
    }

    /// Register the observer for asynchronous events; `None` unregisters.
    /// The last registration wins.
    pub fn set_observer(&self, observer: Option<Arc<dyn SessionObserver>>) {
        self.inner.observer.set(observer);
    }

    /// Bind (or clear) the password after construction.
    pub fn set_password(&self, password: Option<String>) {
        self.inner.holder.set_password(password);
    }

    pub fn credential(&self) -> Credential {
        self.inner.holder.credential()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.holder.is_connected()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.holder.is_authorized()
    }

    pub fn is_shell_active(&self) -> bool {
        self.inner.holder.is_shell_active()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.holder.state()
    }

    pub fn info(&self) -> SessionInfo {
        self.inner.holder.info()
    }

    /// Install a fresh, unconnected session, tearing down any prior one.
    ///
    /// Does not connect or authenticate; drive those with [`connect`](Self::connect)
    /// and [`authenticate`](Self::authenticate).
    pub fn initiate_session(&self) {
        self.inner.reconnect();
    }

    /// Connect and authenticate a fresh session.
    ///
    /// Fails with [`SessionError::NoPassword`] before any transport call when
    /// no password is set.
    pub fn connect_and_authorize<F>(&self, completion: F)
    where
        F: FnOnce(Result<(), SessionError>) + Send + 'static,
    {
        self.inner.connect_and_authorize(false, completion);
    }

    /// Like [`connect_and_authorize`](Self::connect_and_authorize), then start
    /// the shell. A shell failure is reported instead of success.
    pub fn connect_and_authorize_with_shell<F>(&self, completion: F)
    where
        F: FnOnce(Result<(), SessionError>) + Send + 'static,
    {
        self.inner.connect_and_authorize(true, completion);
    }

    /// Enqueue a transport connect on the installed session.
    pub fn connect(&self) {
        let Some((id, session)) = self.inner.holder.current() else {
            warn!("connect() ignored: no session installed, call initiate_session() first");
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            if let Err(e) = session.connect().await {
                error!("SSH connect failed: {}", e);
                return;
            }
            if session.is_connected() {
                inner.holder.mark_connected(id);
                settle(inner.config.connect_settle).await;
            }
        });
    }

    /// Enqueue password authentication on the installed session.
    pub fn authenticate(&self) {
        let Some(session) = self.inner.holder.session() else {
            warn!("authenticate() ignored: no session installed");
            return;
        };
        let Some(password) = self.inner.holder.password() else {
            warn!("authenticate() ignored: no password supplied");
            return;
        };
        let username = self.credential().username().to_string();
        self.inner.worker.enqueue(async move {
            match session.authenticate(&password).await {
                Ok(true) => info!("SSH authentication succeeded for {}", username),
                Ok(false) => warn!("SSH authentication rejected for {}", username),
                Err(e) => error!("SSH authentication failed for {}: {}", username, e),
            }
        });
    }

    /// Drop the installed session and enqueue its transport disconnect.
    pub fn disconnect(&self) {
        match self.inner.holder.take() {
            Some(session) => self.inner.teardown(session),
            None => warn!("disconnect() ignored: no session installed"),
        }
    }

    /// Request an interactive PTY shell on the session channel.
    pub fn start_shell<F>(&self, completion: F)
    where
        F: FnOnce(Result<(), SessionError>) + Send + 'static,
    {
        let Some(channel) = self.inner.holder.channel() else {
            self.inner.fail_without_channel("start_shell", completion);
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            let result = inner.run_start_shell(channel.as_ref()).await;
            inner.deliver(completion, result);
        });
    }

    /// Enqueue closing the shell. The observer hears about the close when
    /// the transport reports it.
    pub fn close_shell(&self) {
        let Some(channel) = self.inner.holder.channel() else {
            debug!("close_shell() ignored: no session channel");
            return;
        };
        self.inner.worker.enqueue(async move {
            channel.close_shell().await;
            info!("SSH shell close requested");
        });
    }

    /// Write `command` into the running shell.
    ///
    /// The text is sent as-is; append a newline to run it. Success means the
    /// write was accepted. Output arrives through the observer.
    pub fn send_command<F>(&self, command: impl Into<String>, completion: F)
    where
        F: FnOnce(Result<(), SessionError>) + Send + 'static,
    {
        let command = command.into();
        let Some(channel) = self.inner.holder.channel() else {
            self.inner.fail_without_channel("send_command", completion);
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            let result = write_command(channel.as_ref(), command).await;
            inner.deliver(completion, result);
        });
    }

    /// Execute `command` in its own exec context and report its output.
    ///
    /// Does not need a running shell.
    pub fn execute_command<F>(&self, command: impl Into<String>, completion: F)
    where
        F: FnOnce(Result<String, SessionError>) + Send + 'static,
    {
        let command = command.into();
        let Some(channel) = self.inner.holder.channel() else {
            self.inner.fail_without_channel("execute_command", completion);
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            let result = execute_command(channel.as_ref(), command).await;
            inner.deliver(completion, result);
        });
    }

    /// Write each command into the shell, in order.
    ///
    /// Position `i` of the result holds an empty string when command `i` was
    /// written, or a description of its failure. Only a missing channel fails
    /// the whole batch.
    pub fn write_bunch<I, S, F>(&self, commands: I, completion: F)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Result<Vec<String>, SessionError>) + Send + 'static,
    {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        let Some(channel) = self.inner.holder.channel() else {
            self.inner.fail_without_channel("write_bunch", completion);
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            let mut results = Vec::with_capacity(commands.len());
            for command in commands {
                results.push(match write_command(channel.as_ref(), command).await {
                    Ok(()) => String::new(),
                    Err(e) => e.to_string(),
                });
            }
            inner.deliver(completion, Ok(results));
        });
    }

    /// Execute each command, in order.
    ///
    /// Position `i` of the result holds command `i`'s output, or a
    /// description of its failure. Only a missing channel fails the whole
    /// batch.
    pub fn execute_bunch<I, S, F>(&self, commands: I, completion: F)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(Result<Vec<String>, SessionError>) + Send + 'static,
    {
        let commands: Vec<String> = commands.into_iter().map(Into::into).collect();
        let Some(channel) = self.inner.holder.channel() else {
            self.inner.fail_without_channel("execute_bunch", completion);
            return;
        };
        let inner = self.inner.clone();
        self.inner.worker.enqueue(async move {
            let mut results = Vec::with_capacity(commands.len());
            for command in commands {
                results.push(match execute_command(channel.as_ref(), command).await {
                    Ok(output) => output,
                    Err(e) => e.to_string(),
                });
            }
            inner.deliver(completion, Ok(results));
        });
    }
}

impl Inner {
    fn event_sink(&self) -> EventSink {
        EventSink::new(self.delivery.clone(), self.observer.clone())
    }

    /// Hand `result` to `completion` on the delivery queue.
    fn deliver<T, F>(&self, completion: F, result: Result<T, SessionError>)
    where
        T: Send + 'static,
        F: FnOnce(Result<T, SessionError>) + Send + 'static,
    {
        self.delivery.enqueue_fn(move || completion(result));
    }

    fn fail_without_channel<T, F>(&self, operation: &str, completion: F)
    where
        T: Send + 'static,
        F: FnOnce(Result<T, SessionError>) + Send + 'static,
    {
        warn!("{} rejected: no session channel", operation);
        self.deliver(completion, Err(SessionError::NoSessionChannel));
    }

    /// Reconnect transition: install a fresh session and route the prior
    /// one, if any, through teardown. Two live sessions never coexist.
    fn reconnect(&self) -> (Uuid, Arc<dyn TransportSession>) {
        let credential = self.holder.credential();
        let fresh = self
            .transport
            .open_session(&credential, self.event_sink());
        let (id, previous) = self.holder.install(fresh.clone());
        if let Some(previous) = previous {
            self.teardown(previous);
        }
        debug!(
            "Installed session {} for {}@{}",
            id,
            credential.username(),
            credential.host()
        );
        (id, fresh)
    }

    fn teardown(&self, session: Arc<dyn TransportSession>) {
        info!("Tearing down SSH session");
        self.worker.enqueue(async move {
            session.disconnect().await;
        });
    }

    fn connect_and_authorize<F>(self: &Arc<Self>, start_shell: bool, completion: F)
    where
        F: FnOnce(Result<(), SessionError>) + Send + 'static,
    {
        let Some(password) = self.holder.password() else {
            warn!("connect_and_authorize rejected: no password supplied");
            self.deliver(completion, Err(SessionError::NoPassword));
            return;
        };

        let (id, session) = self.reconnect();
        let inner = self.clone();
        self.worker.enqueue(async move {
            let result = inner
                .run_connect_and_authorize(id, session, &password, start_shell)
                .await;
            inner.deliver(completion, result);
        });
    }

    async fn run_connect_and_authorize(
        &self,
        id: Uuid,
        session: Arc<dyn TransportSession>,
        password: &str,
        start_shell: bool,
    ) -> Result<(), SessionError> {
        let credential = self.holder.credential();
        let (username, host) = (credential.username(), credential.host());

        info!("SSH connection to {}@{} starting", username, host);
        if let Err(e) = session.connect().await {
            warn!("SSH connection to {}@{} failed: {}", username, host, e);
        }
        if !session.is_connected() {
            error!("SSH connection to {}@{} is not connected", username, host);
            return Err(SessionError::NotConnected);
        }
        self.holder.mark_connected(id);
        settle(self.config.connect_settle).await;

        match session.authenticate(password).await {
            Ok(true) => {}
            Ok(false) => {
                error!("SSH authentication rejected for {}@{}", username, host);
                return Err(SessionError::NotAuthorized);
            }
            Err(e) => {
                error!("SSH authentication for {}@{} failed: {}", username, host, e);
                return Err(SessionError::NotAuthorized);
            }
        }
        info!("SSH connection to {}@{} authorized", username, host);

        if start_shell {
            self.run_start_shell(session.channel().as_ref()).await?;
        }

        Ok(())
    }

    /// Configure the PTY, register this manager as the channel's sink and
    /// start the shell. Runs on the worker queue.
    async fn run_start_shell(&self, channel: &dyn TransportChannel) -> Result<(), SessionError> {
        channel.configure_shell(self.config.pty.clone(), self.event_sink());
        match channel.start_shell().await {
            Ok(()) => {
                info!("SSH shell started");
                settle(self.config.shell_settle).await;
                Ok(())
            }
            Err(cause) => {
                error!("SSH shell failed to start: {}", cause);
                Err(SessionError::ShellNotStarted(cause))
            }
        }
    }
}

async fn write_command(channel: &dyn TransportChannel, command: String) -> Result<(), SessionError> {
    debug!("Writing command {:?}", command);
    match channel.write(&command).await {
        Ok(()) => Ok(()),
        Err(cause) => {
            warn!("Writing command {:?} failed: {}", command, cause);
            Err(SessionError::ErrorWritingCommand { command, cause })
        }
    }
}

async fn execute_command(
    channel: &dyn TransportChannel,
    command: String,
) -> Result<String, SessionError> {
    debug!("Executing command {:?}", command);
    match channel.execute(&command).await {
        Ok(output) => Ok(output),
        Err(cause) => {
            warn!("Executing command {:?} failed: {}", command, cause);
            Err(SessionError::ErrorExecutingCommand { command, cause })
        }
    }
}

/// Heuristic grace period; zero skips it.
async fn settle(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
impl SessionManager {
    /// Wait until everything enqueued so far has run and been delivered.
    pub(crate) async fn flush(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let delivery = self.inner.delivery.clone();
        self.inner.worker.enqueue(async move {
            delivery.enqueue_fn(move || {
                let _ = tx.send(());
            });
        });
        let _ = rx.await;
    }
}
