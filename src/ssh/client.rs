//! russh-backed transport.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: the credential's host is split into host and port,
//!    defaulting to port 22.
//! 2. **Client Configuration**: keepalive and compression settings. There is
//!    no inactivity timeout; sessions live until torn down.
//! 3. **Connection Establishment**: TCP + SSH handshake bounded by the
//!    connect timeout, retried with backoff.
//! 4. **Authentication**: password only, as a separate step.
//! 5. **Shell / Exec**: the interactive shell and every executed command get
//!    their own session channel.
//!
//! ## Retry Strategy
//!
//! Connection attempts use exponential backoff with jitter via `backon`:
//!
//! - **Initial delay**: [`ManagerConfig::retry_delay`] (default: 1000ms)
//! - **Maximum delay**: capped at [`MAX_RETRY_DELAY`] (10 seconds)
//! - **Maximum attempts**: [`ManagerConfig::max_retries`] (default: 3)
//!
//! Only errors classified by [`TransportError::is_retryable`] are retried.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use russh::{Channel, ChannelMsg, client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{MAX_RETRY_DELAY, ManagerConfig, PtyConfig};
use super::error::TransportError;
use super::observer::EventSink;
use super::session::{Link, SshClientHandler};
use super::shell::{ChannelWriter, RunningShell, pump_shell_output};
use super::transport::{Transport, TransportChannel, TransportSession};
use super::types::Credential;

/// Build russh client configuration.
///
/// Keepalive is 30 seconds with at most 3 unanswered probes. Compression
/// prefers zlib when `compress` is set.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse `host:port` or `host` (port 22).
///
/// IPv6 literals are accepted bare (`::1`) or bracketed (`[::1]`,
/// `[::1]:2222`); the returned host never carries brackets.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), TransportError> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            TransportError::InvalidAddress(format!("Unterminated IPv6 literal: {}", address))
        })?;
        let port = match tail {
            "" => 22,
            _ => {
                let port_str = tail.strip_prefix(':').ok_or_else(|| {
                    TransportError::InvalidAddress(format!("Unexpected text after ']': {}", tail))
                })?;
                parse_port(port_str)?
            }
        };
        return Ok((host.to_string(), port));
    }

    match address.split_once(':') {
        // More than one colon without brackets is a bare IPv6 literal
        Some((_, rest)) if rest.contains(':') => Ok((address.to_string(), 22)),
        Some((host, port_str)) => Ok((host.to_string(), parse_port(port_str)?)),
        None => Ok((address.to_string(), 22)),
    }
}

fn parse_port(port_str: &str) -> Result<u16, TransportError> {
    port_str
        .parse::<u16>()
        .map_err(|e| TransportError::InvalidAddress(format!("Invalid port number: {}", e)))
}

async fn connect_once(
    address: &str,
    timeout: Duration,
    compress: bool,
    handler: SshClientHandler,
) -> Result<client::Handle<SshClientHandler>, TransportError> {
    let config = build_client_config(compress);
    let (host, port) = parse_address(address)?;

    let connect_future = client::connect(config, (host.as_str(), port), handler);

    tokio::time::timeout(timeout, connect_future)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(TransportError::from)
}

/// Connect with exponential backoff. Every attempt gets a fresh handler
/// bound to the same link.
async fn connect_with_retry(
    credential: &Credential,
    config: &ManagerConfig,
    link: &Arc<Link>,
    events: &EventSink,
) -> Result<(client::Handle<SshClientHandler>, Arc<AtomicBool>), TransportError> {
    let attempt_counter = AtomicU32::new(0);
    let address = credential.host();
    let username = credential.username();

    let backoff = ExponentialBuilder::default()
        .with_min_delay(config.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(config.max_retries as usize)
        .with_jitter();

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);

        if current_attempt > 0 {
            warn!(
                "SSH connection retry attempt {} to {}@{}",
                current_attempt, username, address
            );
        }

        let handler = SshClientHandler::new(link.clone(), events.clone());
        let dropped = handler.dropped_flag();
        let handle = connect_once(address, config.connect_timeout, config.compress, handler).await?;
        Ok((handle, dropped))
    })
    .retry(backoff)
    .when(|e: &TransportError| {
        let retryable = e.is_retryable();
        if !retryable {
            warn!(
                "SSH connection to {}@{} failed with non-retryable error: {}",
                username, address, e
            );
        }
        retryable
    })
    .notify(|err, dur| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(connection) => {
            if retry_count > 0 {
                info!(
                    "SSH connection to {}@{} succeeded after {} retry attempt(s)",
                    username, address, retry_count
                );
            }
            Ok(connection)
        }
        Err(e) => {
            error!(
                "SSH connection to {}@{} failed after {} attempt(s). Last error: {}",
                username, address, total_attempts, e
            );
            Err(e)
        }
    }
}

/// Wait for the server's answer to a `want_reply` channel request.
async fn await_reply(
    channel: &mut Channel<client::Msg>,
    request: &'static str,
) -> Result<(), TransportError> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Success) => return Ok(()),
            Some(ChannelMsg::Failure) => return Err(TransportError::RequestRejected(request)),
            Some(ChannelMsg::Close) | None => return Err(TransportError::ChannelClosed),
            Some(_) => {}
        }
    }
}

async fn request_shell(
    channel: &mut Channel<client::Msg>,
    pty: &PtyConfig,
) -> Result<(), TransportError> {
    channel
        .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &[])
        .await?;
    await_reply(channel, "pty").await?;
    channel.request_shell(true).await?;
    await_reply(channel, "shell").await
}

/// Session factory backed by russh.
pub struct RusshTransport {
    config: ManagerConfig,
}

impl RusshTransport {
    pub fn new(config: ManagerConfig) -> Self {
        Self { config }
    }
}

impl Transport for RusshTransport {
    fn open_session(&self, credential: &Credential, events: EventSink) -> Arc<dyn TransportSession> {
        let link = Arc::new(Link::default());
        Arc::new(RusshSession {
            credential: credential.clone(),
            config: self.config.clone(),
            channel: Arc::new(RusshChannel::new(link.clone(), &self.config)),
            link,
            events,
        })
    }
}

struct RusshSession {
    credential: Credential,
    config: ManagerConfig,
    link: Arc<Link>,
    events: EventSink,
    channel: Arc<RusshChannel>,
}

#[async_trait]
impl TransportSession for RusshSession {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn is_authorized(&self) -> bool {
        self.link.is_authorized()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.link.is_connected() {
            debug!("SSH session already connected");
            return Ok(());
        }

        let (handle, dropped) =
            connect_with_retry(&self.credential, &self.config, &self.link, &self.events).await?;
        *self.link.handle.lock().await = Some(handle);
        if !self.link.establish(&dropped) {
            self.link.handle.lock().await.take();
            warn!(
                "SSH connection to {}@{} dropped during setup",
                self.credential.username(),
                self.credential.host()
            );
            return Err(TransportError::RemoteDisconnect(
                "connection dropped during setup".to_string(),
            ));
        }
        info!(
            "SSH connection to {}@{} established",
            self.credential.username(),
            self.credential.host()
        );
        Ok(())
    }

    async fn authenticate(&self, password: &str) -> Result<bool, TransportError> {
        let mut guard = self.link.handle.lock().await;
        let handle = guard.as_mut().ok_or(TransportError::NotConnected)?;

        let result = handle
            .authenticate_password(self.credential.username(), password)
            .await?;

        let success = result.success();
        self.link.mark_authorized(success);
        Ok(success)
    }

    async fn disconnect(&self) {
        self.link.mark_disconnected();
        self.channel.discard_shell();

        let Some(handle) = self.link.handle.lock().await.take() else {
            debug!("SSH session already closed");
            return;
        };
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("SSH disconnect failed: {}", e);
        }
    }

    fn channel(&self) -> Arc<dyn TransportChannel> {
        self.channel.clone()
    }
}

struct RusshChannel {
    link: Arc<Link>,
    connect_timeout: Duration,
    command_timeout: Duration,
    setup: Mutex<Option<(PtyConfig, EventSink)>>,
    shell: Mutex<Option<RunningShell>>,
}

impl RusshChannel {
    fn new(link: Arc<Link>, config: &ManagerConfig) -> Self {
        Self {
            link,
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            setup: Mutex::new(None),
            shell: Mutex::new(None),
        }
    }

    fn running(&self) -> Option<(Arc<ChannelWriter>, Arc<AtomicBool>)> {
        self.shell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|shell| shell.is_active())
            .map(|shell| (shell.writer.clone(), shell.active.clone()))
    }

    /// Forget the shell without a close notification.
    fn discard_shell(&self) {
        let previous = self
            .shell
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(shell) = previous {
            shell.active.store(false, Ordering::SeqCst);
            shell.cancel.cancel();
        }
    }

    async fn open_channel(&self) -> Result<Channel<client::Msg>, TransportError> {
        let guard = self.link.handle.lock().await;
        let handle = guard.as_ref().ok_or(TransportError::NotConnected)?;
        Ok(handle.channel_open_session().await?)
    }
}

#[async_trait]
impl TransportChannel for RusshChannel {
    fn is_shell_active(&self) -> bool {
        self.link.is_connected() && self.running().is_some()
    }

    fn configure_shell(&self, pty: PtyConfig, events: EventSink) {
        *self.setup.lock().unwrap_or_else(PoisonError::into_inner) = Some((pty, events));
    }

    async fn start_shell(&self) -> Result<(), TransportError> {
        let (pty, events) = self
            .setup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TransportError::Other("Shell is not configured".to_string()))?;

        let mut channel = self.open_channel().await?;
        tokio::time::timeout(self.connect_timeout, request_shell(&mut channel, &pty))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout))??;

        let (reader, write_half) = channel.split();
        let active = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        tokio::spawn(pump_shell_output(
            reader,
            active.clone(),
            events,
            cancel.clone(),
        ));

        // A new shell replaces the old one, which is closed without notice
        self.discard_shell();
        *self.shell.lock().unwrap_or_else(PoisonError::into_inner) = Some(RunningShell {
            writer: Arc::new(ChannelWriter::new(write_half)),
            active,
            cancel,
        });
        info!("SSH shell started ({} {}x{})", pty.term, pty.cols, pty.rows);
        Ok(())
    }

    async fn close_shell(&self) {
        let Some((writer, active)) = self.running() else {
            debug!("No running shell to close");
            return;
        };
        active.store(false, Ordering::SeqCst);
        if let Err(e) = writer.close().await {
            warn!("Failed to close shell channel: {}", e);
        }
    }

    async fn write(&self, text: &str) -> Result<(), TransportError> {
        let (writer, _) = self.running().ok_or(TransportError::ShellNotRunning)?;
        writer.write(text.as_bytes()).await
    }

    async fn execute(&self, command: &str) -> Result<String, TransportError> {
        let mut channel = self.open_channel().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::with_capacity(4096);
        let mut stderr_len = 0usize;
        let mut exit_code: Option<u32> = None;

        let result = tokio::time::timeout(self.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // ext == 1 is stderr in SSH protocol
                        if ext == 1 {
                            stderr_len += data.len();
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) => {
                        // Continue to wait for exit status if not received yet
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await;

        // Always close the channel so the session stays usable
        let _ = channel.close().await;

        if result.is_err() {
            warn!(
                "Command timed out after {:?} ({} bytes stdout so far)",
                self.command_timeout,
                stdout.len()
            );
            return Err(TransportError::Timeout(self.command_timeout));
        }

        debug!(
            "Command {:?} finished with exit code {:?} ({} bytes stdout, {} bytes stderr)",
            command,
            exit_code,
            stdout.len(),
            stderr_len
        );
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}
