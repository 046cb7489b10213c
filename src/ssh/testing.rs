//! In-memory transport used by unit tests.
//!
//! Every transport call is appended to a shared call log, so tests can assert
//! both what happened and what did not. Failures are scripted through
//! [`FakeBehavior`], and unsolicited events are injected with
//! [`FakeSession::emit_disconnect`] and [`FakeChannel::emit`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::config::PtyConfig;
use super::error::{SessionError, TransportError};
use super::observer::{EventSink, ObserverSlot, SessionEvent};
use super::queue::SerialQueue;
use super::transport::{Transport, TransportChannel, TransportSession};
use super::types::Credential;

/// Scripted outcomes shared by every session a [`FakeTransport`] opens.
#[derive(Debug, Clone)]
pub(crate) struct FakeBehavior {
    /// `connect` returns an error
    pub connect_error: bool,
    /// `connect` returns Ok but the session stays down
    pub connect_stays_down: bool,
    pub accepted_password: String,
    pub shell_fails: bool,
    /// Commands (after trimming) whose write or execute fails
    pub failing_commands: HashSet<String>,
    pub responses: HashMap<String, String>,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            connect_error: false,
            connect_stays_down: false,
            accepted_password: "secret".to_string(),
            shell_fails: false,
            failing_commands: HashSet::new(),
            responses: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub(crate) struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub(crate) struct FakeTransport {
    pub behavior: Mutex<FakeBehavior>,
    pub log: Arc<CallLog>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_behavior(FakeBehavior::default())
    }

    pub(crate) fn with_behavior(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            log: Arc::new(CallLog::default()),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// Open a session whose events go nowhere.
    pub(crate) fn open(&self, credential: &Credential) -> Arc<dyn TransportSession> {
        let sink = EventSink::new(SerialQueue::spawn("discard"), ObserverSlot::default());
        self.open_session(credential, sink)
    }

    /// The `index`-th session opened so far.
    pub(crate) fn session(&self, index: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub(crate) fn live_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.is_connected())
            .count()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.log.entries()
    }

    fn behavior(&self) -> FakeBehavior {
        self.behavior.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn open_session(&self, _credential: &Credential, events: EventSink) -> Arc<dyn TransportSession> {
        let mut sessions = self.sessions.lock().unwrap();
        let index = sessions.len();
        let behavior = Arc::new(self.behavior());
        let channel = Arc::new(FakeChannel {
            index,
            shell_active: AtomicBool::new(false),
            events: Mutex::new(None),
            behavior: behavior.clone(),
            log: self.log.clone(),
        });
        let session = Arc::new(FakeSession {
            index,
            connected: AtomicBool::new(false),
            authorized: AtomicBool::new(false),
            events,
            channel,
            behavior,
            log: self.log.clone(),
        });
        sessions.push(session.clone());
        session
    }
}

pub(crate) struct FakeSession {
    index: usize,
    connected: AtomicBool,
    authorized: AtomicBool,
    events: EventSink,
    channel: Arc<FakeChannel>,
    behavior: Arc<FakeBehavior>,
    log: Arc<CallLog>,
}

impl FakeSession {
    pub(crate) fn force_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub(crate) fn force_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub(crate) fn fake_channel(&self) -> Arc<FakeChannel> {
        self.channel.clone()
    }

    /// Simulate the remote end dropping the connection.
    pub(crate) fn emit_disconnect(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        self.authorized.store(false, Ordering::SeqCst);
        self.events
            .emit(SessionEvent::Disconnected(TransportError::RemoteDisconnect(
                reason.to_string(),
            )));
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_authorized(&self) -> bool {
        self.is_connected() && self.authorized.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.log.push(format!("session{}.connect", self.index));
        if self.behavior.connect_error {
            return Err(TransportError::Other("Connection refused".to_string()));
        }
        if !self.behavior.connect_stays_down {
            self.connected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn authenticate(&self, password: &str) -> Result<bool, TransportError> {
        self.log.push(format!("session{}.authenticate", self.index));
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let accepted = password == self.behavior.accepted_password;
        self.authorized.store(accepted, Ordering::SeqCst);
        Ok(accepted)
    }

    async fn disconnect(&self) {
        self.log.push(format!("session{}.disconnect", self.index));
        self.connected.store(false, Ordering::SeqCst);
        self.authorized.store(false, Ordering::SeqCst);
        self.channel.shell_active.store(false, Ordering::SeqCst);
    }

    fn channel(&self) -> Arc<dyn TransportChannel> {
        self.channel.clone()
    }
}

pub(crate) struct FakeChannel {
    index: usize,
    shell_active: AtomicBool,
    events: Mutex<Option<EventSink>>,
    behavior: Arc<FakeBehavior>,
    log: Arc<CallLog>,
}

impl FakeChannel {
    /// Inject an event through the sink registered by `configure_shell`.
    pub(crate) fn emit(&self, event: SessionEvent) {
        if matches!(event, SessionEvent::ShellClosed) {
            self.shell_active.store(false, Ordering::SeqCst);
        }
        if let Some(sink) = self.events.lock().unwrap().as_ref() {
            sink.emit(event);
        }
    }

    fn fails(&self, command: &str) -> bool {
        self.behavior.failing_commands.contains(command.trim())
    }
}

#[async_trait]
impl TransportChannel for FakeChannel {
    fn is_shell_active(&self) -> bool {
        self.shell_active.load(Ordering::SeqCst)
    }

    fn configure_shell(&self, pty: PtyConfig, events: EventSink) {
        self.log
            .push(format!("channel{}.configure_shell {}", self.index, pty.term));
        *self.events.lock().unwrap() = Some(events);
    }

    async fn start_shell(&self) -> Result<(), TransportError> {
        self.log.push(format!("channel{}.start_shell", self.index));
        if self.behavior.shell_fails {
            return Err(TransportError::RequestRejected("shell"));
        }
        self.shell_active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close_shell(&self) {
        self.log.push(format!("channel{}.close_shell", self.index));
        self.shell_active.store(false, Ordering::SeqCst);
    }

    async fn write(&self, text: &str) -> Result<(), TransportError> {
        self.log
            .push(format!("channel{}.write {}", self.index, text.trim()));
        if !self.is_shell_active() {
            return Err(TransportError::ShellNotRunning);
        }
        if self.fails(text) {
            return Err(TransportError::Other("Broken pipe".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, command: &str) -> Result<String, TransportError> {
        self.log
            .push(format!("channel{}.execute {}", self.index, command));
        if self.fails(command) {
            return Err(TransportError::Other("exec request failed".to_string()));
        }
        Ok(self
            .behavior
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| format!("output of {}", command)))
    }
}

/// A completion callback paired with the receiver that observes it.
pub(crate) fn completion<T: Send + 'static>() -> (
    Box<dyn FnOnce(Result<T, SessionError>) + Send>,
    oneshot::Receiver<Result<T, SessionError>>,
) {
    let (tx, rx) = oneshot::channel();
    let callback = move |result: Result<T, SessionError>| {
        let _ = tx.send(result);
    };
    (Box::new(callback), rx)
}

/// Route `tracing` output through the test harness; honors `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
