//! Interactive PTY shell plumbing for the russh transport.
//!
//! A started shell's channel is split in two: the write half stays with the
//! [`RunningShell`] for command writes, and the read half moves into a
//! background task, [`pump_shell_output`], that turns channel messages into
//! [`SessionEvent`]s. Output is forwarded as it arrives. Only the incomplete
//! tail of a UTF-8 character split across packets is held back until the
//! rest arrives (see [`Utf8Decoder`]).
//!
//! # Shell Closure
//!
//! The pump owns the shell's `active` flag. When the remote side closes the
//! channel (or the connection drops) it clears the flag and emits exactly one
//! [`SessionEvent::ShellClosed`]. A pump whose shell was replaced is
//! cancelled and exits silently.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::TransportError;
use super::observer::{EventSink, SessionEvent};

/// Write handle for sending input to a shell channel.
///
/// Wraps `russh::ChannelWriteHalf` so writes never contend with the reader.
pub struct ChannelWriter {
    write_half: ChannelWriteHalf<client::Msg>,
}

impl ChannelWriter {
    pub fn new(write_half: ChannelWriteHalf<client::Msg>) -> Self {
        Self { write_half }
    }

    /// Send raw text (commands, keystrokes, escape sequences) to the shell.
    pub async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        self.write_half.data(data).await.map_err(TransportError::from)
    }

    /// Close the channel gracefully.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.write_half.close().await.map_err(TransportError::from)
    }
}

/// State for the running interactive shell.
pub(crate) struct RunningShell {
    pub(crate) writer: Arc<ChannelWriter>,
    /// Cleared by the pump when the shell ends
    pub(crate) active: Arc<AtomicBool>,
    /// Stops the pump without a close notification
    pub(crate) cancel: CancellationToken,
}

impl RunningShell {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Source of channel messages for the pump; `None` means the channel ended.
pub(crate) trait MessageSource: Send {
    fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send;
}

impl MessageSource for ChannelReadHalf {
    fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send {
        self.wait()
    }
}

/// Incremental UTF-8 decoder for one output stream.
///
/// Complete characters are returned immediately. An incomplete trailing
/// sequence is carried into the next chunk; invalid bytes become U+FFFD.
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Truncated sequence at the end: wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is still held back, lossily.
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(text)
    }
}

/// Forward shell output to `events` until the channel ends or `cancel` fires.
pub(crate) async fn pump_shell_output<S: MessageSource>(
    mut source: S,
    active: Arc<AtomicBool>,
    events: EventSink,
    cancel: CancellationToken,
) {
    let mut stdout = Utf8Decoder::default();
    let mut stderr = Utf8Decoder::default();

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Shell reader cancelled");
                return;
            }
            msg = source.next_message() => msg,
        };

        match msg {
            Some(ChannelMsg::Data { data }) => {
                let text = stdout.push(&data);
                if !text.is_empty() {
                    events.emit(SessionEvent::Data(text));
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    let text = stderr.push(&data);
                    if !text.is_empty() {
                        events.emit(SessionEvent::ErrorData(text));
                    }
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                debug!("Shell exited with status {}", exit_status);
            }
            Some(ChannelMsg::Close) | None => break,
            Some(_) => {}
        }
    }

    if let Some(text) = stdout.finish() {
        events.emit(SessionEvent::Data(text));
    }
    if let Some(text) = stderr.finish() {
        events.emit(SessionEvent::ErrorData(text));
    }

    active.store(false, Ordering::SeqCst);
    info!("SSH shell closed");
    events.emit(SessionEvent::ShellClosed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use russh::CryptoVec;
    use tokio::sync::oneshot;

    use crate::ssh::observer::{ObserverSlot, SessionObserver};
    use crate::ssh::queue::SerialQueue;

    /// Replays scripted messages; optionally hangs instead of ending.
    struct Scripted {
        messages: VecDeque<ChannelMsg>,
        hang_when_empty: bool,
    }

    impl Scripted {
        fn new(messages: Vec<ChannelMsg>) -> Self {
            Self {
                messages: messages.into(),
                hang_when_empty: false,
            }
        }

        fn hanging(messages: Vec<ChannelMsg>) -> Self {
            Self {
                messages: messages.into(),
                hang_when_empty: true,
            }
        }
    }

    impl MessageSource for Scripted {
        fn next_message(&mut self) -> impl Future<Output = Option<ChannelMsg>> + Send {
            let next = self.messages.pop_front();
            let hang = next.is_none() && self.hang_when_empty;
            async move {
                if hang {
                    std::future::pending::<()>().await;
                }
                next
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SessionObserver for Recorder {
        fn channel_did_read_data(&self, message: &str) {
            self.events.lock().unwrap().push(format!("data:{}", message));
        }

        fn channel_did_read_error(&self, error: &str) {
            self.events.lock().unwrap().push(format!("stderr:{}", error));
        }

        fn channel_shell_did_close(&self) {
            self.events.lock().unwrap().push("closed".to_string());
        }
    }

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    fn extended(bytes: &[u8], ext: u32) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext,
        }
    }

    async fn drain(queue: &SerialQueue) {
        let (tx, rx) = oneshot::channel();
        queue.enqueue_fn(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }

    /// Run the pump to completion over `source` and return what the observer saw.
    async fn pump(source: Scripted) -> (Vec<String>, bool) {
        let queue = SerialQueue::spawn("delivery");
        let slot = ObserverSlot::default();
        let recorder = Arc::new(Recorder::default());
        slot.set(Some(recorder.clone()));
        let active = Arc::new(AtomicBool::new(true));

        pump_shell_output(
            source,
            active.clone(),
            EventSink::new(queue.clone(), slot),
            CancellationToken::new(),
        )
        .await;
        drain(&queue).await;

        let events = recorder.events.lock().unwrap().clone();
        (events, active.load(Ordering::SeqCst))
    }

    mod decoder {
        use super::*;

        #[test]
        fn test_character_split_across_chunks() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.push(b"caf\xC3"), "caf");
            assert_eq!(decoder.push(b"\xA9\n"), "\u{e9}\n");
            assert!(decoder.finish().is_none());
        }

        #[test]
        fn test_four_byte_character_one_byte_at_a_time() {
            let mut decoder = Utf8Decoder::default();
            let bytes = "\u{1F600}".as_bytes();
            assert_eq!(decoder.push(&bytes[..1]), "");
            assert_eq!(decoder.push(&bytes[1..2]), "");
            assert_eq!(decoder.push(&bytes[2..3]), "");
            assert_eq!(decoder.push(&bytes[3..]), "\u{1F600}");
        }

        #[test]
        fn test_invalid_bytes_are_replaced_and_skipped() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.push(b"a\xFFb"), "a\u{FFFD}b");
        }

        #[test]
        fn test_finish_flushes_truncated_tail() {
            let mut decoder = Utf8Decoder::default();
            assert_eq!(decoder.push(b"ok\xE2\x82"), "ok");
            assert_eq!(decoder.finish().as_deref(), Some("\u{FFFD}"));
            assert!(decoder.finish().is_none());
        }
    }

    mod pump {
        use super::*;

        #[tokio::test]
        async fn test_close_emits_single_shell_closed() {
            let (events, active) = pump(Scripted::new(vec![
                data(b"router> "),
                ChannelMsg::Eof,
                ChannelMsg::Close,
                data(b"after close"),
            ]))
            .await;

            assert_eq!(events, vec!["data:router> ", "closed"]);
            assert!(!active);
        }

        #[tokio::test]
        async fn test_channel_end_emits_shell_closed() {
            let (events, active) = pump(Scripted::new(vec![data(b"bye\n")])).await;

            assert_eq!(events, vec!["data:bye\n", "closed"]);
            assert!(!active);
        }

        #[tokio::test]
        async fn test_stderr_is_extended_data_type_one() {
            let (events, _) = pump(Scripted::new(vec![
                extended(b"% Invalid input", 1),
                extended(b"ignored", 2),
                ChannelMsg::Close,
            ]))
            .await;

            assert_eq!(events, vec!["stderr:% Invalid input", "closed"]);
        }

        #[tokio::test]
        async fn test_split_character_reassembled() {
            let (events, _) = pump(Scripted::new(vec![
                data(b"caf\xC3"),
                data(b"\xA9\n"),
                ChannelMsg::Close,
            ]))
            .await;

            assert_eq!(events, vec!["data:caf", "data:\u{e9}\n", "closed"]);
        }

        #[tokio::test]
        async fn test_truncated_tail_flushed_before_close() {
            let (events, _) = pump(Scripted::new(vec![data(b"x\xC3"), ChannelMsg::Close])).await;

            assert_eq!(events, vec!["data:x", "data:\u{FFFD}", "closed"]);
        }

        #[tokio::test]
        async fn test_cancel_exits_without_shell_closed() {
            let queue = SerialQueue::spawn("delivery");
            let slot = ObserverSlot::default();
            let recorder = Arc::new(Recorder::default());
            slot.set(Some(recorder.clone()));
            let active = Arc::new(AtomicBool::new(true));
            let cancel = CancellationToken::new();

            let task = tokio::spawn(pump_shell_output(
                Scripted::hanging(vec![data(b"banner")]),
                active.clone(),
                EventSink::new(queue.clone(), slot),
                cancel.clone(),
            ));
            cancel.cancel();
            task.await.unwrap();
            drain(&queue).await;

            let events = recorder.events.lock().unwrap().clone();
            assert!(!events.contains(&"closed".to_string()));
            assert!(active.load(Ordering::SeqCst));
        }
    }
}
