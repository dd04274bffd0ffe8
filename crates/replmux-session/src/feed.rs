use std::io::{ErrorKind, Read};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

const READ_BUFFER_SIZE: usize = 256;
const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

/// Why the feed could not produce a byte.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// No byte arrived within the bound.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    /// The device stream reached end of file.
    #[error("device stream closed")]
    Closed,

    /// Reading the device failed.
    #[error("device read failed: {0}")]
    Io(std::io::Error),
}

impl From<FeedError> for crate::SessionError {
    fn from(err: FeedError) -> Self {
        match err {
            // Callers that expect a timeout map it with context first.
            FeedError::Timeout(after) => crate::SessionError::ProtocolTimeout {
                waiting_for: "device output",
                after,
            },
            FeedError::Closed => crate::SessionError::FeedClosed,
            FeedError::Io(err) => crate::SessionError::Io(err),
        }
    }
}

#[derive(Debug, Clone)]
enum Terminal {
    Eof,
    Failed { kind: ErrorKind, message: String },
}

impl Terminal {
    fn to_error(&self) -> FeedError {
        match self {
            Terminal::Eof => FeedError::Closed,
            Terminal::Failed { kind, message } => {
                FeedError::Io(std::io::Error::new(*kind, message.clone()))
            }
        }
    }
}

/// Bytes read from the device by a dedicated thread.
///
/// The thread is the only reader of the transport. It keeps pulling bytes
/// whether or not anyone is waiting, so nothing is lost between calls, and
/// bytes that arrive after a timed-out wait stay queued for the next one.
/// When the stream ends or fails the cause is latched and every later call
/// reports it once the queued bytes are drained.
pub struct ByteFeed {
    rx: Option<Receiver<u8>>,
    terminal: Arc<Mutex<Option<Terminal>>>,
    reader: Option<JoinHandle<()>>,
}

impl ByteFeed {
    /// Start the reader thread over `reader`.
    pub fn spawn(reader: Box<dyn Read + Send>, capacity: usize) -> std::io::Result<Self> {
        let (tx, rx) = sync_channel(capacity.max(1));
        let terminal = Arc::new(Mutex::new(None));
        let latch = Arc::clone(&terminal);

        let handle = thread::Builder::new()
            .name("replmux-feed".to_string())
            .spawn(move || pump(reader, tx, latch))?;

        Ok(Self {
            rx: Some(rx),
            terminal,
            reader: Some(handle),
        })
    }

    /// Next byte from the device. `None` waits forever.
    pub fn next_byte(&mut self, timeout: Option<Duration>) -> Result<u8, FeedError> {
        let Some(rx) = self.rx.as_ref() else {
            return Err(FeedError::Closed);
        };
        let received = match timeout {
            Some(limit) => rx.recv_timeout(limit),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(byte) => Ok(byte),
            Err(RecvTimeoutError::Timeout) => Err(FeedError::Timeout(timeout.unwrap_or_default())),
            Err(RecvTimeoutError::Disconnected) => Err(self.terminal_error()),
        }
    }

    /// Read until `terminator` and return the bytes before it.
    ///
    /// A zero `timeout` waits forever. Otherwise the whole call must finish
    /// within `timeout`; on expiry the bytes read so far are dropped.
    pub fn read_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<Vec<u8>, FeedError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut out = Vec::new();

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(FeedError::Timeout(timeout));
                    }
                    Some(left)
                }
                None => None,
            };
            let byte = self.next_byte(wait).map_err(|err| match err {
                FeedError::Timeout(_) => FeedError::Timeout(timeout),
                other => other,
            })?;
            out.push(byte);
            if out.ends_with(terminator) {
                out.truncate(out.len() - terminator.len());
                return Ok(out);
            }
        }
    }

    /// Stop consuming and wait up to `wait` for the reader thread to exit.
    ///
    /// The thread only exits once its read returns, so the transport must be
    /// closed first. Returns false if the thread was still running; it is
    /// then left detached. Later reads report [`FeedError::Closed`].
    pub fn shutdown(&mut self, wait: Duration) -> bool {
        // A reader blocked on a full queue fails its send and exits.
        self.rx = None;
        let Some(handle) = self.reader.take() else {
            return true;
        };

        let deadline = Instant::now() + wait;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                debug!(?wait, "reader thread still running");
                return false;
            }
            thread::sleep(SHUTDOWN_POLL);
        }
        if handle.join().is_err() {
            debug!("reader thread panicked");
        }
        true
    }

    /// Whether the reader thread is still running.
    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn terminal_error(&self) -> FeedError {
        let latched = self.terminal.lock().unwrap_or_else(PoisonError::into_inner);
        latched
            .as_ref()
            .map_or(FeedError::Closed, Terminal::to_error)
    }
}

impl std::fmt::Debug for ByteFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteFeed").finish_non_exhaustive()
    }
}

fn pump(mut reader: Box<dyn Read + Send>, tx: SyncSender<u8>, latch: Arc<Mutex<Option<Terminal>>>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let terminal = loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break Terminal::Eof,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                break Terminal::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                }
            }
        };
        trace!(bytes = n, data = ?String::from_utf8_lossy(&buf[..n]), "device output");
        for &byte in &buf[..n] {
            if tx.send(byte).is_err() {
                debug!("feed dropped, reader thread exiting");
                return;
            }
        }
    };

    debug!(?terminal, "device stream ended");
    *latch.lock().unwrap_or_else(PoisonError::into_inner) = Some(terminal);
    // Dropping the sender after latching wakes blocked receivers.
    drop(tx);
}
