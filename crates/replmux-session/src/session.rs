use std::time::Duration;

use replmux_transport::ByteTransport;
use tracing::{debug, trace, warn};

use crate::config::SessionConfig;
use crate::control::{ACK, COMPLETION, EOT, RAW_EXIT, REBOOT_SCRIPT};
use crate::error::{remote_outcome, Result, SessionError};
use crate::feed::{ByteFeed, FeedError};
use crate::state::{step, Action, Event, Goal, Mode, State};

/// Bound on waiting for the reader thread once the transport is closed.
const READER_EXIT_WAIT: Duration = Duration::from_millis(500);

/// A raw-REPL session with an interpreter on the far end of a transport.
///
/// The session owns the transport. A dedicated thread reads it into a
/// [`ByteFeed`]; every operation consumes from that feed. Operations are
/// strictly sequential, which `&mut self` enforces.
pub struct Session<T: ByteTransport> {
    transport: T,
    feed: ByteFeed,
    state: State,
    config: SessionConfig,
}

impl<T: ByteTransport> Session<T> {
    /// Start a session over `transport`. The remote mode starts unknown.
    pub fn open(transport: T, config: SessionConfig) -> Result<Self> {
        let reader = transport.try_clone_reader()?;
        let feed = ByteFeed::spawn(reader, config.feed_capacity)?;
        debug!("session opened");
        Ok(Self {
            transport,
            feed,
            state: State::At(Mode::Unknown),
            config,
        })
    }

    /// Last known mode of the interpreter.
    pub fn mode(&self) -> Mode {
        self.state.mode()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Evaluate `code` in raw mode and return what it printed.
    ///
    /// Waits for the acknowledgement within `ack_timeout`, then as long as
    /// the code runs. An exception raised by the code is returned as
    /// [`SessionError::Remote`] with the interpreter's own text; the session
    /// stays in raw mode.
    pub fn eval(&mut self, code: &str) -> Result<Vec<u8>> {
        self.submit(code)?;

        let payload = self.feed.read_until(COMPLETION, Duration::ZERO)?;
        self.apply(Event::CompletionSeen);

        // Raw mode reports `stdout EOT stderr` before the completion marker.
        // Stdout may itself contain EOT bytes; the separator is the last one.
        let (stdout, stderr) = match payload.iter().rposition(|&b| b == EOT) {
            Some(split) => (&payload[..split], &payload[split + 1..]),
            None => (&payload[..], &[][..]),
        };
        if !stderr.is_empty() {
            debug!(error = %String::from_utf8_lossy(stderr).trim_end(), "remote error");
        }
        remote_outcome(stdout.to_vec(), stderr)
    }

    /// Evaluate `script` from a clean interpreter state.
    pub fn run(&mut self, script: &str) -> Result<Vec<u8>> {
        self.reset()?;
        self.eval(script)
    }

    /// Soft-reboot the interpreter and wait for its prompt again.
    pub fn reset(&mut self) -> Result<()> {
        self.acquire(Goal::Interactive)?;
        self.send(&[EOT])?;
        self.apply(Event::Reset);
        self.acquire(Goal::Interactive)
    }

    /// Reboot the board.
    ///
    /// Returns once the reboot command has been accepted; the mode becomes
    /// unknown and the next operation probes for the interpreter again.
    pub fn hard_reset(&mut self) -> Result<()> {
        let submitted = self.submit(REBOOT_SCRIPT);
        if self.mode() != Mode::Detached {
            self.apply(Event::Reset);
        }
        submitted
    }

    /// Leave raw mode if needed and release the transport.
    pub fn close(&mut self) -> Result<()> {
        if self.mode() == Mode::Detached {
            return Ok(());
        }
        if self.mode() == Mode::RawEval {
            if let Err(err) = self.send(&[RAW_EXIT]) {
                debug!(%err, "could not leave raw mode before closing");
            }
        }
        self.apply(Event::Closed);
        let closed = self.transport.close();
        if !self.feed.shutdown(READER_EXIT_WAIT) {
            warn!("device reader did not stop after close");
        }
        closed?;
        Ok(())
    }

    fn submit(&mut self, code: &str) -> Result<()> {
        self.acquire(Goal::RawEval)?;
        self.send(code.as_bytes())?;
        self.send(&[EOT])?;

        let ack_timeout = self.config.ack_timeout;
        match self.feed.read_until(ACK, ack_timeout) {
            Ok(_) => {}
            Err(FeedError::Timeout(after)) => {
                warn!(?after, "code was not acknowledged");
                return Err(SessionError::ProtocolTimeout {
                    waiting_for: "acknowledgement",
                    after,
                });
            }
            Err(err) => return Err(err.into()),
        }
        self.apply(Event::AckSeen);
        Ok(())
    }

    /// Drive the mode machine until `goal` is reached or the ladder gives up.
    fn acquire(&mut self, goal: Goal) -> Result<()> {
        let mut state = self.state;
        let (mut next, mut action) = step(state, Event::Want(goal), &self.config);

        loop {
            state = next;
            let (marker, timeout) = match action {
                Action::Done => break,
                Action::Refuse => return Err(SessionError::Detached),
                Action::GiveUp { waiting_for, after } => {
                    self.commit(state);
                    warn!(?after, waiting_for = waiting_for.describe(), "interpreter did not respond");
                    return Err(SessionError::ProtocolTimeout {
                        waiting_for: waiting_for.describe(),
                        after,
                    });
                }
                Action::Probe { marker, timeout } => {
                    debug!(?timeout, "probing for prompt");
                    (marker, timeout)
                }
                Action::Send {
                    byte,
                    marker,
                    timeout,
                } => {
                    debug!(byte, ?timeout, "sending control byte");
                    self.send(&[byte])?;
                    (marker, timeout)
                }
            };

            let event = match self.feed.read_until(marker.bytes(), timeout) {
                Ok(_) => Event::MarkerSeen,
                Err(FeedError::Timeout(_)) => Event::Timeout,
                Err(err) => return Err(err.into()),
            };
            (next, action) = step(state, event, &self.config);
        }

        self.commit(state);
        Ok(())
    }

    fn apply(&mut self, event: Event) {
        let (next, _) = step(self.state, event, &self.config);
        self.commit(next);
    }

    fn commit(&mut self, next: State) {
        if next.mode() != self.state.mode() {
            debug!(from = %self.state.mode(), to = %next.mode(), "mode changed");
        }
        self.state = next;
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        trace!(data = ?String::from_utf8_lossy(bytes), "to device");
        self.transport.write_all(bytes)?;
        self.transport.flush()?;
        Ok(())
    }
}

impl<T: ByteTransport> Drop for Session<T> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(%err, "error while closing session");
        }
    }
}

impl<T: ByteTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode())
            .field("reader_running", &self.feed.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::{Arc, Mutex};
    use std::thread::{self, JoinHandle};

    use super::*;
    use crate::control::{INTERRUPT, RAW_ENTER};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Board {
        /// Ignores everything but a raw-mode exit, which prints the banner.
        Stuck,
        /// Ignores everything.
        Dead,
        Interactive,
        Raw,
    }

    #[derive(Debug, Default)]
    struct Seen {
        controls: Vec<u8>,
        soft_reboots: usize,
        scripts: Vec<String>,
    }

    /// A simulated board speaking the REPL protocol on one end of a socket pair.
    fn simulate(start: Board, mut wire: UnixStream) -> (Arc<Mutex<Seen>>, JoinHandle<()>) {
        let seen = Arc::new(Mutex::new(Seen::default()));
        let log = Arc::clone(&seen);
        let handle = thread::spawn(move || {
            let mut board = start;
            let mut code = Vec::new();
            if board == Board::Interactive {
                wire.write_all(b"MicroPython v1.22.0\r\n>>> ").unwrap();
            }
            let mut byte = [0u8; 1];
            while let Ok(1) = wire.read(&mut byte) {
                let b = byte[0];
                if b <= EOT {
                    log.lock().unwrap().controls.push(b);
                }
                let reply: Vec<u8> = match (board, b) {
                    (Board::Dead, _) => Vec::new(),
                    (Board::Stuck, RAW_EXIT) => {
                        board = Board::Interactive;
                        b"\r\nMicroPython v1.22.0\r\n>>> ".to_vec()
                    }
                    (Board::Stuck, _) => Vec::new(),
                    (Board::Interactive, RAW_ENTER) => {
                        board = Board::Raw;
                        b"raw REPL; CTRL-B to exit\r\n>".to_vec()
                    }
                    (Board::Interactive, EOT) => {
                        log.lock().unwrap().soft_reboots += 1;
                        b"MPY: soft reboot\r\n>>> ".to_vec()
                    }
                    (Board::Interactive, INTERRUPT | RAW_EXIT) => b"\r\n>>> ".to_vec(),
                    (Board::Interactive, other) => vec![other],
                    (Board::Raw, RAW_EXIT) => {
                        board = Board::Interactive;
                        b"\r\n>>> ".to_vec()
                    }
                    (Board::Raw, EOT) => {
                        let script = String::from_utf8(std::mem::take(&mut code)).unwrap();
                        log.lock().unwrap().scripts.push(script.clone());
                        let (reply, next) = execute(&script);
                        board = next;
                        reply
                    }
                    (Board::Raw, other) => {
                        code.push(other);
                        Vec::new()
                    }
                };
                if !reply.is_empty() && wire.write_all(&reply).is_err() {
                    break;
                }
            }
        });
        (seen, handle)
    }

    fn execute(script: &str) -> (Vec<u8>, Board) {
        let done = |stdout: &str, stderr: &str| {
            format!("OK{stdout}\x04{stderr}\x04>").into_bytes()
        };
        if script.contains("machine.reset()") {
            return (b"OK".to_vec(), Board::Stuck);
        }
        if script == "noack" {
            return (Vec::new(), Board::Raw);
        }
        let reply = match script {
            "1+2" => done("3", ""),
            r"print('a\x04b')" => done("a\x04b", ""),
            "print('a')\nraise ValueError('boom')" => done(
                "a\r\n",
                "Traceback (most recent call last):\r\nValueError: boom\r\n",
            ),
            s if s.starts_with("raise") => done("", "ValueError: boom\r\n"),
            other => done(other, ""),
        };
        (reply, Board::Raw)
    }

    fn quick() -> SessionConfig {
        SessionConfig {
            probe_timeout: Duration::from_millis(5),
            interrupt_timeout: Duration::from_millis(30),
            raw_exit_timeout: Duration::from_millis(500),
            leave_raw_timeout: Duration::from_millis(250),
            raw_enter_timeout: Duration::from_millis(250),
            ack_timeout: Duration::from_millis(100),
            feed_capacity: 1024,
        }
    }

    fn session_with(board: Board) -> (Session<UnixStream>, Arc<Mutex<Seen>>, JoinHandle<()>) {
        let (host, device) = UnixStream::pair().unwrap();
        let (seen, handle) = simulate(board, device);
        (Session::open(host, quick()).unwrap(), seen, handle)
    }

    #[test]
    fn unknown_board_climbs_ladder_then_evaluates() {
        let (mut session, seen, _board) = session_with(Board::Stuck);
        assert_eq!(session.mode(), Mode::Unknown);

        let out = session.eval("1+2").unwrap();
        assert_eq!(out, b"3");
        assert_eq!(session.mode(), Mode::RawEval);
        assert_eq!(
            seen.lock().unwrap().controls,
            vec![INTERRUPT, RAW_EXIT, RAW_ENTER, EOT]
        );
    }

    #[test]
    fn idle_prompt_is_found_without_interrupting() {
        let (mut session, seen, _board) = session_with(Board::Interactive);
        // Give the banner time to land in the feed before the 5 ms probe.
        thread::sleep(Duration::from_millis(50));

        assert_eq!(session.eval("1+2").unwrap(), b"3");
        assert_eq!(seen.lock().unwrap().controls, vec![RAW_ENTER, EOT]);
    }

    #[test]
    fn consecutive_evals_stay_in_raw_mode() {
        let (mut session, seen, _board) = session_with(Board::Stuck);
        session.eval("1+2").unwrap();
        assert_eq!(session.eval("x = 5").unwrap(), b"x = 5");
        let controls = seen.lock().unwrap().controls.clone();
        assert_eq!(controls.iter().filter(|&&b| b == RAW_ENTER).count(), 1);
    }

    #[test]
    fn remote_error_carries_interpreter_text() {
        let (mut session, _seen, _board) = session_with(Board::Stuck);
        match session.eval("raise ValueError('boom')") {
            Err(SessionError::Remote(text)) => assert_eq!(text, "ValueError: boom\r\n"),
            other => panic!("expected remote error, got {other:?}"),
        }
        assert_eq!(session.mode(), Mode::RawEval);
        assert_eq!(session.eval("1+2").unwrap(), b"3");
    }

    #[test]
    fn output_before_exception_is_kept_with_the_error() {
        let (mut session, _seen, _board) = session_with(Board::Stuck);
        let err = session
            .eval("print('a')\nraise ValueError('boom')")
            .unwrap_err();
        assert_eq!(err.partial_output(), Some(&b"a\r\n"[..]));
        assert!(matches!(
            err,
            SessionError::RemoteAfterOutput { ref message, .. } if message.contains("ValueError: boom")
        ));
        assert_eq!(session.mode(), Mode::RawEval);
    }

    #[test]
    fn eot_in_program_output_is_not_an_error() {
        let (mut session, _seen, _board) = session_with(Board::Stuck);
        assert_eq!(session.eval(r"print('a\x04b')").unwrap(), b"a\x04b");
        assert_eq!(session.eval("1+2").unwrap(), b"3");
    }

    #[test]
    fn silent_board_times_out_and_stays_unknown() {
        let (host, device) = UnixStream::pair().unwrap();
        let (seen, _board) = simulate(Board::Dead, device);
        let config = SessionConfig {
            raw_exit_timeout: Duration::from_millis(60),
            ..quick()
        };
        let mut session = Session::open(host, config).unwrap();

        let err = session.eval("1+2").unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolTimeout {
                waiting_for: "interactive prompt",
                after,
            } if after == Duration::from_millis(60)
        ));
        assert_eq!(session.mode(), Mode::Unknown);
        assert_eq!(seen.lock().unwrap().controls, vec![INTERRUPT, RAW_EXIT]);
    }

    #[test]
    fn missing_acknowledgement_times_out() {
        let (mut session, _seen, _board) = session_with(Board::Stuck);
        let err = session.eval("noack").unwrap_err();
        assert!(matches!(
            err,
            SessionError::ProtocolTimeout {
                waiting_for: "acknowledgement",
                ..
            }
        ));
        assert!(err.is_timeout());
    }

    #[test]
    fn run_soft_reboots_first() {
        let (mut session, seen, _board) = session_with(Board::Stuck);
        session.eval("x = 1").unwrap();

        assert_eq!(session.run("1+2").unwrap(), b"3");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.soft_reboots, 1);
        assert_eq!(seen.scripts, vec!["x = 1", "1+2"]);
    }

    #[test]
    fn hard_reset_leaves_mode_unknown() {
        let (mut session, seen, _board) = session_with(Board::Stuck);
        session.eval("1+2").unwrap();

        session.hard_reset().unwrap();
        assert_eq!(session.mode(), Mode::Unknown);
        assert!(seen.lock().unwrap().scripts[1].contains("machine.reset()"));

        // The rebooted board is found again through the ladder.
        assert_eq!(session.eval("1+2").unwrap(), b"3");
    }

    #[test]
    fn close_leaves_raw_mode_and_detaches() {
        let (mut session, seen, board) = session_with(Board::Stuck);
        session.eval("1+2").unwrap();

        session.close().unwrap();
        assert_eq!(session.mode(), Mode::Detached);
        assert!(matches!(session.eval("1+2"), Err(SessionError::Detached)));
        assert!(session.close().is_ok());

        board.join().unwrap();
        assert_eq!(seen.lock().unwrap().controls.last(), Some(&RAW_EXIT));
    }

    #[test]
    fn dropping_session_releases_board() {
        let (mut session, seen, board) = session_with(Board::Stuck);
        session.eval("1+2").unwrap();
        drop(session);

        board.join().unwrap();
        assert_eq!(seen.lock().unwrap().controls.last(), Some(&RAW_EXIT));
    }

    #[test]
    fn close_stops_reader_thread() {
        let (mut session, _seen, board) = session_with(Board::Stuck);
        session.eval("1+2").unwrap();
        assert!(session.feed.is_running());

        session.close().unwrap();
        assert!(!session.feed.is_running());
        board.join().unwrap();
    }

    /// Open a pseudo-terminal; returns the master and the slave's path.
    #[cfg(target_os = "linux")]
    fn open_pty() -> (std::fs::File, std::path::PathBuf) {
        use std::os::fd::FromRawFd;

        // SAFETY: plain pty setup calls; every return value is checked and the
        // name buffer outlives the CStr read from it.
        unsafe {
            let master = libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY);
            assert!(master >= 0, "posix_openpt failed");
            assert_eq!(libc::grantpt(master), 0);
            assert_eq!(libc::unlockpt(master), 0);
            let mut name = [0 as libc::c_char; 128];
            assert_eq!(libc::ptsname_r(master, name.as_mut_ptr(), name.len()), 0);
            let path = std::ffi::CStr::from_ptr(name.as_ptr())
                .to_string_lossy()
                .into_owned();
            (std::fs::File::from_raw_fd(master), path.into())
        }
    }

    #[cfg(target_os = "linux")]
    fn descriptors_for(path: &std::path::Path) -> usize {
        std::fs::read_dir("/proc/self/fd")
            .unwrap()
            .filter_map(|entry| std::fs::read_link(entry.ok()?.path()).ok())
            .filter(|target| target.as_path() == path)
            .count()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn close_releases_serial_device() {
        let (_master, slave) = open_pty();
        let line = replmux_transport::SerialPort::open(&slave, 115_200).unwrap();
        let mut session = Session::open(line, quick()).unwrap();
        assert_eq!(descriptors_for(&slave), 2);

        session.close().unwrap();
        assert_eq!(descriptors_for(&slave), 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropping_session_releases_serial_device() {
        let (_master, slave) = open_pty();
        let line = replmux_transport::SerialPort::open(&slave, 115_200).unwrap();
        drop(Session::open(line, quick()).unwrap());
        assert_eq!(descriptors_for(&slave), 0);
    }

    #[test]
    fn closed_device_is_reported() {
        let (host, device) = UnixStream::pair().unwrap();
        drop(device);
        let mut session = Session::open(host, quick()).unwrap();
        thread::sleep(Duration::from_millis(20));

        let err = session.eval("1+2").unwrap_err();
        assert!(matches!(err, SessionError::FeedClosed));
        assert!(matches!(session.eval("1+2"), Err(SessionError::FeedClosed)));
    }
}
