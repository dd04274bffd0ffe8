use std::time::Duration;

/// Timing bounds for a [`crate::Session`].
///
/// The ladder timeouts grow with how intrusive the step is: a passive probe
/// for a prompt already sitting in the input, an interrupt, then a raw-mode
/// exit which may also reboot the interpreter.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Passive wait for a prompt already in the input. Default: 1 ms.
    pub probe_timeout: Duration,
    /// Wait for a prompt after an interrupt. Default: 1.5 s.
    pub interrupt_timeout: Duration,
    /// Wait for a prompt after a raw-mode exit from an unknown state. Default: 5 s.
    pub raw_exit_timeout: Duration,
    /// Wait for a prompt when leaving a known raw mode. Default: 250 ms.
    pub leave_raw_timeout: Duration,
    /// Wait for the raw prompt after requesting raw mode. Default: 100 ms.
    pub raw_enter_timeout: Duration,
    /// Wait for the acknowledgement of submitted code. Zero waits forever.
    /// Default: 5 s.
    pub ack_timeout: Duration,
    /// Bytes buffered between the reader thread and the session. Default: 4096.
    pub feed_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1),
            interrupt_timeout: Duration::from_millis(1500),
            raw_exit_timeout: Duration::from_secs(5),
            leave_raw_timeout: Duration::from_millis(250),
            raw_enter_timeout: Duration::from_millis(100),
            ack_timeout: Duration::from_secs(5),
            feed_capacity: 4096,
        }
    }
}
