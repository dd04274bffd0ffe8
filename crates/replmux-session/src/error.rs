use std::time::Duration;

/// Errors that can occur while driving an interpreter.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A bounded wait elapsed before the expected marker arrived.
    #[error("timed out after {after:?} waiting for {waiting_for}")]
    ProtocolTimeout {
        waiting_for: &'static str,
        after: Duration,
    },

    /// The interpreter reported an exception; carries its own error text.
    #[error("remote error: {0}")]
    Remote(String),

    /// The interpreter printed output and then reported an exception.
    #[error("remote error after {} bytes of output: {message}", .output.len())]
    RemoteAfterOutput { output: Vec<u8>, message: String },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] replmux_transport::TransportError),

    /// The device stream ended.
    #[error("device stream closed")]
    FeedClosed,

    /// Reading from or writing to the device failed.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session was closed.
    #[error("session is closed")]
    Detached,

    /// The interpreter does not support this operation.
    #[error("{0} is not supported by this interpreter")]
    Unsupported(&'static str),

    /// A local interpreter process exited unsuccessfully.
    #[error("{command} failed: {status}")]
    ProcessFailed { command: String, status: String },

    /// Interpreter output did not have the expected shape.
    #[error("unexpected interpreter output: {0}")]
    UnexpectedOutput(String),
}

impl SessionError {
    /// True for [`SessionError::ProtocolTimeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ProtocolTimeout { .. })
    }

    /// Output printed before a remote error, if any.
    pub fn partial_output(&self) -> Option<&[u8]> {
        match self {
            Self::RemoteAfterOutput { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Combine what an interpreter wrote to stdout and stderr into one outcome.
///
/// Empty stderr means success. Otherwise the stderr text is the error, and
/// any stdout printed before it travels along.
pub(crate) fn remote_outcome(stdout: Vec<u8>, stderr: &[u8]) -> Result<Vec<u8>> {
    if stderr.is_empty() {
        return Ok(stdout);
    }
    let message = String::from_utf8_lossy(stderr).into_owned();
    if stdout.is_empty() {
        Err(SessionError::Remote(message))
    } else {
        Err(SessionError::RemoteAfterOutput {
            output: stdout,
            message,
        })
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
