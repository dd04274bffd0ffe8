use std::fmt;
use std::io;

use replmux_frame::FrameError;
use replmux_session::SessionError;
use replmux_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const REMOTE_ERROR: i32 = 4;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Open { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::UnsupportedBaud(_)
        | TransportError::InvalidTarget(_)
        | TransportError::PathTooLong { .. } => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::InvalidChannel(_) => CliError::new(USAGE, format!("{context}: {err}")),
        FrameError::Framing { .. }
        | FrameError::BodyTooLarge { .. }
        | FrameError::UnroutableChannel { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::EndOfStream { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn session_error(context: &str, err: SessionError) -> CliError {
    match err {
        SessionError::Transport(err) => transport_error(context, err),
        SessionError::Io(err) => io_error(context, err),
        SessionError::ProtocolTimeout { .. } => CliError::new(TIMEOUT, format!("{context}: {err}")),
        // The interpreter's own traceback is the useful part; keep it verbatim.
        SessionError::Remote(text) | SessionError::RemoteAfterOutput { message: text, .. } => {
            CliError::new(REMOTE_ERROR, text.trim_end().to_string())
        }
        SessionError::FeedClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        SessionError::Unsupported(_) => CliError::new(USAGE, format!("{context}: {err}")),
        SessionError::ProcessFailed { .. } => CliError::new(FAILURE, format!("{context}: {err}")),
        SessionError::UnexpectedOutput(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        SessionError::Detached => CliError::new(INTERNAL, format!("{context}: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn session_errors_map_to_exit_codes() {
        let timeout = SessionError::ProtocolTimeout {
            waiting_for: "interactive prompt",
            after: Duration::from_secs(5),
        };
        assert_eq!(session_error("eval", timeout).code, TIMEOUT);

        let remote = session_error("eval", SessionError::Remote("ValueError: x\r\n".into()));
        assert_eq!(remote.code, REMOTE_ERROR);
        assert_eq!(remote.message, "ValueError: x");

        let after_output = session_error(
            "eval",
            SessionError::RemoteAfterOutput {
                output: b"partial".to_vec(),
                message: "Traceback\r\n".into(),
            },
        );
        assert_eq!(after_output.code, REMOTE_ERROR);
        assert_eq!(after_output.message, "Traceback");

        assert_eq!(
            session_error("eval", SessionError::FeedClosed).code,
            TRANSPORT_ERROR
        );
    }

    #[test]
    fn transport_errors_map_to_exit_codes() {
        let denied = TransportError::Open {
            path: "/dev/ttyACM0".into(),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(transport_error("open", denied).code, PERMISSION_DENIED);
        assert_eq!(
            transport_error("open", TransportError::UnsupportedBaud(12345)).code,
            USAGE
        );
    }

    #[test]
    fn frame_errors_map_to_exit_codes() {
        let framing = FrameError::Framing {
            reason: "missing closing tag",
            offset: 9,
        };
        assert_eq!(frame_error("demux", framing).code, DATA_INVALID);
        assert_eq!(
            frame_error("mux", FrameError::InvalidChannel("a>b".into())).code,
            USAGE
        );
    }
}
