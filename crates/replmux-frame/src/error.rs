/// Errors that can occur during frame encoding, decoding and routing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The channel name cannot be carried in a frame header.
    #[error("invalid channel name {0:?}: '>' is not allowed")]
    InvalidChannel(String),

    /// The stream contains a malformed frame.
    #[error("malformed frame at byte {offset}: {reason}")]
    Framing { reason: &'static str, offset: usize },

    /// The stream ended before a complete frame was read.
    #[error("end of stream after {consumed} bytes (no complete frame)")]
    EndOfStream { consumed: usize },

    /// A well-formed frame named a channel without a registered sink.
    #[error("no sink registered for channel {channel:?}")]
    UnroutableChannel { channel: String },

    /// The declared body length exceeds the configured maximum.
    #[error("frame body too large ({size} bytes, max {max})")]
    BodyTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True for [`FrameError::EndOfStream`].
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream { .. })
    }
}

impl From<FrameError> for std::io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io) => io,
            FrameError::EndOfStream { .. } => {
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, err)
            }
            FrameError::InvalidChannel(_) => {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
