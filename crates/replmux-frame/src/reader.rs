use std::borrow::Cow;
use std::io::{ErrorKind, Read};

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use crate::codec::{Frame, FrameConfig, FrameParser};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Read exactly one frame from `reader`.
///
/// Bytes are pulled one at a time outside a body (and exactly the declared
/// length inside one), so nothing past the closing tag is consumed. Returns
/// the frame and the number of bytes consumed, noise before the frame
/// included. End of input before a full frame is
/// [`FrameError::EndOfStream`] carrying the same count.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(Frame, usize)> {
    read_frame_with_config(reader, &FrameConfig::default())
}

/// [`read_frame`] with explicit configuration.
pub fn read_frame_with_config<R: Read>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<(Frame, usize)> {
    let mut parser = FrameParser::new(config.max_body_size);
    let mut chunk = [0u8; READ_CHUNK_SIZE];
    let mut total = 0usize;

    loop {
        let want = parser.body_remaining().unwrap_or(1).min(READ_CHUNK_SIZE);
        let read = match reader.read(&mut chunk[..want]) {
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        };
        if read == 0 {
            return Err(FrameError::EndOfStream { consumed: total });
        }

        let (used, step) = parser.feed_slice(&chunk[..read]);
        total += used;
        if let Some(frame) = step? {
            return Ok((frame, total));
        }
    }
}

#[derive(Debug)]
enum Latched {
    EndOfStream { consumed: usize },
    Io { kind: ErrorKind, message: String },
}

impl Latched {
    fn to_error(&self) -> FrameError {
        match self {
            Latched::EndOfStream { consumed } => FrameError::EndOfStream {
                consumed: *consumed,
            },
            Latched::Io { kind, message } => {
                FrameError::Io(std::io::Error::new(*kind, message.clone()))
            }
        }
    }
}

/// Extracts frames from a long-lived byte stream.
///
/// Reads the source in chunks and resumes parsing where the previous read
/// left off, so a stream split at arbitrary boundaries yields the same frames
/// as one delivered in a single write. A framing error discards the bytes up
/// to the error point and is returned to the caller, who may keep scanning to
/// resynchronize. A failed or exhausted source is latched: every later call
/// reports the same terminal error.
pub struct Scanner<R> {
    inner: R,
    pending: BytesMut,
    parser: FrameParser,
    frame: Option<Frame>,
    last_err: Option<FrameError>,
    terminal: Option<Latched>,
}

impl<R: Read> Scanner<R> {
    /// Create a new scanner with default configuration.
    pub fn new(inner: R) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new scanner with explicit configuration.
    pub fn with_config(inner: R, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            parser: FrameParser::new(config.max_body_size),
            frame: None,
            last_err: None,
            terminal: None,
        }
    }

    /// Read the next complete frame (blocking).
    pub fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if !self.pending.is_empty() {
                let (used, step) = self.parser.feed_slice(&self.pending);
                self.pending.advance(used);
                match step {
                    Ok(Some(frame)) => return Ok(frame),
                    Ok(None) => {}
                    Err(err) => {
                        debug!(%err, "discarding malformed frame");
                        return Err(err);
                    }
                }
            }

            if let Some(latched) = &self.terminal {
                return Err(latched.to_error());
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    let consumed = self.parser.consumed();
                    if self.parser.in_frame() {
                        debug!(consumed, "stream ended inside a frame");
                    }
                    self.terminal = Some(Latched::EndOfStream { consumed });
                }
                Ok(n) => {
                    trace!(bytes = n, "scanner read");
                    self.pending.extend_from_slice(&chunk[..n]);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => {
                    self.terminal = Some(Latched::Io {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    return Err(FrameError::Io(err));
                }
            }
        }
    }

    /// Advance to the next frame. Returns false when scanning stopped; the
    /// reason is available from [`Scanner::err`].
    pub fn scan(&mut self) -> bool {
        match self.next_frame() {
            Ok(frame) => {
                self.frame = Some(frame);
                self.last_err = None;
                true
            }
            Err(err) => {
                self.frame = None;
                self.last_err = Some(err);
                false
            }
        }
    }

    /// The frame produced by the last successful [`Scanner::scan`].
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Channel of the current frame, or `""`.
    pub fn channel(&self) -> &str {
        self.frame.as_ref().map_or("", |f| f.channel.as_str())
    }

    /// Body of the current frame, or an empty slice.
    pub fn body(&self) -> &[u8] {
        self.frame.as_ref().map_or(&[][..], |f| &f.body[..])
    }

    /// Body of the current frame as text (lossy UTF-8).
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.body())
    }

    /// Why the last [`Scanner::scan`] returned false.
    pub fn err(&self) -> Option<&FrameError> {
        self.last_err.as_ref()
    }

    /// Whether the source has ended or failed.
    pub fn is_terminated(&self) -> bool {
        self.terminal.is_some()
    }

    /// Borrow the underlying source.
    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// Consume the scanner and return the source. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }
}
