use bytes::{BufMut, Bytes, BytesMut};

use crate::channel::validate_channel;
use crate::error::{FrameError, Result};

/// Literal that opens every frame.
pub const OPEN_TAG: &[u8] = b"<MSG ";

/// Literal that closes every frame.
pub const CLOSE_TAG: &[u8] = b"</MSG>";

/// Prefix marking an open-tag sequence inside a body as data.
pub const ESCAPE: u8 = b'\\';

/// Wire form of an open-tag sequence occurring inside a body.
pub const ESCAPED_TAG: &[u8] = b"\\<MSG ";

/// Size of the shortest possible frame: `<MSG 0 ></MSG>`.
pub const MIN_FRAME_SIZE: usize = OPEN_TAG.len() + 3 + CLOSE_TAG.len();

/// Default maximum declared body size: 16 MiB.
pub const DEFAULT_MAX_BODY: usize = 16 * 1024 * 1024;

const MAX_LENGTH_DIGITS: usize = 20;
const MAX_CHANNEL_LEN: usize = 256;

/// A decoded message with its channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this message belongs to.
    pub channel: String,
    /// The message body, unescaped.
    pub body: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            body: body.into(),
        }
    }

    /// The number of bytes this frame occupies on the wire.
    pub fn wire_size(&self) -> usize {
        let escaped = escaped_len(&self.body);
        OPEN_TAG.len()
            + decimal_len(escaped)
            + 1
            + self.channel.len()
            + 1
            + escaped
            + CLOSE_TAG.len()
    }
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum declared (escaped) body length accepted while decoding. Default: 16 MiB.
    pub max_body_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY,
        }
    }
}

/// Escape every open-tag sequence in `body`.
pub fn escape(body: &[u8]) -> Vec<u8> {
    replace_all(body, OPEN_TAG, ESCAPED_TAG)
}

/// Reverse [`escape`].
pub fn unescape(wire_body: &[u8]) -> Vec<u8> {
    replace_all(wire_body, ESCAPED_TAG, OPEN_TAG)
}

fn replace_all(src: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        if src[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(src[i]);
            i += 1;
        }
    }
    out
}

fn escaped_len(body: &[u8]) -> usize {
    let occurrences = body
        .windows(OPEN_TAG.len())
        .filter(|w| *w == OPEN_TAG)
        .count();
    body.len() + occurrences
}

fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// <MSG {len} {channel}>{escaped body}</MSG>
/// ```
/// `len` is the decimal length of the body after escaping.
pub fn encode_frame(channel: &str, body: &[u8], dst: &mut BytesMut) -> Result<()> {
    validate_channel(channel)?;
    let escaped = escape(body);
    let len = escaped.len().to_string();

    dst.reserve(OPEN_TAG.len() + len.len() + channel.len() + escaped.len() + CLOSE_TAG.len() + 2);
    dst.put_slice(OPEN_TAG);
    dst.put_slice(len.as_bytes());
    dst.put_u8(b' ');
    dst.put_slice(channel.as_bytes());
    dst.put_u8(b'>');
    dst.put_slice(&escaped);
    dst.put_slice(CLOSE_TAG);
    Ok(())
}

/// Result of parsing a complete input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A frame was found; `consumed` includes any noise skipped before it.
    Complete { frame: Frame, consumed: usize },
    /// The input ended before a full frame; every byte was consumed.
    Incomplete { consumed: usize },
}

/// Parse the first frame in `src`.
///
/// Bytes before the first unescaped open tag are skipped and counted in
/// `consumed`, which lets callers resynchronize a stream that starts with
/// unrelated data.
pub fn parse_frame(src: &[u8], config: &FrameConfig) -> Result<ParseOutcome> {
    let mut parser = FrameParser::new(config.max_body_size);
    let (used, step) = parser.feed_slice(src);
    match step? {
        Some(frame) => Ok(ParseOutcome::Complete {
            frame,
            consumed: used,
        }),
        None => Ok(ParseOutcome::Incomplete { consumed: used }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open { cursor: usize },
    Length,
    Channel,
    Body { remaining: usize },
    Close { cursor: usize },
}

/// Incremental frame parser.
///
/// Bytes are fed in stream order; the parser never looks back beyond the
/// single byte needed to recognise an escaped open tag, so feeding a stream
/// in any split produces the same frames and the same error points.
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    prev: u8,
    field: Vec<u8>,
    length: usize,
    channel: String,
    body: BytesMut,
    consumed: usize,
    max_body: usize,
}

impl FrameParser {
    pub fn new(max_body: usize) -> Self {
        Self {
            state: State::Open { cursor: 0 },
            prev: b' ',
            field: Vec::new(),
            length: 0,
            channel: String::new(),
            body: BytesMut::new(),
            consumed: 0,
            max_body,
        }
    }

    /// Bytes consumed since the last completed frame or error, noise included.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether an open tag has been matched (fully or partially).
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, State::Open { cursor: 0 })
    }

    /// Remaining body bytes, when the parser is inside a body.
    pub fn body_remaining(&self) -> Option<usize> {
        match self.state {
            State::Body { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// Feed bytes until a frame completes, an error occurs, or `src` runs out.
    ///
    /// Returns how many bytes of `src` were used. On error the parser resets,
    /// discarding everything up to and including the offending byte.
    pub fn feed_slice(&mut self, src: &[u8]) -> (usize, Result<Option<Frame>>) {
        let mut used = 0;
        while used < src.len() {
            if let State::Body { remaining } = self.state {
                let take = remaining.min(src.len() - used);
                self.body.extend_from_slice(&src[used..used + take]);
                used += take;
                self.consumed += take;
                self.prev = src[used - 1];
                self.state = if take == remaining {
                    State::Close { cursor: 0 }
                } else {
                    State::Body {
                        remaining: remaining - take,
                    }
                };
                continue;
            }

            let byte = src[used];
            used += 1;
            match self.feed(byte) {
                Ok(None) => {}
                other => return (used, other),
            }
        }
        (used, Ok(None))
    }

    /// Feed a single byte.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>> {
        self.consumed += 1;
        let result = self.step(byte);
        self.prev = byte;
        match result {
            Ok(Some(frame)) => {
                self.reset();
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    fn step(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.state {
            State::Open { cursor } => {
                if cursor == 0 && self.prev == ESCAPE {
                    return Ok(None);
                }
                if byte != OPEN_TAG[cursor] {
                    let cursor = usize::from(byte == OPEN_TAG[0]);
                    self.state = State::Open { cursor };
                } else if cursor + 1 == OPEN_TAG.len() {
                    self.state = State::Length;
                } else {
                    self.state = State::Open { cursor: cursor + 1 };
                }
            }
            State::Length => {
                if byte != b' ' {
                    if self.field.len() >= MAX_LENGTH_DIGITS {
                        return Err(self.framing("length field too long"));
                    }
                    self.field.push(byte);
                    return Ok(None);
                }
                self.length = self.parse_length()?;
                self.field.clear();
                self.state = State::Channel;
            }
            State::Channel => {
                if byte != b'>' {
                    if self.field.len() >= MAX_CHANNEL_LEN {
                        return Err(self.framing("channel name too long"));
                    }
                    self.field.push(byte);
                    return Ok(None);
                }
                let field = std::mem::take(&mut self.field);
                self.channel = String::from_utf8(field)
                    .map_err(|_| self.framing("channel name is not valid UTF-8"))?;
                self.body.reserve(self.length);
                self.state = if self.length == 0 {
                    State::Close { cursor: 0 }
                } else {
                    State::Body {
                        remaining: self.length,
                    }
                };
            }
            State::Body { remaining } => {
                self.body.put_u8(byte);
                self.state = if remaining == 1 {
                    State::Close { cursor: 0 }
                } else {
                    State::Body {
                        remaining: remaining - 1,
                    }
                };
            }
            State::Close { cursor } => {
                if byte != CLOSE_TAG[cursor] {
                    return Err(self.framing("missing closing tag"));
                }
                if cursor + 1 < CLOSE_TAG.len() {
                    self.state = State::Close { cursor: cursor + 1 };
                    return Ok(None);
                }
                let wire_body = self.body.split().freeze();
                let body = if wire_body.windows(ESCAPED_TAG.len()).any(|w| w == ESCAPED_TAG) {
                    Bytes::from(unescape(&wire_body))
                } else {
                    wire_body
                };
                return Ok(Some(Frame {
                    channel: std::mem::take(&mut self.channel),
                    body,
                }));
            }
        }
        Ok(None)
    }

    fn parse_length(&self) -> Result<usize> {
        if self.field.is_empty() || !self.field.iter().all(u8::is_ascii_digit) {
            return Err(self.framing("length is not a decimal number"));
        }
        // All ASCII digits, so the field is valid UTF-8.
        let text = std::str::from_utf8(&self.field)
            .map_err(|_| self.framing("length is not a decimal number"))?;
        let length = text
            .parse::<usize>()
            .map_err(|_| self.framing("length out of range"))?;
        if length > self.max_body {
            return Err(FrameError::BodyTooLarge {
                size: length,
                max: self.max_body,
            });
        }
        Ok(length)
    }

    fn framing(&self, reason: &'static str) -> FrameError {
        FrameError::Framing {
            reason,
            offset: self.consumed,
        }
    }

    fn reset(&mut self) {
        self.state = State::Open { cursor: 0 };
        self.field.clear();
        self.length = 0;
        self.channel.clear();
        self.body.clear();
        self.consumed = 0;
    }
}
