//! Tagged message framing with channel multiplexing over one byte stream.
//!
//! Every message travels as:
//! ```text
//! <MSG {len} {channel}>{escaped body}</MSG>
//! ```
//! `len` is the decimal length of the escaped body. Any `<MSG ` inside a body
//! is sent as `\<MSG ` so it can never be mistaken for a frame start. Bytes
//! outside frames are skipped, which lets a reader join a stream that also
//! carries unframed output.

pub mod channel;
pub mod codec;
pub mod demux;
pub mod error;
pub mod mux;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use channel::{is_valid_channel, validate_channel, IO, LOG};
pub use codec::{
    encode_frame, escape, parse_frame, unescape, Frame, FrameConfig, FrameParser, ParseOutcome,
    DEFAULT_MAX_BODY, MIN_FRAME_SIZE,
};
pub use demux::{Demultiplexer, Sink};
pub use error::{FrameError, Result};
pub use mux::{ChannelWriter, Multiplexer};
pub use reader::{read_frame, read_frame_with_config, Scanner};
pub use writer::write_frame;

#[cfg(feature = "async")]
pub use async_codec::MsgCodec;
