//! `tokio-util` codec for `<MSG>` frames.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, Frame, FrameConfig, FrameParser, MIN_FRAME_SIZE};
use crate::error::FrameError;

/// Frame codec for use with `FramedRead`, `FramedWrite` and `Framed`.
///
/// Decoding shares [`FrameParser`] with the blocking reader, so framing
/// decisions do not depend on how the transport splits its reads.
#[derive(Debug)]
pub struct MsgCodec {
    parser: FrameParser,
}

impl MsgCodec {
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            parser: FrameParser::new(config.max_body_size),
        }
    }
}

impl Default for MsgCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MsgCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        // Nothing can complete below the shortest frame; wait for more input.
        if !self.parser.in_frame() && src.len() < MIN_FRAME_SIZE {
            return Ok(None);
        }
        self.drain(src)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if let Some(frame) = self.drain(src)? {
            return Ok(Some(frame));
        }
        if self.parser.in_frame() {
            return Err(FrameError::EndOfStream {
                consumed: self.parser.consumed(),
            });
        }
        Ok(None)
    }
}

impl MsgCodec {
    fn drain(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let (used, step) = self.parser.feed_slice(src);
        src.advance(used);
        step
    }
}

impl Encoder<Frame> for MsgCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame(&item.channel, &item.body, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn decodes_frames_from_reader() {
        let wire: &[u8] = b"boot noise<MSG 3 X>abc</MSG><MSG 5 Y>DEFGH</MSG>";
        let mut frames = FramedRead::new(wire, MsgCodec::new());

        let first = frames.next().await.unwrap().unwrap();
        assert_eq!(first, Frame::new("X", &b"abc"[..]));
        let second = frames.next().await.unwrap().unwrap();
        assert_eq!(second, Frame::new("Y", &b"DEFGH"[..]));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn truncated_frame_at_eof_is_error() {
        let wire: &[u8] = b"<MSG 10 IO>short";
        let mut frames = FramedRead::new(wire, MsgCodec::new());
        let err = frames.next().await.unwrap().unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[tokio::test]
    async fn trailing_noise_at_eof_is_clean() {
        let wire: &[u8] = b"<MSG 1 IO>a</MSG>\r\n";
        let mut frames = FramedRead::new(wire, MsgCodec::new());
        assert_eq!(frames.next().await.unwrap().unwrap().body.as_ref(), b"a");
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn encodes_escaped_frames() {
        let mut sink = FramedWrite::new(Vec::new(), MsgCodec::new());
        sink.send(Frame::new("IO", &b"a<MSG b"[..])).await.unwrap();
        sink.send(Frame::new("LOG", &b""[..])).await.unwrap();
        assert_eq!(
            sink.get_ref().as_slice(),
            b"<MSG 8 IO>a\\<MSG b</MSG><MSG 0 LOG></MSG>"
        );
    }

    #[test]
    fn decode_waits_for_minimum_frame() {
        let mut codec = MsgCodec::new();
        let mut buf = BytesMut::from(&b"<MSG 0 "[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(b"IO></MSG>");
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.channel, "IO");
        assert!(frame.body.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn invalid_channel_rejected_on_encode() {
        let mut codec = MsgCodec::new();
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::new("a>b", &b"x"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidChannel(_)));
        assert!(dst.is_empty());
    }
}
