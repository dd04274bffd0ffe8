use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::encode_frame;
use crate::error::{FrameError, Result};

/// Encode `body` as one frame on `channel` and write it to `writer`.
///
/// The frame is encoded into a single buffer before anything is written, so
/// an invalid channel never produces output. If the underlying write fails
/// part-way the error is returned immediately and the frame must be treated
/// as not sent; nothing is retried here.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, channel: &str, body: &[u8]) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_frame(channel, body, &mut buf)?;
    write_encoded(writer, &buf)
}

pub(crate) fn write_encoded<W: Write + ?Sized>(writer: &mut W, wire: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < wire.len() {
        match writer.write(&wire[offset..]) {
            Ok(0) => {
                return Err(FrameError::Io(std::io::Error::new(
                    ErrorKind::WriteZero,
                    "transport accepted no bytes mid-frame",
                )))
            }
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FrameError::Io(err)),
        }
    }
}
