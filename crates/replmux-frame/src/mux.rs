use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use tracing::trace;

use crate::channel::validate_channel;
use crate::codec::encode_frame;
use crate::error::Result;
use crate::writer::write_encoded;

/// Serializes frames from many logical channels onto one writer.
///
/// Every frame is written while holding a single lock, so two frames never
/// interleave on the wire, whichever channels they come from. Frames are
/// written in the order their writers acquired the lock.
pub struct Multiplexer<W> {
    inner: Mutex<W>,
}

impl<W: Write> Multiplexer<W> {
    /// Wrap `writer`. The multiplexer becomes its only writer.
    pub fn new(writer: W) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(writer),
        })
    }

    /// A write handle for `name`. Fails if the name cannot be framed.
    pub fn channel(self: &Arc<Self>, name: &str) -> Result<ChannelWriter<W>> {
        validate_channel(name)?;
        Ok(ChannelWriter {
            name: name.to_string(),
            mux: Arc::clone(self),
        })
    }

    /// Write one frame on `channel`.
    pub fn write_on(&self, channel: &str, body: &[u8]) -> Result<()> {
        let mut wire = BytesMut::new();
        encode_frame(channel, body, &mut wire)?;

        // A writer that panicked mid-frame leaves nothing this lock protects
        // in an inconsistent state beyond the frame itself.
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        trace!(channel, bytes = wire.len(), "writing frame");
        write_encoded(&mut *guard, &wire)
    }

    /// Flush the underlying writer.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard.flush()?;
        Ok(())
    }

    /// Recover the writer once every [`ChannelWriter`] has been dropped.
    ///
    /// Returns the multiplexer back if handles are still alive.
    pub fn try_into_inner(this: Arc<Self>) -> std::result::Result<W, Arc<Self>> {
        Arc::try_unwrap(this).map(|mux| {
            mux.inner
                .into_inner()
                .unwrap_or_else(PoisonError::into_inner)
        })
    }
}

/// A lightweight write handle for one channel of a [`Multiplexer`].
///
/// Cheap to clone and safe to use from many threads at once.
pub struct ChannelWriter<W> {
    name: String,
    mux: Arc<Multiplexer<W>>,
}

impl<W> Clone for ChannelWriter<W> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            mux: Arc::clone(&self.mux),
        }
    }
}

impl<W: Write> ChannelWriter<W> {
    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `body` as one frame.
    pub fn send(&self, body: &[u8]) -> Result<()> {
        self.mux.write_on(&self.name, body)
    }
}

impl<W: Write> Write for ChannelWriter<W> {
    /// Frames the whole buffer; a successful call always reports `buf.len()`.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.send(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.mux.flush().map_err(Into::into)
    }
}

impl<W> std::fmt::Debug for Multiplexer<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer").finish_non_exhaustive()
    }
}

impl<W> std::fmt::Debug for ChannelWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelWriter")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Cursor;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;
    use crate::error::FrameError;
    use crate::reader::Scanner;

    #[test]
    fn two_handles_same_channel_write_sequentially() {
        let mux = Multiplexer::new(Vec::new());
        let mut a = mux.channel("IO").unwrap();
        let mut b = mux.channel("IO").unwrap();

        a.write_all(b"Test").unwrap();
        b.write_all(b"123").unwrap();
        drop((a, b));

        let out = Multiplexer::try_into_inner(mux).unwrap();
        assert_eq!(out, b"<MSG 4 IO>Test</MSG><MSG 3 IO>123</MSG>");
    }

    #[test]
    fn invalid_channel_handle_rejected() {
        let mux = Multiplexer::new(Vec::new());
        assert!(matches!(
            mux.channel("a>b"),
            Err(FrameError::InvalidChannel(_))
        ));
        assert!(mux.write_on("x>", b"body").is_err());
    }

    #[test]
    fn write_reports_full_length_for_escaped_body() {
        let mux = Multiplexer::new(Vec::new());
        let mut io = mux.channel("IO").unwrap();
        let n = io.write(b"<MSG inside").unwrap();
        assert_eq!(n, 11);
    }

    #[test]
    fn into_inner_fails_while_handles_live() {
        let mux = Multiplexer::new(Vec::new());
        let handle = mux.channel("IO").unwrap();
        let mux = Multiplexer::try_into_inner(mux).unwrap_err();
        drop(handle);
        assert!(Multiplexer::try_into_inner(mux).is_ok());
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        const WRITERS: usize = 8;
        const FRAMES: usize = 50;

        let (left, right) = UnixStream::pair().unwrap();
        let mux = Multiplexer::new(left);

        let reader = thread::spawn(move || {
            let mut scanner = Scanner::new(right);
            let mut frames = Vec::new();
            for _ in 0..WRITERS * FRAMES {
                frames.push(scanner.next_frame().unwrap());
            }
            frames
        });

        let mut writers = Vec::new();
        for w in 0..WRITERS {
            let handle = mux.channel(&format!("ch{w}")).unwrap();
            writers.push(thread::spawn(move || {
                for i in 0..FRAMES {
                    let body = format!("writer {w} frame {i} <MSG {}", "x".repeat(i * 7));
                    handle.send(body.as_bytes()).unwrap();
                }
            }));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let frames = reader.join().unwrap();
        assert_eq!(frames.len(), WRITERS * FRAMES);
        for w in 0..WRITERS {
            let bodies: Vec<String> = frames
                .iter()
                .filter(|f| f.channel == format!("ch{w}"))
                .map(|f| String::from_utf8(f.body.to_vec()).unwrap())
                .collect();
            let expected: Vec<String> = (0..FRAMES)
                .map(|i| format!("writer {w} frame {i} <MSG {}", "x".repeat(i * 7)))
                .collect();
            assert_eq!(bodies, expected);
        }
    }

    #[test]
    fn frames_scan_back_from_shared_buffer() {
        let mux = Multiplexer::new(Vec::new());
        mux.channel("IO").unwrap().send(b"out").unwrap();
        mux.channel("LOG").unwrap().send(b"log").unwrap();

        let wire = Multiplexer::try_into_inner(mux).unwrap();
        let mut scanner = Scanner::new(Cursor::new(wire));
        assert_eq!(scanner.next_frame().unwrap().channel, "IO");
        assert_eq!(scanner.next_frame().unwrap().channel, "LOG");
    }
}
