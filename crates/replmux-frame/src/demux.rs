use std::collections::HashMap;
use std::io::{Read, Write};

use tracing::{debug, warn};

use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::reader::Scanner;

/// Destination for the bodies of one channel.
pub type Sink = Box<dyn Write + Send>;

/// Splits one framed byte stream back into per-channel sinks.
pub struct Demultiplexer<R> {
    scanner: Scanner<R>,
    sinks: HashMap<String, Sink>,
}

impl<R: Read> Demultiplexer<R> {
    /// Create a demultiplexer with no sinks registered.
    pub fn new(reader: R) -> Self {
        Self::with_config(reader, FrameConfig::default())
    }

    /// Create a demultiplexer with explicit frame configuration.
    pub fn with_config(reader: R, config: FrameConfig) -> Self {
        Self {
            scanner: Scanner::with_config(reader, config),
            sinks: HashMap::new(),
        }
    }

    /// Builder form of [`Demultiplexer::add_sink`].
    pub fn with_sink(mut self, channel: &str, sink: impl Write + Send + 'static) -> Self {
        self.add_sink(channel, sink);
        self
    }

    /// Route `channel` to `sink`, returning the sink previously registered.
    pub fn add_sink(&mut self, channel: &str, sink: impl Write + Send + 'static) -> Option<Sink> {
        self.sinks.insert(channel.to_string(), Box::new(sink))
    }

    /// Stop routing `channel`.
    pub fn remove_sink(&mut self, channel: &str) -> Option<Sink> {
        self.sinks.remove(channel)
    }

    /// Registered channel names.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    /// Scan one frame and hand its body to the matching sink.
    ///
    /// A frame for an unregistered channel is consumed and reported as
    /// [`FrameError::UnroutableChannel`]; the demultiplexer stays usable.
    pub fn process(&mut self) -> Result<Frame> {
        let frame = self.scanner.next_frame()?;
        let Some(sink) = self.sinks.get_mut(&frame.channel) else {
            return Err(FrameError::UnroutableChannel {
                channel: frame.channel,
            });
        };
        sink.write_all(&frame.body)?;
        sink.flush()?;
        debug!(channel = %frame.channel, bytes = frame.body.len(), "routed frame");
        Ok(frame)
    }

    /// Process frames until the stream ends. End of stream is a clean
    /// finish; the number of routed frames is returned.
    pub fn process_all(&mut self) -> Result<usize> {
        let mut routed = 0usize;
        loop {
            match self.process() {
                Ok(_) => routed += 1,
                Err(FrameError::EndOfStream { consumed }) => {
                    if consumed > 0 {
                        warn!(consumed, "stream ended with unframed trailing bytes");
                    }
                    return Ok(routed);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Borrow the scanner (e.g. to inspect the last error).
    pub fn scanner(&self) -> &Scanner<R> {
        &self.scanner
    }
}
