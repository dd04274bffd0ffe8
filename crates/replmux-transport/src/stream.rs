use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use tracing::debug;

use crate::error::{Result, TransportError};

/// A duplex byte stream a REPL session or a frame multiplexer can run over.
///
/// Besides plain `Read + Write`, a transport must be able to hand out an
/// independent read handle (consumed by a dedicated reader thread) and to
/// close itself so that reader observes end-of-stream where the platform
/// allows it.
pub trait ByteTransport: Read + Write + Send + 'static {
    /// Create a second handle used only for reading.
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>>;

    /// Release the transport. Further writes fail with `NotConnected`.
    fn close(&mut self) -> Result<()>;
}

/// A connected byte stream over one of the supported links.
pub struct ByteStream {
    inner: ByteStreamInner,
}

enum ByteStreamInner {
    #[cfg(unix)]
    Serial(crate::serial::SerialLine),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Tcp(TcpStream),
    Closed,
}

impl ByteStream {
    /// Open a transport from a parsed [`crate::Target`].
    pub fn open(target: &crate::Target, baud: u32) -> Result<Self> {
        match target {
            #[cfg(unix)]
            crate::Target::Serial(path) => crate::SerialPort::open(path, baud),
            #[cfg(unix)]
            crate::Target::Unix(path) => crate::UnixDomainSocket::connect(path),
            crate::Target::Tcp(addr) => Self::connect_tcp(addr),
            #[cfg(not(unix))]
            other => Err(TransportError::InvalidTarget(other.to_string())),
        }
    }

    /// Connect to a REPL exposed over TCP.
    pub fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            target: addr.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        debug!(addr, "connected over tcp");
        Ok(Self::from_tcp(stream))
    }

    #[cfg(unix)]
    pub(crate) fn from_serial(line: crate::serial::SerialLine) -> Self {
        Self {
            inner: ByteStreamInner::Serial(line),
        }
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: ByteStreamInner::Unix(stream),
        }
    }

    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: ByteStreamInner::Tcp(stream),
        }
    }

    /// Whether [`ByteTransport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner, ByteStreamInner::Closed)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            ByteStreamInner::Serial(_) => "serial",
            #[cfg(unix)]
            ByteStreamInner::Unix(_) => "unix-domain-socket",
            ByteStreamInner::Tcp(_) => "tcp",
            ByteStreamInner::Closed => "closed",
        }
    }
}

fn not_connected() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "transport closed")
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            ByteStreamInner::Serial(line) => line.read(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.read(buf),
            ByteStreamInner::Tcp(stream) => stream.read(buf),
            ByteStreamInner::Closed => Err(not_connected()),
        }
    }
}

impl Write for ByteStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            ByteStreamInner::Serial(line) => line.write(buf),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.write(buf),
            ByteStreamInner::Tcp(stream) => stream.write(buf),
            ByteStreamInner::Closed => Err(not_connected()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            ByteStreamInner::Serial(line) => line.flush(),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => stream.flush(),
            ByteStreamInner::Tcp(stream) => stream.flush(),
            ByteStreamInner::Closed => Err(not_connected()),
        }
    }
}

impl ByteTransport for ByteStream {
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        match &self.inner {
            #[cfg(unix)]
            ByteStreamInner::Serial(line) => Ok(Box::new(line.reader()?)),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => Ok(Box::new(stream.try_clone()?)),
            ByteStreamInner::Tcp(stream) => Ok(Box::new(stream.try_clone()?)),
            ByteStreamInner::Closed => Err(TransportError::Closed),
        }
    }

    fn close(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.inner, ByteStreamInner::Closed);
        match previous {
            // Dropping the line stops its readers within one poll interval.
            #[cfg(unix)]
            ByteStreamInner::Serial(line) => drop(line),
            #[cfg(unix)]
            ByteStreamInner::Unix(stream) => shutdown_quietly(stream.shutdown(Shutdown::Both)),
            ByteStreamInner::Tcp(stream) => shutdown_quietly(stream.shutdown(Shutdown::Both)),
            ByteStreamInner::Closed => return Ok(()),
        }
        debug!("transport closed");
        Ok(())
    }
}

fn shutdown_quietly(result: std::io::Result<()>) {
    // The peer may already be gone; the stream is released either way.
    if let Err(err) = result {
        if err.kind() != std::io::ErrorKind::NotConnected {
            debug!(%err, "shutdown reported an error");
        }
    }
}

#[cfg(unix)]
impl ByteTransport for std::os::unix::net::UnixStream {
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&mut self) -> Result<()> {
        shutdown_quietly(self.shutdown(Shutdown::Both));
        Ok(())
    }
}

impl ByteTransport for TcpStream {
    fn try_clone_reader(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn close(&mut self) -> Result<()> {
        shutdown_quietly(self.shutdown(Shutdown::Both));
        Ok(())
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
