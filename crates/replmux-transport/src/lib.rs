//! Byte-stream transports for talking to interpreters on remote devices.
//!
//! Provides a unified duplex stream over the links a board is usually
//! reachable through:
//! - Serial lines (tty devices, configured raw via termios)
//! - Unix domain sockets (device bridges and simulators)
//! - TCP (network-attached REPLs, e.g. telnet bridges)
//!
//! This is the lowest layer of replmux. Everything else builds on top of
//! the [`ByteTransport`] trait provided here.

pub mod error;
pub mod stream;
pub mod target;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
pub mod uds;

/// Line speed used when none is given.
pub const DEFAULT_BAUD: u32 = 115_200;

pub use error::{Result, TransportError};
pub use stream::{ByteStream, ByteTransport};
pub use target::Target;

#[cfg(unix)]
pub use serial::SerialPort;
#[cfg(unix)]
pub use uds::UnixDomainSocket;
