//! Drive interpreters on embedded boards and multiplex channels over one link.
//!
//! replmux talks to MicroPython-style REPLs over a serial line (or a socket
//! bridge), recovering a usable prompt from whatever state the board is in,
//! and frames several logical channels onto a single byte stream.
//!
//! # Crate Structure
//!
//! - [`transport`]: Byte-stream transports (serial, Unix sockets, TCP)
//! - [`frame`]: `<MSG>` framing, multiplexer and demultiplexer
//! - [`session`]: Raw-REPL session state machine (behind `session` feature)

/// Re-export transport types.
pub mod transport {
    pub use replmux_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use replmux_frame::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use replmux_session::*;
}
