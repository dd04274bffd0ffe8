//! Channel names.
//!
//! Channels are identified by name on the wire. Any name is allowed except
//! one containing `>`, which terminates the header.

use crate::error::{FrameError, Result};

/// Interpreter output.
pub const IO: &str = "IO";

/// Log lines from the device.
pub const LOG: &str = "LOG";

/// Byte that terminates the channel field of a frame header.
pub const CHANNEL_TERMINATOR: char = '>';

/// Returns an error if `name` cannot be carried in a frame header.
pub fn validate_channel(name: &str) -> Result<()> {
    if name.contains(CHANNEL_TERMINATOR) {
        return Err(FrameError::InvalidChannel(name.to_string()));
    }
    Ok(())
}

/// Returns true if `name` can be carried in a frame header.
pub fn is_valid_channel(name: &str) -> bool {
    !name.contains(CHANNEL_TERMINATOR)
}
