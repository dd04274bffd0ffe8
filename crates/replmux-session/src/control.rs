//! Control bytes and markers of the interpreter's REPL protocol.

/// Ctrl-C: interrupt the running program.
pub const INTERRUPT: u8 = 0x03;
/// Ctrl-A: enter raw-eval mode.
pub const RAW_ENTER: u8 = 0x01;
/// Ctrl-B: leave raw-eval mode (or print the banner when interactive).
pub const RAW_EXIT: u8 = 0x02;
/// Ctrl-D: end of transmission. Submits code in raw mode, soft-reboots
/// when interactive.
pub const EOT: u8 = 0x04;

/// Acknowledgement sent once raw mode has accepted a code buffer.
pub const ACK: &[u8] = b"OK";
/// Raw-mode prompt.
pub const RAW_PROMPT: &[u8] = b">";
/// Interactive prompt.
pub const PROMPT: &[u8] = b">>> ";
/// Marks the end of a raw-mode execution.
pub const COMPLETION: &[u8] = &[EOT, b'>'];

/// Reboots the board.
pub const REBOOT_SCRIPT: &str = "import machine\nmachine.reset()\n";
