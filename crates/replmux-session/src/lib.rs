//! Drives the raw REPL of an interpreter running on an embedded device.
//!
//! The remote side starts in an unknown state: idle at its prompt, running a
//! program, or left in raw mode by a previous tool. [`Session`] finds a
//! prompt with an escalating ladder (look, interrupt, leave raw mode), then
//! submits code in raw mode and collects its output.

pub mod config;
pub mod control;
pub mod error;
pub mod feed;
pub mod info;
pub mod interpreter;
pub mod session;
pub mod state;

pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use feed::{ByteFeed, FeedError};
pub use info::{interpreter_info, InterpreterInfo, INFO_SCRIPT};
pub use interpreter::{Interpreter, LocalInterpreter};
pub use session::Session;
pub use state::{Goal, Mode};
