use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Where a board's REPL can be reached.
///
/// Parsed from a single string:
/// - `tcp:HOST:PORT` for a TCP bridge
/// - `unix:PATH` for a Unix domain socket
/// - anything else is treated as a serial device path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Serial(PathBuf),
    Unix(PathBuf),
    Tcp(String),
}

impl FromStr for Target {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TransportError::InvalidTarget(s.to_string()));
        }
        if let Some(addr) = s.strip_prefix("tcp:") {
            if !addr.contains(':') {
                return Err(TransportError::InvalidTarget(s.to_string()));
            }
            return Ok(Self::Tcp(addr.to_string()));
        }
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::InvalidTarget(s.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        Ok(Self::Serial(PathBuf::from(s)))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial(path) => write!(f, "{}", path.display()),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}
