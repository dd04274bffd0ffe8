use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::interpreter::Interpreter;

/// Prints the implementation name and its `major.minor.micro` version.
pub const INFO_SCRIPT: &str = "\
import sys
print(sys.implementation.name)
version = sys.implementation.version
if len(version) == 3:
    print('%d.%d.%d' % version)
else:
    print('%d.%d.%d' % (version.major, version.minor, version.micro))
";

/// Name and version reported by an interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpreterInfo {
    pub name: String,
    pub version: String,
}

/// Ask `interpreter` who it is.
pub fn interpreter_info<I: Interpreter + ?Sized>(interpreter: &mut I) -> Result<InterpreterInfo> {
    let output = interpreter.eval(INFO_SCRIPT)?;
    parse_info(&output)
}

fn parse_info(output: &[u8]) -> Result<InterpreterInfo> {
    let text = String::from_utf8_lossy(output);
    let mut lines = text.split('\n').map(|line| line.trim_matches(&['\r', '\n'][..]));
    match (lines.next(), lines.next()) {
        (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
            Ok(InterpreterInfo {
                name: name.to_string(),
                version: version.to_string(),
            })
        }
        _ => Err(SessionError::UnexpectedOutput(text.to_string())),
    }
}
