use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use replmux_transport::ByteTransport;
use tracing::debug;

use crate::error::{remote_outcome, Result, SessionError};
use crate::session::Session;

/// Something that can execute interpreter code.
pub trait Interpreter {
    /// Run `script` from a clean interpreter state.
    fn run(&mut self, script: &str) -> Result<Vec<u8>>;

    /// Evaluate `code` in the current interpreter state.
    fn eval(&mut self, code: &str) -> Result<Vec<u8>>;

    /// Release the interpreter.
    fn close(&mut self) -> Result<()>;
}

impl<T: ByteTransport> Interpreter for Session<T> {
    fn run(&mut self, script: &str) -> Result<Vec<u8>> {
        Session::run(self, script)
    }

    fn eval(&mut self, code: &str) -> Result<Vec<u8>> {
        Session::eval(self, code)
    }

    fn close(&mut self) -> Result<()> {
        Session::close(self)
    }
}

/// An interpreter executable on this machine.
///
/// Every `run` starts a fresh process with the script on standard input, so
/// state never carries over and `eval` is not available.
#[derive(Debug, Clone)]
pub struct LocalInterpreter {
    command: String,
    args: Vec<String>,
    dir: Option<PathBuf>,
}

impl LocalInterpreter {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            dir: None,
        }
    }

    /// Extra arguments passed before the script is read from stdin.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Working directory of the interpreter process.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}

impl Interpreter for LocalInterpreter {
    fn run(&mut self, script: &str) -> Result<Vec<u8>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }

        debug!(command = %self.command, bytes = script.len(), "running local interpreter");
        let mut child = cmd.spawn()?;

        // Feed stdin from its own thread so a chatty process cannot block us.
        let feeder = child.stdin.take().map(|mut stdin| {
            let script = script.as_bytes().to_vec();
            thread::spawn(move || match stdin.write_all(&script) {
                Err(err) if err.kind() != ErrorKind::BrokenPipe => Err(err),
                _ => Ok(()),
            })
        });

        let output = child.wait_with_output()?;
        if let Some(feeder) = feeder {
            if let Ok(Err(err)) = feeder.join() {
                return Err(SessionError::Io(err));
            }
        }

        if output.stderr.is_empty() && !output.status.success() {
            return Err(SessionError::ProcessFailed {
                command: self.command.clone(),
                status: output.status.to_string(),
            });
        }
        remote_outcome(output.stdout, &output.stderr)
    }

    fn eval(&mut self, _code: &str) -> Result<Vec<u8>> {
        Err(SessionError::Unsupported("eval"))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn runs_script_on_stdin() {
        let mut sh = LocalInterpreter::new("sh");
        assert_eq!(sh.run("echo hello\n").unwrap(), b"hello\n");
    }

    #[test]
    fn stderr_is_remote_error() {
        let mut sh = LocalInterpreter::new("sh");
        match sh.run("echo oops >&2\n") {
            Err(SessionError::Remote(text)) => assert_eq!(text, "oops\n"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn stdout_before_stderr_travels_with_the_error() {
        let mut sh = LocalInterpreter::new("sh");
        let err = sh.run("echo partial\necho oops >&2\nexit 1\n").unwrap_err();
        assert_eq!(err.partial_output(), Some(&b"partial\n"[..]));
        assert!(matches!(
            err,
            SessionError::RemoteAfterOutput { ref message, .. } if message == "oops\n"
        ));
    }

    #[test]
    fn failing_exit_status_is_reported() {
        let mut sh = LocalInterpreter::new("sh");
        assert!(matches!(
            sh.run("exit 3\n"),
            Err(SessionError::ProcessFailed { .. })
        ));
    }

    #[test]
    fn args_and_directory_are_applied() {
        let dir = std::env::temp_dir();
        let mut sh = LocalInterpreter::new("sh").args(["-s"]).current_dir(&dir);
        let out = sh.run("pwd\n").unwrap();
        let printed = PathBuf::from(String::from_utf8(out).unwrap().trim_end());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_executable_is_io_error() {
        let mut missing = LocalInterpreter::new("replmux-no-such-interpreter");
        assert!(matches!(missing.run("x"), Err(SessionError::Io(_))));
    }

    #[test]
    fn large_script_does_not_deadlock() {
        let mut cat = LocalInterpreter::new("cat");
        let script = "x".repeat(1 << 20);
        assert_eq!(cat.run(&script).unwrap().len(), script.len());
    }

    #[test]
    fn eval_is_unsupported() {
        let mut sh = LocalInterpreter::new("sh");
        assert!(matches!(sh.eval("1"), Err(SessionError::Unsupported("eval"))));
        assert!(sh.close().is_ok());
    }
}
