use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use replmux_session::{Session, SessionConfig};
use replmux_transport::{ByteStream, Target};
use tracing::info;

use crate::exit::{session_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod demux;
pub mod eval;
pub mod info;
pub mod mux;
pub mod reset;
pub mod run;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Evaluate code in the board's current interpreter state.
    Eval(EvalArgs),
    /// Run a script from a freshly reset interpreter.
    Run(RunArgs),
    /// Print the interpreter name and version.
    Info(InfoArgs),
    /// Soft-reset (or reboot) the board.
    Reset(ResetArgs),
    /// Frame standard input onto a channel.
    Mux(MuxArgs),
    /// Split a framed stream back into its channels.
    Demux(DemuxArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: Option<OutputFormat>) -> CliResult<i32> {
    match command {
        Command::Eval(args) => eval::run(args, format.unwrap_or(OutputFormat::Raw)),
        Command::Run(args) => run::run(args, format.unwrap_or(OutputFormat::Raw)),
        Command::Info(args) => info::run(
            args,
            format.unwrap_or_else(OutputFormat::default_for_stdout),
        ),
        Command::Reset(args) => reset::run(args),
        Command::Mux(args) => mux::run(args),
        Command::Demux(args) => demux::run(args, format.unwrap_or(OutputFormat::Raw)),
        Command::Version(args) => version::run(args, format.unwrap_or(OutputFormat::Pretty)),
    }
}

/// Where the board is and how to talk to it.
#[derive(Args, Debug, Clone)]
pub struct DeviceArgs {
    /// Serial device path, unix:PATH or tcp:HOST:PORT.
    #[arg(long, short = 'd', env = "REPLMUX_DEVICE")]
    pub device: Option<Target>,
    /// Serial line speed.
    #[arg(long, env = "REPLMUX_BAUD", default_value_t = replmux_transport::DEFAULT_BAUD)]
    pub baud: u32,
    /// Bound on waiting for code to be acknowledged (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub ack_timeout: Option<Duration>,
    /// Bound on waiting for a prompt after an interrupt.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interrupt_timeout: Option<Duration>,
    /// Bound on waiting for a prompt after leaving raw mode from an unknown state.
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub raw_exit_timeout: Option<Duration>,
}

impl DeviceArgs {
    pub fn target(&self) -> CliResult<&Target> {
        self.device.as_ref().ok_or_else(|| {
            CliError::new(USAGE, "no device given (use --device or REPLMUX_DEVICE)")
        })
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::default();
        if let Some(timeout) = self.ack_timeout {
            config.ack_timeout = timeout;
        }
        if let Some(timeout) = self.interrupt_timeout {
            config.interrupt_timeout = timeout;
        }
        if let Some(timeout) = self.raw_exit_timeout {
            config.raw_exit_timeout = timeout;
        }
        config
    }

    pub fn open_stream(&self) -> CliResult<ByteStream> {
        let target = self.target()?;
        let stream = ByteStream::open(target, self.baud)
            .map_err(|err| transport_error(&format!("failed to open {target}"), err))?;
        info!(%target, transport = stream.transport_name(), "device opened");
        Ok(stream)
    }

    pub fn open_session(&self) -> CliResult<Session<ByteStream>> {
        let stream = self.open_stream()?;
        Session::open(stream, self.session_config())
            .map_err(|err| session_error("failed to start session", err))
    }
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Code to evaluate.
    #[arg(long, short = 'c', conflicts_with = "file")]
    pub code: Option<String>,
    /// Read code from a file. Without --code or --file, code is read from stdin.
    #[arg(long, conflicts_with = "code")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Script to run.
    pub script: PathBuf,
    /// Run with a local interpreter executable instead of a board.
    #[arg(long, value_name = "COMMAND")]
    pub local: Option<String>,
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    #[command(flatten)]
    pub device: DeviceArgs,
    /// Reboot the board instead of a soft reset.
    #[arg(long)]
    pub hard: bool,
}

#[derive(Args, Debug)]
pub struct MuxArgs {
    /// Channel to frame input on.
    #[arg(long, short = 'c', default_value = replmux_frame::IO)]
    pub channel: String,
    /// Send all of stdin as a single frame instead of one frame per line.
    #[arg(long)]
    pub whole: bool,
}

#[derive(Args, Debug)]
pub struct DemuxArgs {
    /// Read frames from a device instead of stdin.
    #[arg(long, short = 'd', env = "REPLMUX_DEVICE")]
    pub device: Option<Target>,
    /// Serial line speed.
    #[arg(long, env = "REPLMUX_BAUD", default_value_t = replmux_transport::DEFAULT_BAUD)]
    pub baud: u32,
    /// Fail on frames for unknown channels and on malformed frames.
    #[arg(long)]
    pub strict: bool,
    /// Exit after N frames.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration value: {input}"))?;
    if value == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
