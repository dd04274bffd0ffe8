use std::io::Read;

use replmux_frame::{Demultiplexer, Frame, FrameError, Scanner, IO, LOG};
use replmux_transport::ByteStream;
use tracing::{debug, warn};

use crate::cmd::DemuxArgs;
use crate::exit::{frame_error, transport_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: DemuxArgs, format: OutputFormat) -> CliResult<i32> {
    let source = open_source(&args)?;

    // Raw output routes bodies to stdout/stderr; other formats describe each frame.
    let frames = if format == OutputFormat::Raw {
        let mut demux = Demultiplexer::new(source)
            .with_sink(IO, std::io::stdout())
            .with_sink(LOG, std::io::stderr());
        drive(&args, || demux.process())?
    } else {
        let mut scanner = Scanner::new(source);
        drive(&args, || {
            let frame = scanner.next_frame()?;
            print_frame(&frame, format);
            Ok(frame)
        })?
    };

    debug!(frames, "demux finished");
    Ok(SUCCESS)
}

fn open_source(args: &DemuxArgs) -> CliResult<Box<dyn Read + Send>> {
    match &args.device {
        Some(target) => {
            let stream = ByteStream::open(target, args.baud)
                .map_err(|err| transport_error(&format!("failed to open {target}"), err))?;
            Ok(Box::new(stream))
        }
        None => Ok(Box::new(std::io::stdin())),
    }
}

fn drive(
    args: &DemuxArgs,
    mut next: impl FnMut() -> replmux_frame::Result<Frame>,
) -> CliResult<usize> {
    let mut frames = 0usize;
    while args.count.is_none_or(|limit| frames < limit) {
        match next() {
            Ok(_) => frames += 1,
            Err(FrameError::EndOfStream { consumed }) => {
                if consumed > 0 {
                    warn!(consumed, "input ended with unframed or partial data");
                }
                break;
            }
            Err(
                err @ (FrameError::UnroutableChannel { .. }
                | FrameError::Framing { .. }
                | FrameError::BodyTooLarge { .. }),
            ) if !args.strict => {
                warn!(%err, "skipping frame");
            }
            Err(err) => return Err(frame_error("demux failed", err)),
        }
    }
    Ok(frames)
}
