use std::io::{BufRead, Read};

use replmux_frame::Multiplexer;
use tracing::debug;

use crate::cmd::MuxArgs;
use crate::exit::{frame_error, io_error, CliResult, SUCCESS};

pub fn run(args: MuxArgs) -> CliResult<i32> {
    let mux = Multiplexer::new(std::io::stdout());
    let channel = mux
        .channel(&args.channel)
        .map_err(|err| frame_error("invalid channel", err))?;

    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut frames = 0usize;

    if args.whole {
        let mut body = Vec::new();
        input
            .read_to_end(&mut body)
            .map_err(|err| io_error("failed reading stdin", err))?;
        channel
            .send(&body)
            .map_err(|err| frame_error("write failed", err))?;
        frames += 1;
    } else {
        let mut line = Vec::new();
        loop {
            line.clear();
            let n = input
                .read_until(b'\n', &mut line)
                .map_err(|err| io_error("failed reading stdin", err))?;
            if n == 0 {
                break;
            }
            channel
                .send(&line)
                .map_err(|err| frame_error("write failed", err))?;
            frames += 1;
        }
    }

    mux.flush().map_err(|err| frame_error("flush failed", err))?;
    debug!(frames, channel = channel.name(), "mux finished");
    Ok(SUCCESS)
}
