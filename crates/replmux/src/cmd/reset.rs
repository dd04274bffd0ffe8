use tracing::info;

use crate::cmd::ResetArgs;
use crate::exit::{session_error, CliResult, SUCCESS};

pub fn run(args: ResetArgs) -> CliResult<i32> {
    let mut session = args.device.open_session()?;

    if args.hard {
        session
            .hard_reset()
            .map_err(|err| session_error("hard reset failed", err))?;
        info!("reboot requested");
    } else {
        session
            .reset()
            .map_err(|err| session_error("reset failed", err))?;
        info!("interpreter reset");
    }

    session
        .close()
        .map_err(|err| session_error("close failed", err))?;
    Ok(SUCCESS)
}
