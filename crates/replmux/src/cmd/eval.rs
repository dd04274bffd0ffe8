use std::io::Read;

use tracing::debug;

use crate::cmd::EvalArgs;
use crate::exit::{io_error, session_error, CliResult, SUCCESS};
use crate::output::{print_output, print_partial, OutputFormat};

pub fn run(args: EvalArgs, format: OutputFormat) -> CliResult<i32> {
    let code = resolve_code(&args)?;
    let mut session = args.device.open_session()?;

    debug!(bytes = code.len(), "evaluating");
    let output = session.eval(&code).map_err(|err| {
        print_partial(&err);
        session_error("eval failed", err)
    })?;
    print_output(&output, &session.mode().to_string(), format);

    session
        .close()
        .map_err(|err| session_error("close failed", err))?;
    Ok(SUCCESS)
}

fn resolve_code(args: &EvalArgs) -> CliResult<String> {
    if let Some(code) = &args.code {
        return Ok(code.clone());
    }
    if let Some(path) = &args.file {
        return std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    let mut code = String::new();
    std::io::stdin()
        .read_to_string(&mut code)
        .map_err(|err| io_error("failed reading stdin", err))?;
    Ok(code)
}
