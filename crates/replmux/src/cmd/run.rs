use replmux_session::{Interpreter, LocalInterpreter};

use crate::cmd::RunArgs;
use crate::exit::{io_error, session_error, CliResult, SUCCESS};
use crate::output::{print_output, print_partial, OutputFormat};

pub fn run(args: RunArgs, format: OutputFormat) -> CliResult<i32> {
    let script = std::fs::read_to_string(&args.script)
        .map_err(|err| io_error(&format!("failed reading {}", args.script.display()), err))?;

    let (output, mode) = match &args.local {
        Some(command) => {
            let mut interpreter = LocalInterpreter::new(command.as_str());
            if let Some(dir) = args.script.parent().filter(|d| !d.as_os_str().is_empty()) {
                interpreter = interpreter.current_dir(dir);
            }
            (execute(&mut interpreter, &script)?, "local".to_string())
        }
        None => {
            let mut session = args.device.open_session()?;
            let output = execute(&mut session, &script)?;
            (output, session.mode().to_string())
        }
    };

    print_output(&output, &mode, format);
    Ok(SUCCESS)
}

fn execute(interpreter: &mut dyn Interpreter, script: &str) -> CliResult<Vec<u8>> {
    let output = interpreter.run(script).map_err(|err| {
        print_partial(&err);
        session_error("run failed", err)
    })?;
    interpreter
        .close()
        .map_err(|err| session_error("close failed", err))?;
    Ok(output)
}
