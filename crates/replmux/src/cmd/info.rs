use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use replmux_session::{interpreter_info, InterpreterInfo};
use serde::Serialize;

use crate::cmd::InfoArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_json, OutputFormat};

#[derive(Serialize)]
struct InfoOutput<'a> {
    device: String,
    #[serde(flatten)]
    interpreter: &'a InterpreterInfo,
}

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.device.target()?.to_string();
    let mut session = args.device.open_session()?;

    let info =
        interpreter_info(&mut session).map_err(|err| session_error("info failed", err))?;
    session
        .close()
        .map_err(|err| session_error("close failed", err))?;

    print_info(
        &InfoOutput {
            device,
            interpreter: &info,
        },
        format,
    );
    Ok(SUCCESS)
}

fn print_info(out: &InfoOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DEVICE", "INTERPRETER", "VERSION"])
                .add_row(vec![
                    out.device.clone(),
                    out.interpreter.name.clone(),
                    out.interpreter.version.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Interpreter Info:");
            println!("  Device:      {}", out.device);
            println!("  Interpreter: {}", out.interpreter.name);
            println!("  Version:     {}", out.interpreter.version);
        }
        OutputFormat::Raw => {
            println!("{} {}", out.interpreter.name, out.interpreter.version);
        }
    }
}
