use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use replmux_frame::Frame;
use replmux_session::SessionError;
use serde::Serialize;

#[derive(Clone, Debug, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    channel: &'a str,
    size: usize,
    body: String,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                channel: &frame.channel,
                size: frame.body.len(),
                body: body_preview(&frame.body),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "SIZE", "BODY"])
                .add_row(vec![
                    frame.channel.clone(),
                    frame.body.len().to_string(),
                    body_preview(&frame.body),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} size={} body={}",
                frame.channel,
                frame.body.len(),
                body_preview(&frame.body)
            );
        }
        OutputFormat::Raw => print_raw(&frame.body),
    }
}

#[derive(Serialize)]
struct EvalOutput<'a> {
    output: String,
    size: usize,
    mode: &'a str,
}

/// Print what an evaluation wrote.
pub fn print_output(output: &[u8], mode: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&EvalOutput {
            output: body_preview(output),
            size: output.len(),
            mode,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OUTPUT", "SIZE", "MODE"])
                .add_row(vec![
                    body_preview(output),
                    output.len().to_string(),
                    mode.to_string(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let text = String::from_utf8_lossy(output);
            println!("{}", text.trim_end());
        }
        OutputFormat::Raw => print_raw(output),
    }
}

/// Print what the interpreter wrote before it failed, unformatted.
pub fn print_partial(err: &SessionError) {
    if let Some(output) = err.partial_output() {
        print_raw(output);
    }
}

pub fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn body_preview(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", body.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
