use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use xbridge_engine::latin1;
use xbridge_frame::{api_name, hex, Frame};

#[derive(Clone, Debug, Copy, ValueEnum)]
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
    api_id: u8,
    api_name: &'a str,
    frame_id: Option<u8>,
    source_address: Option<String>,
    payload_hex: String,
    data: Option<String>,
    timestamp: String,
}

pub fn print_frame(frame: &Frame, format: OutputFormat) {
    let source = frame.source_address().map(|a| a.to_string());
    let data = frame.received_data().map(latin1);
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                api_id: frame.api_id,
                api_name: api_name(frame.api_id),
                frame_id: frame.frame_id,
                source_address: source,
                payload_hex: hex::encode(&frame.payload),
                data,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["API", "SOURCE", "SIZE", "DATA"])
                .add_row(vec![
                    api_name(frame.api_id).to_string(),
                    source.unwrap_or_else(|| "-".to_string()),
                    frame.payload.len().to_string(),
                    data.unwrap_or_else(|| hex::encode(&frame.payload)),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "api=0x{:02x} ({}) source={} size={} data={}",
                frame.api_id,
                api_name(frame.api_id),
                source.as_deref().unwrap_or("-"),
                frame.payload.len(),
                data.unwrap_or_else(|| hex::encode(&frame.payload))
            );
        }
        OutputFormat::Raw => match frame.received_data() {
            Some(data) => print_raw(data),
            None => print_raw(&frame.payload),
        },
    }
}

#[derive(Serialize)]
struct ValueOutput<'a> {
    command: &'a str,
    target: &'a str,
    value_hex: String,
    value_text: String,
}

/// Print the value bytes of an AT reply.
pub fn print_value(command: &str, target: &str, value: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ValueOutput {
            command,
            target,
            value_hex: hex::encode(value),
            value_text: latin1(value),
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "TARGET", "HEX", "TEXT"])
                .add_row(vec![
                    command.to_string(),
                    target.to_string(),
                    hex::encode(value),
                    printable(value),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={command} target={target} value={} text={}",
                hex::encode(value),
                printable(value)
            );
        }
        OutputFormat::Raw => print_raw(value),
    }
}

#[derive(Serialize)]
struct ReplyOutput<'a> {
    command: &'a str,
    lines: Vec<&'a str>,
}

/// Print a transparent-mode reply, one line per `\r`-separated entry.
pub fn print_reply(command: &str, reply: &str, format: OutputFormat) {
    let lines: Vec<&str> = reply.split('\r').collect();
    match format {
        OutputFormat::Json => print_json(&ReplyOutput { command, lines }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![command]);
            for line in lines {
                table.add_row(vec![line]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for line in lines {
                println!("{line}");
            }
        }
        OutputFormat::Raw => print_raw(reply.as_bytes()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn printable(value: &[u8]) -> String {
    if !value.is_empty() && value.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        latin1(value)
    } else {
        String::new()
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
