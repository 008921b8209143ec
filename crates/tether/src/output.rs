use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tether_frame::ByteOrder;

/// Longest text shown before a payload is elided in table and pretty output.
const PREVIEW_LIMIT: usize = 256;

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

/// One received message plus where it came from.
pub struct MessageRecord<'a> {
    /// `tcp:<port>` or `shm:<key>` on the listening side, the target on the sending side.
    pub endpoint: String,
    pub peer: Option<String>,
    pub byte_order: Option<ByteOrder>,
    pub payload: &'a [u8],
}

#[derive(Serialize)]
struct MessageOutput<'a> {
    schema_id: &'a str,
    endpoint: &'a str,
    peer: Option<&'a str>,
    peer_byte_order: Option<&'a str>,
    size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_message(record: &MessageRecord<'_>, format: OutputFormat) {
    let byte_order = record.byte_order.map(ByteOrder::as_str);
    match format {
        OutputFormat::Json => {
            let out = MessageOutput {
                schema_id: "https://schemas.3leaps.dev/tether/cli/v1/message-received.schema.json",
                endpoint: &record.endpoint,
                peer: record.peer.as_deref(),
                peer_byte_order: byte_order,
                size: record.payload.len(),
                payload: payload_text(record.payload),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ENDPOINT", "PEER", "ORDER", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    record.endpoint.clone(),
                    record.peer.clone().unwrap_or_else(|| "-".to_string()),
                    byte_order.unwrap_or("-").to_string(),
                    record.payload.len().to_string(),
                    payload_preview(record.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "endpoint={} peer={} order={} size={} payload={}",
                record.endpoint,
                record.peer.as_deref().unwrap_or("-"),
                byte_order.unwrap_or("-"),
                record.payload.len(),
                payload_preview(record.payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(record.payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_text(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn payload_preview(payload: &[u8]) -> String {
    let text = payload_text(payload);
    if text.chars().count() <= PREVIEW_LIMIT {
        return text;
    }
    let mut preview: String = text.chars().take(PREVIEW_LIMIT).collect();
    preview.push_str(&format!("... ({} bytes)", payload.len()));
    preview
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
