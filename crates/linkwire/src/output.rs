use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use linkwire_frame::Envelope;
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
struct EnvelopeOutput<'a> {
    message_type: &'a str,
    route_key: String,
    correlation_id: u32,
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EnvelopeOutput {
                message_type: envelope.message_type.as_str(),
                route_key: envelope.route_key.to_string(),
                correlation_id: envelope.correlation_id,
                status: envelope.response_status,
                error: Some(envelope.error_text.as_str()).filter(|text| !text.is_empty()),
                payload_size: envelope.payload.len(),
                payload: payload_preview(envelope.payload.as_ref()),
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["ROUTE", "CORRELATION", "STATUS", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    envelope.route_key.to_string(),
                    envelope.correlation_id.to_string(),
                    envelope.response_status.to_string(),
                    envelope.payload.len().to_string(),
                    payload_preview(envelope.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "route={} correlation={} status={} size={} payload={}",
                envelope.route_key,
                envelope.correlation_id,
                envelope.response_status,
                envelope.payload.len(),
                payload_preview(envelope.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(envelope.payload.as_ref());
        }
    }
}

/// Key/value rows as a two-column table.
pub fn print_table(rows: &[(&str, String)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["FIELD", "VALUE"]);
    for (field, value) in rows {
        table.add_row(vec![field.to_string(), value.clone()]);
    }
    println!("{table}");
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

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
