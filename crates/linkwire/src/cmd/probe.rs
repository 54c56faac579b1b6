use std::time::Duration;

use linkwire_client::{Client, ClientConfig, ClientStats, TimeSyncSample};
use serde::Serialize;

use crate::cmd::{parse_addr, parse_duration, ProbeArgs};
use crate::exit::{client_error, CliResult, SUCCESS};
use crate::output::{print_json, print_table, OutputFormat};

#[derive(Serialize)]
struct ProbeOutput {
    addr: String,
    transport: &'static str,
    state: String,
    samples: u32,
    best_round_trip_ms: f64,
    clock_offset_ms: i64,
    stats: ClientStats,
}

pub async fn run(args: ProbeArgs, format: OutputFormat, mut config: ClientConfig) -> CliResult<i32> {
    let (host, port) = parse_addr(&args.addr)?;
    config.connect_timeout = parse_duration(&args.timeout)?;
    config.reconnect.enabled = false;

    let client = Client::tcp(config).map_err(|err| client_error("invalid config", err))?;
    client
        .connect(&host, port)
        .await
        .map_err(|err| client_error("connect failed", err))?;

    let mut samples = Vec::with_capacity(args.samples as usize);
    for _ in 0..args.samples {
        match client.sync_time().await {
            Ok(sample) => samples.push(sample),
            Err(err) => {
                client.close();
                return Err(client_error("time sync failed", err));
            }
        }
    }
    let best = best_sample(&samples);

    let out = ProbeOutput {
        addr: args.addr,
        transport: client.transport_name(),
        state: client.state().to_string(),
        samples: args.samples,
        best_round_trip_ms: millis(best.round_trip),
        clock_offset_ms: best.offset_ms,
        stats: client.stats(),
    };
    client.close();

    print_probe(&out, format);
    Ok(SUCCESS)
}

/// The exchange with the shortest round trip has the tightest offset bound.
fn best_sample(samples: &[TimeSyncSample]) -> TimeSyncSample {
    samples
        .iter()
        .copied()
        .min_by_key(|sample| sample.round_trip)
        .unwrap_or(TimeSyncSample {
            round_trip: Duration::ZERO,
            offset_ms: 0,
        })
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn print_probe(out: &ProbeOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(out),
        OutputFormat::Table => print_table(&[
            ("address", out.addr.clone()),
            ("transport", out.transport.to_string()),
            ("state", out.state.clone()),
            ("round trip", format!("{:.2}ms", out.best_round_trip_ms)),
            ("clock offset", format!("{}ms", out.clock_offset_ms)),
            ("frames sent", out.stats.frames_sent.to_string()),
            ("frames received", out.stats.frames_received.to_string()),
        ]),
        OutputFormat::Pretty => {
            println!("Probe {}:", out.addr);
            println!("  Transport:    {}", out.transport);
            println!("  State:        {}", out.state);
            println!("  Round trip:   {:.2}ms (best of {})", out.best_round_trip_ms, out.samples);
            println!("  Clock offset: {}ms", out.clock_offset_ms);
            println!(
                "  Frames:       {} sent, {} received",
                out.stats.frames_sent, out.stats.frames_received
            );
        }
        OutputFormat::Raw => println!("{}", out.best_round_trip_ms),
    }
}
