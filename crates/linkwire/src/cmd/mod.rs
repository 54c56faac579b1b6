use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use linkwire_client::ClientConfig;
use linkwire_frame::RouteKey;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod probe;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a reference server that echoes requests.
    Echo(EchoArgs),
    /// Send one request and print the response.
    Send(SendArgs),
    /// Subscribe to routes and print pushed messages.
    Listen(ListenArgs),
    /// Connect, measure latency and clock offset, print connection stats.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    if let Command::Version(args) = command {
        return version::run(args);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;

    runtime.block_on(async move {
        match command {
            Command::Echo(args) => echo::run(args, format).await,
            Command::Send(args) => send::run(args, format, load_config(config)?).await,
            Command::Listen(args) => listen::run(args, format, load_config(config)?).await,
            Command::Probe(args) => probe::run(args, format, load_config(config)?).await,
            Command::Version(args) => version::run(args),
        }
    })
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind.
    #[arg(default_value = "127.0.0.1:7000")]
    pub addr: String,
    /// Emit a push on this route (P:S) to every connected client.
    #[arg(long, value_name = "ROUTE")]
    pub push_route: Option<RouteKey>,
    /// Interval between pushes (e.g. 1s, 250ms).
    #[arg(long, default_value = "1s")]
    pub push_interval: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Route key as P:S or a raw integer.
    #[arg(long, short = 'r')]
    pub route: RouteKey,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Request timeout (e.g. 5s, 500ms). Overrides the config file.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Routes to subscribe to (comma-separated P:S).
    #[arg(long, short = 'r', value_delimiter = ',', required = true)]
    pub route: Vec<RouteKey>,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Server address (host:port).
    pub addr: String,
    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Number of time-sync exchanges.
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub samples: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Split `host:port`. IPv6 hosts may be bracketed.
pub fn parse_addr(input: &str) -> CliResult<(String, u16)> {
    let invalid = || CliError::new(USAGE, format!("invalid address '{input}' (expected host:port)"));
    let (host, port) = input.trim().rsplit_once(':').ok_or_else(invalid)?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    let port: u16 = port.parse().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Client settings from `--config`, or defaults.
pub fn load_config(path: Option<&Path>) -> CliResult<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
    ClientConfig::from_json(&text).map_err(|err| {
        CliError::new(
            DATA_INVALID,
            format!("invalid config {}: {err}", path.display()),
        )
    })
}

/// Payload from `--json`, `--data` or `--file`; empty when none is given.
pub fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return std::fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn parse_addr_variants() {
        assert_eq!(
            parse_addr("127.0.0.1:7000").unwrap(),
            ("127.0.0.1".to_string(), 7000)
        );
        assert_eq!(parse_addr("[::1]:80").unwrap(), ("::1".to_string(), 80));
        assert_eq!(parse_addr("no-port").unwrap_err().code, USAGE);
        assert_eq!(parse_addr(":7000").unwrap_err().code, USAGE);
        assert_eq!(parse_addr("host:99999").unwrap_err().code, USAGE);
    }

    #[test]
    fn missing_config_uses_defaults() {
        assert_eq!(load_config(None).unwrap(), ClientConfig::default());
    }

    #[test]
    fn config_file_is_parsed_and_validated() {
        let dir = std::env::temp_dir().join(format!("linkwire-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");

        let good = dir.join("good.json");
        std::fs::write(&good, r#"{"heartbeat":{"interval_ms":1000}}"#)
            .expect("config should be writable");
        let config = load_config(Some(&good)).expect("config should load");
        assert_eq!(config.heartbeat.interval, Duration::from_secs(1));

        let bad = dir.join("bad.json");
        std::fs::write(&bad, r#"{"request_timeout_ms":0}"#).expect("config should be writable");
        assert_eq!(load_config(Some(&bad)).unwrap_err().code, DATA_INVALID);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
