mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "linkwire", version, about = "Persistent framed-protocol client CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "LINKWIRE_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// Client configuration file (JSON). Flags override its values.
    #[arg(long, value_name = "FILE", env = "LINKWIRE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format, cli.config.as_deref());

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "linkwire",
            "send",
            "127.0.0.1:7000",
            "--route",
            "3:1",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.route, linkwire_frame::RouteKey::new(3, 1));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "linkwire",
            "send",
            "127.0.0.1:7000",
            "--route",
            "1:1",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_malformed_route() {
        let err = Cli::try_parse_from(["linkwire", "send", "h:1", "--route", "one:two"])
            .expect_err("route should not parse");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn listen_accepts_route_list() {
        let cli = Cli::try_parse_from([
            "linkwire",
            "listen",
            "127.0.0.1:7000",
            "--route",
            "4:1,4:2",
            "--count",
            "2",
        ])
        .expect("listen args should parse");
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.route.len(), 2);
        assert_eq!(args.count, Some(2));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "linkwire",
            "probe",
            "127.0.0.1:7000",
            "--format",
            "json",
            "--config",
            "client.json",
        ])
        .expect("probe args should parse");
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert_eq!(cli.config, Some(PathBuf::from("client.json")));
        assert!(matches!(cli.command, Command::Probe(_)));
    }
}
