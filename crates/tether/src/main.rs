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
#[command(name = "tether", version, about = "Point-to-point message transport CLI")]
struct Cli {
    /// Output format for received messages.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// JSON link configuration; command-line flags override its values.
    #[arg(long, value_name = "FILE", env = "TETHER_CONFIG", global = true)]
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
            "tether",
            "send",
            "127.0.0.1:7400",
            "--data",
            "hello",
            "--wait",
            "--wait-timeout",
            "500ms",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.target, "127.0.0.1:7400");
                assert!(args.wait);
                assert_eq!(args.wait_timeout, "500ms");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "tether",
            "send",
            "shm:1",
            "--file",
            "/tmp/payload.bin",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn send_requires_a_payload() {
        let err = Cli::try_parse_from(["tether", "send", "shm:1"])
            .expect_err("missing payload should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn negative_port_selects_shared_memory() {
        let cli = Cli::try_parse_from(["tether", "listen", "-7400", "--count", "2"])
            .expect("negative port should parse");
        match cli.command {
            Command::Listen(args) => {
                assert_eq!(args.port, -7400);
                assert_eq!(args.count, Some(2));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "tether",
            "echo",
            "7400",
            "--config",
            "/etc/tether.json",
            "--log-level",
            "debug",
            "--max-packet-size",
            "4096",
            "--byte-order",
            "big",
        ])
        .expect("echo args should parse");

        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/etc/tether.json")));
        assert_eq!(cli.log_level, LogLevel::Debug);
        match cli.command {
            Command::Echo(args) => {
                assert_eq!(args.link.max_packet_size, Some(4096));
                assert_eq!(args.link.byte_order, Some(tether_frame::ByteOrder::Big));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
