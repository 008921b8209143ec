use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Subcommand};
use tether_frame::ByteOrder;
use tether_link::{CancelHandle, ConnectOutcome, Connection, LinkConfig, LinkState, Received};
use tracing::info;

use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept a client and print every message it sends.
    Listen(ListenArgs),
    /// Accept a client and send every message back.
    Echo(EchoArgs),
    /// Send one message to a listening peer.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format, config),
        Command::Echo(args) => echo::run(args, format, config),
        Command::Send(args) => send::run(args, format, config),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// TCP port to listen on; a negative value serves shared memory keyed by its absolute value.
    #[arg(allow_negative_numbers = true)]
    pub port: i32,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// TCP port to listen on; a negative value serves shared memory keyed by its absolute value.
    #[arg(allow_negative_numbers = true)]
    pub port: i32,
    /// Exit after echoing N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// `host:port` for TCP, `shm:<key>` for shared memory.
    pub target: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Wait for one reply message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the reply when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    #[command(flatten)]
    pub link: LinkArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show build and protocol details.
    #[arg(long)]
    pub extended: bool,
}

/// Per-invocation overrides applied on top of `--config`.
#[derive(Args, Debug, Default)]
pub struct LinkArgs {
    /// Largest packet (TCP) or chunk (shared memory), in bytes.
    #[arg(long, value_name = "BYTES")]
    pub max_packet_size: Option<usize>,
    /// Address a TCP listener binds to.
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<IpAddr>,
    /// Budget for receiving one message (e.g. 10s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub read_timeout: Option<String>,
    /// Bound on one accept wait or TCP connect (e.g. 5s).
    #[arg(long, value_name = "DURATION")]
    pub accept_timeout: Option<String>,
    /// Byte order for outgoing packet headers (little, big, native).
    #[arg(long, value_name = "ORDER")]
    pub byte_order: Option<ByteOrder>,
}

impl LinkArgs {
    /// Load `config` (or defaults), apply overrides and validate.
    pub fn resolve(&self, config: Option<&Path>, port: Option<i32>) -> CliResult<LinkConfig> {
        let mut resolved = match config {
            Some(path) => LinkConfig::from_json_file(path)
                .map_err(|err| link_error("config load failed", err))?,
            None => LinkConfig::default(),
        };
        if let Some(port) = port {
            resolved = resolved.with_port(port);
        }
        if let Some(size) = self.max_packet_size {
            resolved = resolved.with_max_packet_size(size);
        }
        if let Some(addr) = self.bind {
            resolved = resolved.with_bind_addr(addr);
        }
        if let Some(raw) = &self.read_timeout {
            resolved = resolved.with_read_timeout(parse_duration(raw)?);
        }
        if let Some(raw) = &self.accept_timeout {
            resolved = resolved.with_accept_timeout(parse_duration(raw)?);
        }
        if let Some(order) = self.byte_order {
            resolved = resolved.with_byte_order(order);
        }
        resolved
            .validate()
            .map_err(|err| link_error("invalid configuration", err))?;
        Ok(resolved)
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Create the server side and route Ctrl-C into its cancel handle.
pub fn open_connection(config: LinkConfig) -> CliResult<(Connection, CancelHandle)> {
    let mut connection =
        Connection::new(config).map_err(|err| link_error("setup failed", err))?;
    connection
        .bind_and_listen()
        .map_err(|err| link_error("bind failed", err))?;
    match connection.local_addr() {
        Some(addr) => info!(%addr, "listening"),
        None => info!(endpoint = %connection.endpoint(), "listening"),
    }
    let cancel = connection.cancel_handle();
    install_ctrlc_handler(cancel.clone())?;
    Ok((connection, cancel))
}

fn install_ctrlc_handler(cancel: CancelHandle) -> CliResult<()> {
    ctrlc::set_handler(move || cancel.cancel())
        .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

/// Accept clients one at a time and hand each message to `on_message`.
///
/// A client that disconnects is replaced by the next one. Returns once
/// `count` messages were handled or the wait is cancelled.
pub fn serve(
    connection: &mut Connection,
    cancel: &CancelHandle,
    count: Option<usize>,
    mut on_message: impl FnMut(&mut Connection, &[u8]) -> CliResult<()>,
) -> CliResult<i32> {
    let mut handled = 0usize;

    'accept: while wait_for_client(connection)? {
        while !cancel.is_cancelled() {
            let message = match connection.receive() {
                Ok(Received::Message(message)) => message,
                Ok(Received::TimedOut) => continue,
                Err(err) if connection.state() == LinkState::Listening => {
                    info!(error = %err, "client gone");
                    continue 'accept;
                }
                Err(err) => return Err(link_error("receive failed", err)),
            };

            on_message(connection, &message)?;
            handled = handled.saturating_add(1);

            if count.is_some_and(|count| handled >= count) {
                break 'accept;
            }
        }
        break;
    }

    connection.close();
    Ok(SUCCESS)
}

/// Block until a client connects. Returns `false` once cancelled.
fn wait_for_client(connection: &mut Connection) -> CliResult<bool> {
    loop {
        match connection
            .connect_to_client()
            .map_err(|err| link_error("accept failed", err))?
        {
            ConnectOutcome::Connected => return Ok(true),
            ConnectOutcome::Pending => continue,
            ConnectOutcome::Cancelled => return Ok(false),
        }
    }
}
