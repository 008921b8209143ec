use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use tether_link::{Client, LinkError, Received};
use tracing::info;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{link_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, MessageRecord, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Tcp(SocketAddr),
    SharedMemory(u32),
}

pub fn run(args: SendArgs, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    let target = parse_target(&args.target)?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let mut config = args.link.resolve(config, None)?;
    if args.wait && args.link.read_timeout.is_none() {
        config = config.with_read_timeout(wait_timeout);
    }
    let payload = resolve_payload(&args)?;

    let mut client = match target {
        Target::Tcp(addr) => Client::connect_tcp(addr, &config),
        Target::SharedMemory(key) => Client::attach_shared_memory(key, &config),
    }
    .map_err(|err| link_error("connect failed", err))?;

    let packets = client
        .send(&payload)
        .map_err(|err| link_error("send failed", err))?;
    info!(destination = %args.target, size = payload.len(), packets, "message sent");

    if !args.wait {
        client
            .flush()
            .map_err(|err| link_error("send failed", err))?;
        return Ok(SUCCESS);
    }

    let reply = wait_for_reply(&mut client, wait_timeout)?;
    print_message(
        &MessageRecord {
            endpoint: args.target.clone(),
            peer: client.peer_address().map(|addr| addr.to_string()),
            byte_order: client.peer_byte_order(),
            payload: &reply,
        },
        format,
    );

    Ok(SUCCESS)
}

fn parse_target(raw: &str) -> CliResult<Target> {
    if let Some(key) = raw.strip_prefix("shm:") {
        return key
            .parse()
            .map(Target::SharedMemory)
            .map_err(|_| CliError::new(USAGE, format!("invalid shared-memory key: {key}")));
    }
    raw.to_socket_addrs()
        .map_err(|err| CliError::new(USAGE, format!("invalid target {raw}: {err}")))?
        .next()
        .map(Target::Tcp)
        .ok_or_else(|| CliError::new(USAGE, format!("target {raw} resolved to no address")))
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    let payload = if let Some(data) = &args.data {
        data.as_bytes().to_vec()
    } else if let Some(path) = &args.file {
        fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?
    } else {
        Vec::new()
    };
    if payload.is_empty() {
        return Err(CliError::new(USAGE, "refusing to send an empty message"));
    }
    Ok(payload)
}

trait ReplySource {
    fn next_reply(&mut self) -> Result<Received, LinkError>;
}

impl ReplySource for Client {
    fn next_reply(&mut self) -> Result<Received, LinkError> {
        self.receive()
    }
}

/// Poll for one message until `timeout` has passed.
///
/// Each receive is itself bounded (read timeout for TCP, one flag wait for
/// shared memory), so the deadline is checked between attempts.
fn wait_for_reply<R: ReplySource>(source: &mut R, timeout: Duration) -> CliResult<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    loop {
        match source
            .next_reply()
            .map_err(|err| link_error("receive failed", err))?
        {
            Received::Message(message) => return Ok(message.to_vec()),
            Received::TimedOut if Instant::now() >= deadline => {
                return Err(CliError::new(
                    TIMEOUT,
                    format!("no reply within {timeout:?}"),
                ));
            }
            Received::TimedOut => continue,
        }
    }
}
