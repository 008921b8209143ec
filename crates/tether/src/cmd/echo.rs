use std::path::Path;

use tether_link::LinkState;
use tracing::{info, warn};

use crate::cmd::{open_connection, serve, EchoArgs};
use crate::exit::{link_error, CliResult};
use crate::output::OutputFormat;

pub fn run(args: EchoArgs, _format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    let config = args.link.resolve(config, Some(args.port))?;
    let (mut connection, cancel) = open_connection(config)?;

    serve(&mut connection, &cancel, args.count, |connection, message| {
        match connection.send(message) {
            Ok(packets) => {
                info!(
                    size = message.len(),
                    packets,
                    byte_order = ?connection.peer_byte_order(),
                    "echoed message"
                );
                Ok(())
            }
            // The next receive notices the link is gone and waits for a new client.
            Err(err) if connection.state() == LinkState::Listening => {
                warn!(error = %err, "client left before the echo was delivered");
                Ok(())
            }
            Err(err) => Err(link_error("echo send failed", err)),
        }
    })
}
