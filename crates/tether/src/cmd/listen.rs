use std::path::Path;

use tether_link::Connection;

use crate::cmd::{open_connection, serve, ListenArgs};
use crate::exit::CliResult;
use crate::output::{print_message, MessageRecord, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat, config: Option<&Path>) -> CliResult<i32> {
    let config = args.link.resolve(config, Some(args.port))?;
    let (mut connection, cancel) = open_connection(config)?;

    serve(&mut connection, &cancel, args.count, |connection, message| {
        print_message(&record(connection, message), format);
        Ok(())
    })
}

fn record<'a>(connection: &Connection, message: &'a [u8]) -> MessageRecord<'a> {
    MessageRecord {
        endpoint: connection.endpoint().to_string(),
        peer: connection.peer_address().map(|addr| addr.to_string()),
        byte_order: connection.peer_byte_order(),
        payload: message,
    }
}
