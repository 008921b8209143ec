//! Minimal echo server: accepts one client and echoes messages back.
//!
//! Run with:
//!   cargo run --example echo-server -- 7400
//!
//! In another terminal:
//!   cargo run --features cli -- send 127.0.0.1:7400 --data hello --wait
//!
//! A negative port serves over shared memory instead:
//!   cargo run --example echo-server -- -7400
//!   cargo run --features cli -- send shm:7400 --data hello --wait

use tether::link::{ConnectOutcome, Connection, LinkConfig, LinkState, Received};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port: i32 = std::env::args()
        .nth(1)
        .map(|raw| raw.parse())
        .transpose()?
        .unwrap_or(7400);

    let mut connection = Connection::new(LinkConfig::new(port))?;
    eprintln!("Serving on {}", connection.endpoint());

    loop {
        match connection.connect_to_client()? {
            ConnectOutcome::Connected => break,
            ConnectOutcome::Pending => continue,
            ConnectOutcome::Cancelled => return Ok(()),
        }
    }
    eprintln!("Client connected: {:?}", connection.peer_address());

    loop {
        match connection.receive() {
            Ok(Received::Message(message)) => {
                eprintln!("Received {} bytes", message.len());
                connection.send(&message)?;
            }
            Ok(Received::TimedOut) => continue,
            Err(err) if connection.state() == LinkState::Listening => {
                eprintln!("Client gone: {err}");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    connection.close();
    Ok(())
}
