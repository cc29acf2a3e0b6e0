//! Minimal echo server: hosts the echo grain on a TCP port and serves one
//! peer at a time.
//!
//! Run with:
//!   cargo run -p grainrpc --example echo-server
//!
//! In another terminal:
//!   cargo run -p grainrpc --features cli -- call tcp://127.0.0.1:7878 --message hello

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use grainrpc::echo::{Echo, EchoServant, DEFAULT_ECHO_GRAIN};
use grainrpc::{Endpoint, EndpointAddr};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let endpoint = Endpoint::new("echo-server")?;
    endpoint.create_servant::<dyn Echo>(DEFAULT_ECHO_GRAIN, Arc::new(EchoServant::default()))?;

    endpoint.on_connected(|addr, id| eprintln!("Peer connected from {addr} (connection {id})"));
    endpoint.on_disconnected(|addr, id| eprintln!("Peer {addr} left (connection {id})"));
    endpoint.on_failure(|reason, id| eprintln!("Connection {id} failed: {reason:?}"));

    let addr = endpoint.bind(&EndpointAddr::loopback(7878))?;
    eprintln!("Listening on {addr}");

    loop {
        thread::sleep(Duration::from_secs(1));
    }
}
