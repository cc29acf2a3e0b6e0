//! Byte-stream transport for grainrpc endpoints.
//!
//! Provides one connect/accept surface over the stream transports an
//! endpoint can run on:
//! - TCP (all platforms)
//! - Unix domain sockets (Linux/macOS)
//!
//! This is the lowest layer of grainrpc. Everything else builds on top of
//! the [`Stream`] and [`Listener`] types provided here.

pub mod addr;
pub mod error;
pub mod listener;
pub mod stream;
pub mod tcp;

#[cfg(unix)]
pub mod uds;

pub use addr::EndpointAddr;
pub use error::{Result, TransportError};
pub use listener::{connect, Listener};
pub use stream::Stream;
pub use tcp::TcpSocket;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
