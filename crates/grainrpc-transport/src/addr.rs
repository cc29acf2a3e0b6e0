use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Address of a listening or connected endpoint.
///
/// Parses from `tcp://host:port`, `unix:///path/to.sock`, or a bare
/// `host:port` (TCP). `Display` produces the scheme-prefixed form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl EndpointAddr {
    /// Loopback TCP address on `port`. Port 0 requests an ephemeral port at bind.
    pub fn loopback(port: u16) -> Self {
        Self::Tcp(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    /// Transport scheme name.
    pub fn scheme(&self) -> &'static str {
        match self {
            EndpointAddr::Tcp(_) => "tcp",
            EndpointAddr::Unix(_) => "unix",
        }
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
            EndpointAddr::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for EndpointAddr {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let invalid = || TransportError::InvalidAddress(input.to_string());

        if let Some(path) = input.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid());
            }
            return Ok(EndpointAddr::Unix(PathBuf::from(path)));
        }

        let host = input.strip_prefix("tcp://").unwrap_or(input);
        if host.is_empty() {
            return Err(invalid());
        }
        host.to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .map(EndpointAddr::Tcp)
            .ok_or_else(invalid)
    }
}

impl From<SocketAddr> for EndpointAddr {
    fn from(addr: SocketAddr) -> Self {
        EndpointAddr::Tcp(addr)
    }
}

impl From<PathBuf> for EndpointAddr {
    fn from(path: PathBuf) -> Self {
        EndpointAddr::Unix(path)
    }
}
