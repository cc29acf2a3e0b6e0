use std::time::Duration;

use crate::addr::EndpointAddr;
use crate::error::Result;
use crate::stream::Stream;
use crate::tcp::TcpSocket;
#[cfg(unix)]
use crate::uds::UnixDomainSocket;

/// A bound listener of either transport family.
pub enum Listener {
    Tcp(TcpSocket),
    #[cfg(unix)]
    Unix(UnixDomainSocket),
}

impl Listener {
    /// Bind to `addr`.
    pub fn bind(addr: &EndpointAddr) -> Result<Self> {
        match addr {
            EndpointAddr::Tcp(addr) => TcpSocket::bind(*addr).map(Listener::Tcp),
            #[cfg(unix)]
            EndpointAddr::Unix(path) => UnixDomainSocket::bind(path).map(Listener::Unix),
            #[cfg(not(unix))]
            EndpointAddr::Unix(_) => Err(crate::error::TransportError::Unsupported("unix")),
        }
    }

    /// Accept an incoming connection.
    pub fn accept(&self) -> Result<Stream> {
        match self {
            Listener::Tcp(socket) => socket.accept(),
            #[cfg(unix)]
            Listener::Unix(socket) => socket.accept(),
        }
    }

    /// Accept a pending connection without blocking.
    pub fn poll_accept(&self) -> Result<Option<Stream>> {
        match self {
            Listener::Tcp(socket) => socket.poll_accept(),
            #[cfg(unix)]
            Listener::Unix(socket) => socket.poll_accept(),
        }
    }

    /// Toggle non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        match self {
            Listener::Tcp(socket) => socket.set_nonblocking(nonblocking),
            #[cfg(unix)]
            Listener::Unix(socket) => socket.set_nonblocking(nonblocking),
        }
    }

    /// The address actually bound (ephemeral TCP ports resolved).
    pub fn local_addr(&self) -> EndpointAddr {
        match self {
            Listener::Tcp(socket) => EndpointAddr::Tcp(socket.local_addr()),
            #[cfg(unix)]
            Listener::Unix(socket) => EndpointAddr::Unix(socket.path().to_path_buf()),
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("addr", &self.local_addr())
            .finish()
    }
}

/// Connect to `addr`.
///
/// The timeout bounds TCP connection establishment. Unix domain socket
/// connects either succeed or fail immediately.
pub fn connect(addr: &EndpointAddr, timeout: Duration) -> Result<Stream> {
    match addr {
        EndpointAddr::Tcp(addr) => TcpSocket::connect(*addr, timeout),
        #[cfg(unix)]
        EndpointAddr::Unix(path) => {
            let _ = timeout;
            UnixDomainSocket::connect(path)
        }
        #[cfg(not(unix))]
        EndpointAddr::Unix(_) => {
            let _ = timeout;
            Err(crate::error::TransportError::Unsupported("unix"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn tcp_listener_roundtrip() {
        let listener = Listener::bind(&EndpointAddr::loopback(0)).unwrap();
        let addr = listener.local_addr();
        assert!(matches!(addr, EndpointAddr::Tcp(a) if a.port() != 0));

        let client = std::thread::spawn(move || {
            let mut stream = connect(&addr, Duration::from_secs(2)).unwrap();
            stream.write_all(b"hi").unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        client.join().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn unix_listener_reports_path() {
        let dir = std::env::temp_dir().join(format!("grainrpc-listener-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let addr = EndpointAddr::Unix(dir.join("l.sock"));

        let listener = Listener::bind(&addr).unwrap();
        assert_eq!(listener.local_addr(), addr);

        let stream = connect(&addr, Duration::from_secs(1)).unwrap();
        assert_eq!(stream.peer_addr(), Some(addr));

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
