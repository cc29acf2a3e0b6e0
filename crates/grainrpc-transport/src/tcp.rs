use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use tracing::{debug, info};

use crate::addr::EndpointAddr;
use crate::error::{Result, TransportError};
use crate::stream::Stream;

/// TCP listener.
pub struct TcpSocket {
    listener: TcpListener,
    local: SocketAddr,
}

impl TcpSocket {
    /// Bind and listen. Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: EndpointAddr::Tcp(addr),
            source,
        };
        let listener = TcpListener::bind(addr).map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        info!(%local, "listening on tcp");
        Ok(Self { listener, local })
    }

    /// Accept an incoming connection (blocking unless non-blocking mode is set).
    pub fn accept(&self) -> Result<Stream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!(%peer, "accepted connection");
        accepted(stream)
    }

    /// Accept a pending connection without blocking.
    ///
    /// Requires [`set_nonblocking(true)`](Self::set_nonblocking).
    pub fn poll_accept(&self) -> Result<Option<Stream>> {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                accepted(stream).map(Some)
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == ErrorKind::Interrupted => Ok(None),
            Err(err) => Err(TransportError::Accept(err)),
        }
    }

    /// Toggle non-blocking accept.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.listener.set_nonblocking(nonblocking)?;
        Ok(())
    }

    /// Connect with a bounded connect timeout.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Stream> {
        let stream =
            TcpStream::connect_timeout(&addr, timeout).map_err(|e| TransportError::Connect {
                addr: EndpointAddr::Tcp(addr),
                source: e,
            })?;
        debug!(%addr, "connected to tcp endpoint");
        Ok(Stream::from_tcp(stream))
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

fn accepted(stream: TcpStream) -> Result<Stream> {
    stream.set_nonblocking(false)?;
    Ok(Stream::from_tcp(stream))
}
