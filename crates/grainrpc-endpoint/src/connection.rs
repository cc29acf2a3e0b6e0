//! One established connection between two endpoints.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use grainrpc_frame::{FrameError, FrameReader, FrameWriter, MessageKind};
use grainrpc_transport::{EndpointAddr, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::ids::ConnectionId;
use crate::message::Message;
use crate::stats::StatCounters;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    RequestedByEndpoint,
    RequestedByRemoteEndpoint,
    ReadFailure,
    WriteFailure,
    RpcDuplicateRequest,
    RpcInvalidResponse,
    UnhandledException,
    HeartbeatFailure,
    ConnectionReset,
    ConnectionAborted,
    ConnectionTimedOut,
    Unknown,
}

impl DisconnectReason {
    /// False only for disconnects either side asked for.
    pub fn is_failure(self) -> bool {
        !matches!(
            self,
            DisconnectReason::RequestedByEndpoint | DisconnectReason::RequestedByRemoteEndpoint
        )
    }

    pub(crate) fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => DisconnectReason::ConnectionReset,
            io::ErrorKind::ConnectionAborted => DisconnectReason::ConnectionAborted,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                DisconnectReason::ConnectionTimedOut
            }
            _ => DisconnectReason::ReadFailure,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::RequestedByEndpoint => "requested_by_endpoint",
            DisconnectReason::RequestedByRemoteEndpoint => "requested_by_remote_endpoint",
            DisconnectReason::ReadFailure => "read_failure",
            DisconnectReason::WriteFailure => "write_failure",
            DisconnectReason::RpcDuplicateRequest => "rpc_duplicate_request",
            DisconnectReason::RpcInvalidResponse => "rpc_invalid_response",
            DisconnectReason::UnhandledException => "unhandled_exception",
            DisconnectReason::HeartbeatFailure => "heartbeat_failure",
            DisconnectReason::ConnectionReset => "connection_reset",
            DisconnectReason::ConnectionAborted => "connection_aborted",
            DisconnectReason::ConnectionTimedOut => "connection_timed_out",
            DisconnectReason::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The write half and bookkeeping of an established connection. The read
/// half lives on the connection's reader thread.
pub(crate) struct Connection {
    id: ConnectionId,
    local_addr: Option<EndpointAddr>,
    remote_addr: EndpointAddr,
    remote_name: String,
    writer: Mutex<FrameWriter<Stream>>,
    control: Stream,
    stats: Arc<StatCounters>,
    established: Instant,
    last_read_ms: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: EndpointAddr,
        remote_name: String,
        writer: FrameWriter<Stream>,
        stats: Arc<StatCounters>,
    ) -> Result<Self> {
        let control = writer.get_ref().try_clone()?;
        Ok(Self {
            id,
            local_addr: control.local_addr(),
            remote_addr,
            remote_name,
            writer: Mutex::new(writer),
            control,
            stats,
            established: Instant::now(),
            last_read_ms: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn local_addr(&self) -> Option<&EndpointAddr> {
        self.local_addr.as_ref()
    }

    pub(crate) fn remote_addr(&self) -> &EndpointAddr {
        &self.remote_addr
    }

    pub(crate) fn remote_name(&self) -> &str {
        &self.remote_name
    }

    fn writer(&self) -> MutexGuard<'_, FrameWriter<Stream>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        let frame = message.encode()?;
        self.writer().write_frame(&frame)?;
        self.stats.record_sent(frame.wire_size());
        Ok(())
    }

    /// Hands a goodbye to the socket without waiting for a busy writer.
    pub(crate) fn say_goodbye(&self, timeout: Duration) {
        let mut writer = match self.writer.try_lock() {
            Ok(writer) => writer,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                debug!(connection_id = %self.id, "writer busy, skipping goodbye");
                return;
            }
        };
        let _ = writer.set_write_timeout(Some(timeout));
        match writer.send(MessageKind::Goodbye, &[]) {
            Ok(()) => self.stats.record_sent(grainrpc_frame::HEADER_SIZE),
            Err(err) => debug!(connection_id = %self.id, error = %err, "failed to send goodbye"),
        }
    }

    /// Closes both directions. Blocked reads and writes on other threads
    /// return immediately.
    pub(crate) fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Err(err) = self.control.shutdown() {
            debug!(connection_id = %self.id, error = %err, "socket shutdown failed");
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_read(&self) {
        let elapsed = u64::try_from(self.established.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_read_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last frame arrived, or since the connection was
    /// established when none has.
    pub(crate) fn since_last_read(&self) -> Duration {
        let last = Duration::from_millis(self.last_read_ms.load(Ordering::Relaxed));
        self.established.elapsed().saturating_sub(last)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("remote_name", &self.remote_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reads messages until the connection ends or `handle` asks to end it.
pub(crate) fn read_messages(
    connection: &Connection,
    reader: &mut FrameReader<Stream>,
    stats: &StatCounters,
    mut handle: impl FnMut(Message) -> std::result::Result<(), DisconnectReason>,
) -> DisconnectReason {
    loop {
        let frame = match reader.read_frame() {
            Ok(frame) => frame,
            Err(FrameError::ConnectionClosed) => return DisconnectReason::ConnectionReset,
            Err(FrameError::Io(err)) => return DisconnectReason::from_io(&err),
            Err(err) => {
                if !connection.is_closed() {
                    warn!(connection_id = %connection.id(), error = %err, "malformed frame");
                }
                return DisconnectReason::ReadFailure;
            }
        };
        connection.mark_read();
        stats.record_received(frame.wire_size());

        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    connection_id = %connection.id(),
                    kind = %frame.kind,
                    error = %err,
                    "undecodable message"
                );
                return if frame.kind == MessageKind::Result {
                    DisconnectReason::RpcInvalidResponse
                } else {
                    DisconnectReason::ReadFailure
                };
            }
        };
        if let Err(reason) = handle(message) {
            return reason;
        }
    }
}
