use std::fmt;
use std::time::Duration;

use grainrpc_frame::FrameError;
use grainrpc_transport::{EndpointAddr, TransportError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::TaggedValue;
use crate::ids::GrainId;

/// Connect-time and lifecycle errors of an endpoint.
///
/// A failed connection attempt never poisons the endpoint: after any of
/// these errors the endpoint is still `Unconnected` and may be used again.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// An argument was out of range or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `connect` was called while a connection is established.
    #[error("endpoint '{0}' is already connected")]
    AlreadyConnected(String),

    /// `bind` was called twice.
    #[error("endpoint '{name}' is already bound to {addr}")]
    AlreadyBound { name: String, addr: EndpointAddr },

    /// Another connection attempt is in progress.
    #[error("endpoint '{0}' is already establishing a connection")]
    Connecting(String),

    /// A challenge was answered incorrectly.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The peer demanded credentials this endpoint cannot provide.
    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    /// The peer does not speak the protocol.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The remote endpoint already serves another connection.
    #[error("endpoint '{0}' is blocked by another connection")]
    EndpointBlocked(String),

    /// Nothing is listening at the address, or the transport failed.
    #[error("unable to establish a connection with {addr}: {reason}")]
    NoSuchEndpoint { addr: EndpointAddr, reason: String },

    /// A handshake step did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// A proxy or servant id is registered with a different interface.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// No more ids are available for implicit servants.
    #[error("grain id range exhausted")]
    GrainIdRangeExhausted,

    /// The endpoint has been shut down.
    #[error("endpoint '{0}' has been disposed")]
    Disposed(String),

    /// A settings file could not be read.
    #[error("settings error: {0}")]
    Settings(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A message could not be encoded or decoded.
    #[error("{0}")]
    Marshal(RpcError),
}

pub type Result<T> = std::result::Result<T, EndpointError>;

/// Outcome of a remote method call.
pub type CallResult<T> = std::result::Result<T, RpcError>;

/// Call-time errors.
///
/// These travel across the wire: a servant that fails with an `RpcError`
/// has the same error reconstructed on the caller's side, with the remote
/// trace extended by the frames it passed through.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcError {
    /// The endpoint had no connection when the call was issued.
    #[error("endpoint '{endpoint}' is not connected")]
    NotConnected { endpoint: String },

    /// The connection was lost before the result arrived.
    #[error("endpoint '{endpoint}' lost its connection before the call completed")]
    ConnectionLost { endpoint: String },

    /// The callee has no servant with the requested id.
    #[error(
        "{endpoint}: no servant #{grain_id} for {interface}.{method}() \
         ({num_servants} servants, {num_proxies} proxies registered)"
    )]
    NoSuchServant {
        endpoint: String,
        grain_id: GrainId,
        interface: String,
        method: String,
        num_servants: usize,
        num_proxies: usize,
    },

    /// The callee's servant implements a different interface.
    #[error("{message}")]
    TypeMismatch { message: String },

    /// The servant returned a task that was never started.
    #[error(
        "method {interface}.{method}() of servant #{grain_id} returned a task \
         that was never started"
    )]
    NotSupported {
        interface: String,
        method: String,
        grain_id: GrainId,
    },

    /// An application error raised by the remote subject.
    #[error("{0}")]
    Remote(RemoteException),

    /// An application error whose payload could not be encoded.
    #[error("{type_name}: {message}")]
    Unserializable {
        type_name: String,
        message: String,
        #[serde(default)]
        remote_trace: String,
    },

    /// Arguments or results could not be encoded or decoded.
    #[error("marshalling failed: {message}")]
    Marshal { message: String },
}

impl RpcError {
    /// Wraps an arbitrary error as a remote application error.
    ///
    /// The caller sees the error's type name and message, but cannot
    /// downcast it back to `E`. Use [`RpcError::typed`] for that.
    pub fn application<E: std::error::Error + ?Sized>(err: &E) -> Self {
        RpcError::Remote(RemoteException {
            type_name: std::any::type_name_of_val(err).to_string(),
            message: err.to_string(),
            remote_trace: source_chain(err),
            payload: None,
        })
    }

    /// Wraps an error whose value travels to the caller.
    ///
    /// The caller can reconstruct it with [`RemoteException::downcast`].
    /// When the value cannot be encoded the caller receives
    /// [`RpcError::Unserializable`] with the original message instead.
    pub fn typed<E: std::error::Error + Serialize>(err: &E) -> Self {
        match TaggedValue::of(err) {
            Ok(tagged) => RpcError::Remote(RemoteException {
                type_name: tagged.type_name,
                message: err.to_string(),
                remote_trace: source_chain(err),
                payload: Some(tagged.value),
            }),
            Err(_) => RpcError::Unserializable {
                type_name: std::any::type_name::<E>().to_string(),
                message: err.to_string(),
                remote_trace: source_chain(err),
            },
        }
    }

    /// A remote application error carrying only a message.
    pub fn message(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        RpcError::Remote(RemoteException {
            type_name: type_name.into(),
            message: message.into(),
            remote_trace: String::new(),
            payload: None,
        })
    }

    pub(crate) fn marshal(message: impl fmt::Display) -> Self {
        RpcError::Marshal {
            message: message.to_string(),
        }
    }

    /// True for the two errors that mean the connection is gone.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RpcError::NotConnected { .. } | RpcError::ConnectionLost { .. }
        )
    }

    /// The remote trace, for application errors.
    pub fn remote_trace(&self) -> Option<&str> {
        match self {
            RpcError::Remote(exception) => Some(&exception.remote_trace),
            RpcError::Unserializable { remote_trace, .. } => Some(remote_trace),
            _ => None,
        }
    }

    /// Appends a frame describing where the error crossed an endpoint.
    pub(crate) fn with_remote_frame(mut self, frame: &str) -> Self {
        let trace = match &mut self {
            RpcError::Remote(exception) => &mut exception.remote_trace,
            RpcError::Unserializable { remote_trace, .. } => remote_trace,
            _ => return self,
        };
        if !trace.is_empty() {
            trace.push('\n');
        }
        trace.push_str("   at ");
        trace.push_str(frame);
        self
    }
}

/// An application error raised on the remote side of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteException {
    /// Rust type name of the original error.
    pub type_name: String,
    /// The original error message.
    pub message: String,
    /// Source chain and endpoint frames the error passed through.
    #[serde(default)]
    pub remote_trace: String,
    /// The encoded error value, when it was sent with [`RpcError::typed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl RemoteException {
    /// Reconstructs the original error value.
    ///
    /// Succeeds only if the error was sent with [`RpcError::typed`] using
    /// the same type `E`.
    pub fn downcast<E: DeserializeOwned>(&self) -> Option<E> {
        self.tagged()?.downcast()
    }

    /// The error value with its type tag, if one was sent.
    pub fn tagged(&self) -> Option<TaggedValue> {
        Some(TaggedValue {
            type_name: self.type_name.clone(),
            value: self.payload.clone()?,
        })
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)?;
        if !self.remote_trace.is_empty() {
            write!(f, "\n--- remote trace ---\n{}", self.remote_trace)?;
        }
        Ok(())
    }
}

fn source_chain<E: std::error::Error + ?Sized>(err: &E) -> String {
    let mut trace = String::new();
    let mut source = err.source();
    while let Some(cause) = source {
        if !trace.is_empty() {
            trace.push('\n');
        }
        trace.push_str("   caused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error, Serialize, Deserialize, PartialEq)]
    #[error("balance too low: {balance}")]
    struct InsufficientFunds {
        balance: i64,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn typed_errors_downcast_to_original_value() {
        let err = RpcError::typed(&InsufficientFunds { balance: 3 });
        let RpcError::Remote(exception) = err else {
            panic!("expected remote exception");
        };
        assert_eq!(exception.message, "balance too low: 3");
        assert_eq!(
            exception.downcast::<InsufficientFunds>(),
            Some(InsufficientFunds { balance: 3 })
        );
        assert!(exception.downcast::<String>().is_none());
    }

    #[test]
    fn typed_error_payload_is_a_tagged_value() {
        let value = InsufficientFunds { balance: 5 };
        let RpcError::Remote(exception) = RpcError::typed(&value) else {
            panic!("expected remote exception");
        };
        let tagged = exception.tagged().expect("typed errors carry a payload");

        let mut sent = Vec::new();
        crate::codec::write_value(&mut sent, &tagged).unwrap();
        let mut direct = Vec::new();
        crate::codec::write_object(&mut direct, &value).unwrap();
        assert_eq!(sent, direct);

        let read = crate::codec::read_object(&sent).unwrap();
        assert!(read.is::<InsufficientFunds>());
        assert_eq!(read.downcast(), Some(value));
    }

    #[test]
    fn application_errors_record_source_chain() {
        let err = RpcError::application(&Outer(std::io::Error::other("disk on fire")));
        let trace = err.remote_trace().expect("application error has a trace");
        assert!(trace.contains("disk on fire"));
    }

    #[test]
    fn remote_frames_extend_the_trace() {
        let err = RpcError::message("app::Error", "boom")
            .with_remote_frame("server Calc.add() (#1)")
            .with_remote_frame("relay Calc.add() (#7)");
        let trace = err.remote_trace().unwrap();
        assert_eq!(
            trace,
            "   at server Calc.add() (#1)\n   at relay Calc.add() (#7)"
        );
        assert!(err.to_string().contains("--- remote trace ---"));
    }

    #[test]
    fn system_errors_carry_no_trace() {
        let err = RpcError::NotConnected {
            endpoint: "client".to_string(),
        }
        .with_remote_frame("ignored");
        assert!(err.remote_trace().is_none());
        assert!(err.is_connection_error());
    }
}
