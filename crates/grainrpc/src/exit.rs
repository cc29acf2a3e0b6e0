use std::fmt;
use std::io;

use grainrpc_endpoint::{EndpointError, RpcError};
use grainrpc_frame::FrameError;
use grainrpc_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const AUTH_FAILED: i32 = 50;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => AUTH_FAILED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::NotFound
        | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidAddress(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(TRANSPORT_ERROR, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn endpoint_error(context: &str, err: EndpointError) -> CliError {
    match err {
        EndpointError::Transport(err) => transport_error(context, err),
        EndpointError::Frame(err) => frame_error(context, err),
        EndpointError::Authentication(_) | EndpointError::AuthenticationRequired(_) => {
            CliError::new(AUTH_FAILED, format!("{context}: {err}"))
        }
        EndpointError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        EndpointError::NoSuchEndpoint { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        EndpointError::InvalidArgument(_) | EndpointError::Settings(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        EndpointError::EndpointBlocked(_)
        | EndpointError::Handshake(_)
        | EndpointError::AlreadyBound { .. }
        | EndpointError::AlreadyConnected(_)
        | EndpointError::Connecting(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn rpc_error(context: &str, err: RpcError) -> CliError {
    match err {
        RpcError::NotConnected { .. } | RpcError::ConnectionLost { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        RpcError::Marshal { .. } => CliError::new(INTERNAL, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn endpoint_errors_map_to_documented_codes() {
        let code = |err| endpoint_error("ctx", err).code;
        assert_eq!(code(EndpointError::Authentication("x".into())), AUTH_FAILED);
        assert_eq!(code(EndpointError::AuthenticationRequired("x".into())), AUTH_FAILED);
        assert_eq!(code(EndpointError::Timeout(Duration::from_secs(1))), TIMEOUT);
        assert_eq!(code(EndpointError::InvalidArgument("x".into())), USAGE);
        assert_eq!(code(EndpointError::EndpointBlocked("x".into())), FAILURE);
        assert_eq!(
            code(EndpointError::NoSuchEndpoint {
                addr: grainrpc_transport::EndpointAddr::loopback(1),
                reason: "refused".into(),
            }),
            TRANSPORT_ERROR
        );
    }

    #[test]
    fn rpc_errors_keep_the_context() {
        let err = rpc_error(
            "echo failed",
            RpcError::ConnectionLost {
                endpoint: "cli".into(),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("echo failed: "));
    }
}
