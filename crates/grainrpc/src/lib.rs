//! Peer-to-peer RPC between two endpoints.
//!
//! grainrpc connects exactly two endpoints and lets each call methods on
//! objects ("grains") the other one exposes. Objects can be passed by
//! reference and keep their identity across the connection.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP and Unix socket streams and listeners
//! - [`frame`]: Length-prefixed framing with a message-kind discriminator
//! - [`endpoint`]: Endpoints, grain registry, call dispatch and the
//!   [`remote_interface!`] macro
//! - [`echo`]: A tiny interface used by the diagnostic binary

/// Re-export transport types.
pub mod transport {
    pub use grainrpc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use grainrpc_frame::*;
}

/// Re-export endpoint types.
pub mod endpoint {
    pub use grainrpc_endpoint::*;
}

pub mod echo;

pub use grainrpc_endpoint::{
    remote_interface, Authenticator, ByRef, CallResult, ConnectionId, DisconnectReason, Dispatch,
    Endpoint, EndpointAddr, EndpointBuilder, EndpointError, EndpointSettings, EndpointStatistics,
    GrainId, HeartbeatSettings, LatencySettings, RemoteException, Result, RpcError,
    SharedSecretAuthenticator, Task,
};
