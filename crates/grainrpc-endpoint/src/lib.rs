//! Peer-to-peer RPC between two endpoints.
//!
//! An [`Endpoint`] exposes servants (shared objects implementing a remote
//! interface) under grain ids and calls the peer's servants through
//! proxies. Interfaces are declared with [`remote_interface!`], which
//! generates the proxy and the dispatch glue. Objects passed as
//! [`ByRef`] cross the connection by reference and come back as the
//! same object.
//!
//! ```ignore
//! remote_interface! {
//!     pub trait Calculator as "demo.Calculator" {
//!         fn add(&self, a: i64, b: i64) -> CallResult<i64>;
//!     }
//! }
//!
//! let server = Endpoint::new("server")?;
//! server.create_servant::<dyn Calculator>(1, Arc::new(MyCalculator))?;
//! let addr = server.bind(&"tcp://127.0.0.1:0".parse()?)?;
//!
//! let client = Endpoint::new("client")?;
//! client.connect(&addr)?;
//! let calc = client.create_proxy::<dyn Calculator>(1)?;
//! assert_eq!(calc.add(1, 2)?, 3);
//! ```

pub mod auth;
pub mod codec;
mod connection;
mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod handshake;
mod heartbeat;
pub mod ids;
pub mod interface;
mod latency;
mod macros;
pub mod marshal;
pub mod message;
mod ordering;
mod pending;
mod pool;
pub mod proxy;
pub mod registry;
pub mod settings;
mod signal;
pub mod stats;
pub mod task;

pub use auth::{Authenticator, SharedSecretAuthenticator};
pub use connection::DisconnectReason;
pub use endpoint::{Endpoint, EndpointBuilder};
pub use error::{CallResult, EndpointError, RemoteException, Result, RpcError};
pub use ids::{ConnectionId, GrainId, RpcId};
pub use interface::{Dispatch, InterfaceDescriptor, MethodDescriptor, RemoteInterface};
pub use marshal::{ByRef, GrainOrigin, GrainRef};
pub use proxy::{ArgumentWriter, CallSite, IncomingCall, OutgoingCall, ProxyHandle, RemoteReturn};
pub use registry::{CollectionStats, GrainInfo, Servant};
pub use settings::{EndpointSettings, HeartbeatSettings, LatencySettings};
pub use stats::EndpointStatistics;
pub use task::Task;

pub use grainrpc_transport::EndpointAddr;

#[doc(hidden)]
pub mod __private {
    pub use serde_json::Value;
}
