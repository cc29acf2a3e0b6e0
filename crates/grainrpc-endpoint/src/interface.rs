use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CallResult, EndpointError, Result};
use crate::proxy::{IncomingCall, ProxyHandle};

/// Concurrency policy of a remote method, applied on the callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// Calls may run concurrently. Calls from one caller thread are still
    /// delivered in the order they were issued.
    #[default]
    Unordered,
    /// One call at a time across every grain of the interface.
    SerializePerType,
    /// One call at a time per grain.
    SerializePerObject,
    /// One call at a time per grain and method.
    SerializePerMethod,
    /// One-way: the caller does not wait, failures are only logged.
    Async,
}

impl Dispatch {
    pub fn is_one_way(self) -> bool {
        self == Dispatch::Async
    }
}

impl fmt::Display for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dispatch::Unordered => "unordered",
            Dispatch::SerializePerType => "serialize-per-type",
            Dispatch::SerializePerObject => "serialize-per-object",
            Dispatch::SerializePerMethod => "serialize-per-method",
            Dispatch::Async => "async",
        };
        f.write_str(name)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub dispatch: Dispatch,
}

impl MethodDescriptor {
    pub const fn new(name: &'static str, dispatch: Dispatch) -> Self {
        Self { name, dispatch }
    }
}

/// Wire-level description of a remote interface.
///
/// The method name is the dispatch key on the wire, so names must be unique
/// within an interface.
#[derive(Debug, PartialEq, Eq)]
pub struct InterfaceDescriptor {
    pub name: &'static str,
    pub methods: &'static [MethodDescriptor],
}

impl InterfaceDescriptor {
    pub const fn new(name: &'static str, methods: &'static [MethodDescriptor]) -> Self {
        Self { name, methods }
    }

    pub fn method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for method in self.methods {
            if !seen.insert(method.name) {
                return Err(EndpointError::InvalidArgument(format!(
                    "interface '{}' declares method '{}' more than once; \
                     remote methods are dispatched by name and cannot be overloaded",
                    self.name, method.name
                )));
            }
        }
        Ok(())
    }
}

/// A trait object type that can be served and proxied.
///
/// Implemented for `dyn Trait` by [`remote_interface!`](crate::remote_interface).
pub trait RemoteInterface: Send + Sync + 'static {
    fn descriptor() -> &'static InterfaceDescriptor;

    /// Creates a proxy forwarding every method through `handle`.
    fn create_proxy(handle: ProxyHandle) -> Arc<Self>;

    /// Decodes the arguments of `call`, runs the method on `subject` and
    /// encodes its result.
    fn invoke(subject: &Self, call: &mut IncomingCall) -> CallResult<Value>;
}
