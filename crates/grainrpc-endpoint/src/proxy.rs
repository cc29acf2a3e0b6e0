//! The caller's side of a remote call and the servant's view of one.

use std::fmt;
use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::codec;
use crate::error::{CallResult, RpcError};
use crate::ids::{GrainId, RpcId};
use crate::interface::{InterfaceDescriptor, MethodDescriptor};
use crate::marshal::{self, MarshalScope};
use crate::pending::PendingCall;
use crate::task::Task;

/// Where a proxy call is headed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTarget {
    pub(crate) grain_id: GrainId,
    pub(crate) interface: &'static InterfaceDescriptor,
    pub(crate) method: &'static MethodDescriptor,
}

/// Sends proxy calls over the current connection of an endpoint.
pub(crate) trait CallChannel: Send + Sync {
    fn send_call(
        &self,
        target: CallTarget,
        encode: &dyn Fn(&mut ArgumentWriter) -> CallResult<()>,
    ) -> OutgoingCall;
}

/// The runtime half of a generated proxy.
#[derive(Clone)]
pub struct ProxyHandle {
    grain_id: GrainId,
    interface: &'static InterfaceDescriptor,
    channel: Weak<dyn CallChannel>,
}

impl ProxyHandle {
    pub(crate) fn new(
        grain_id: GrainId,
        interface: &'static InterfaceDescriptor,
        channel: Weak<dyn CallChannel>,
    ) -> Self {
        Self {
            grain_id,
            interface,
            channel,
        }
    }

    pub fn grain_id(&self) -> GrainId {
        self.grain_id
    }

    pub fn interface(&self) -> &'static InterfaceDescriptor {
        self.interface
    }

    #[doc(hidden)]
    pub fn call<R: RemoteReturn>(
        &self,
        method: &'static str,
        encode: &dyn Fn(&mut ArgumentWriter) -> CallResult<()>,
    ) -> R {
        R::from_call(self.start_call(method, encode))
    }

    fn start_call(
        &self,
        method: &'static str,
        encode: &dyn Fn(&mut ArgumentWriter) -> CallResult<()>,
    ) -> OutgoingCall {
        let Some(descriptor) = self.interface.method(method) else {
            return OutgoingCall::failed(RpcError::marshal(format!(
                "interface '{}' has no method '{method}'",
                self.interface.name
            )));
        };
        let Some(channel) = self.channel.upgrade() else {
            return OutgoingCall::failed(RpcError::NotConnected {
                endpoint: "<disposed>".to_string(),
            });
        };
        channel.send_call(
            CallTarget {
                grain_id: self.grain_id,
                interface: self.interface,
                method: descriptor,
            },
            encode,
        )
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("grain_id", &self.grain_id)
            .field("interface", &self.interface.name)
            .finish()
    }
}

/// Collects the encoded arguments of an outgoing call.
#[derive(Debug, Default)]
pub struct ArgumentWriter {
    values: Vec<Value>,
}

impl ArgumentWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> CallResult<()> {
        self.values.push(codec::to_value(value)?);
        Ok(())
    }

    pub(crate) fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Identifies one inbound invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub endpoint: String,
    pub interface: &'static str,
    pub method: String,
    pub grain_id: GrainId,
    pub rpc_id: RpcId,
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}() (#{}) [rpc #{}]",
            self.endpoint, self.interface, self.method, self.grain_id, self.rpc_id
        )
    }
}

/// An inbound invocation as seen by the generated dispatch code.
#[derive(Debug)]
pub struct IncomingCall {
    site: CallSite,
    args: std::vec::IntoIter<Value>,
}

impl IncomingCall {
    pub(crate) fn new(site: CallSite, args: Vec<Value>) -> Self {
        Self {
            site,
            args: args.into_iter(),
        }
    }

    pub fn method(&self) -> &str {
        &self.site.method
    }

    pub fn site(&self) -> &CallSite {
        &self.site
    }

    /// Decodes the next argument.
    pub fn arg<T: DeserializeOwned>(&mut self) -> CallResult<T> {
        let value = self.args.next().ok_or_else(|| {
            RpcError::marshal(format!(
                "missing argument for {}.{}()",
                self.site.interface, self.site.method
            ))
        })?;
        codec::from_value(value)
    }

    #[doc(hidden)]
    pub fn unknown_method(&self, method: &str) -> RpcError {
        RpcError::TypeMismatch {
            message: format!(
                "{}: interface '{}' of grain #{} has no method '{method}'",
                self.site.endpoint, self.site.interface, self.site.grain_id
            ),
        }
    }
}

enum Outgoing {
    Failed(RpcError),
    Detached,
    Pending {
        call: Arc<PendingCall>,
        scope: Arc<MarshalScope>,
    },
}

/// A call that has been handed to the connection.
pub struct OutgoingCall {
    state: Outgoing,
}

impl OutgoingCall {
    pub(crate) fn failed(err: RpcError) -> Self {
        Self {
            state: Outgoing::Failed(err),
        }
    }

    /// A one-way call; there will be no result.
    pub(crate) fn detached() -> Self {
        Self {
            state: Outgoing::Detached,
        }
    }

    pub(crate) fn pending(call: Arc<PendingCall>, scope: Arc<MarshalScope>) -> Self {
        Self {
            state: Outgoing::Pending { call, scope },
        }
    }

    /// Blocks until the result arrives and decodes it.
    pub fn wait<T: DeserializeOwned>(self) -> CallResult<T> {
        match self.state {
            Outgoing::Failed(err) => Err(err),
            Outgoing::Detached => codec::from_value(Value::Null),
            Outgoing::Pending { call, scope } => {
                let value = call.wait()?;
                let _scope = marshal::enter(scope);
                codec::from_value(value)
            }
        }
    }

    /// Returns a running task that completes when the result arrives.
    pub fn into_task<T: DeserializeOwned + Send + 'static>(self) -> Task<T> {
        match self.state {
            Outgoing::Failed(err) => Task::from_result(Err(err)),
            Outgoing::Detached => Task::from_result(codec::from_value(Value::Null)),
            Outgoing::Pending { call, scope } => {
                let (task, completer) = Task::pending();
                call.on_complete(move |outcome| {
                    let result = outcome.and_then(|value| {
                        let _scope = marshal::enter(scope);
                        codec::from_value(value)
                    });
                    completer.complete(result);
                });
                task
            }
        }
    }
}

/// Return types a remote method may declare.
pub trait RemoteReturn: Sized {
    /// Builds the proxy's return value from a sent call.
    fn from_call(call: OutgoingCall) -> Self;

    /// Encodes the subject's return value as the call's result.
    fn into_reply(self, site: &CallSite) -> CallResult<Value>;
}

impl<T: Serialize + DeserializeOwned> RemoteReturn for CallResult<T> {
    fn from_call(call: OutgoingCall) -> Self {
        call.wait()
    }

    fn into_reply(self, _site: &CallSite) -> CallResult<Value> {
        codec::to_value(&self?)
    }
}

impl<T: Serialize + DeserializeOwned + Send + 'static> RemoteReturn for Task<T> {
    fn from_call(call: OutgoingCall) -> Self {
        call.into_task()
    }

    fn into_reply(self, site: &CallSite) -> CallResult<Value> {
        if !self.is_started() {
            return Err(RpcError::NotSupported {
                interface: site.interface.to_string(),
                method: site.method.clone(),
                grain_id: site.grain_id,
            });
        }
        codec::to_value(&self.wait()?)
    }
}
