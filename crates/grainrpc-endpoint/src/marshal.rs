//! By-reference marshalling.
//!
//! A [`ByRef`] travels as a grain reference instead of a copy of the
//! object. The `origin` of a reference is relative to the message that
//! carries it: `Sender` means the grain lives at the endpoint that wrote
//! the message, `Receiver` means it lives at the endpoint reading it.
//!
//! Encoding and decoding happen inside a thread-local [`MarshalScope`]
//! that gives `ByRef`'s serde impls access to the endpoint's registry.

use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CallResult, EndpointError, RpcError};
use crate::ids::GrainId;
use crate::interface::RemoteInterface;
use crate::proxy::CallChannel;
use crate::registry::GrainRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrainOrigin {
    Sender,
    Receiver,
}

/// Wire form of a by-reference value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrainRef {
    pub id: GrainId,
    pub origin: GrainOrigin,
}

/// A remote interface passed by reference.
///
/// Sending a local subject creates (or reuses) a servant for it; the peer
/// receives a proxy. Sending a proxy back to the endpoint that owns the
/// grain yields the original subject there, never a proxy of a proxy.
pub struct ByRef<I: ?Sized>(Arc<I>);

impl<I: ?Sized> ByRef<I> {
    pub fn new(object: Arc<I>) -> Self {
        Self(object)
    }

    pub fn into_inner(self) -> Arc<I> {
        self.0
    }

    pub fn as_arc(&self) -> &Arc<I> {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<I: ?Sized> Clone for ByRef<I> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<I: ?Sized> Deref for ByRef<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.0
    }
}

impl<I: ?Sized> From<Arc<I>> for ByRef<I> {
    fn from(object: Arc<I>) -> Self {
        Self(object)
    }
}

impl<I: ?Sized> fmt::Debug for ByRef<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByRef({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

impl<I: ?Sized + RemoteInterface> Serialize for ByRef<I> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let grain = with_scope(|scope| scope.export(&self.0)).map_err(S::Error::custom)?;
        grain.serialize(serializer)
    }
}

impl<'de, I: ?Sized + RemoteInterface> Deserialize<'de> for ByRef<I> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let grain = GrainRef::deserialize(deserializer)?;
        with_scope(|scope| scope.import::<I>(grain))
            .map(ByRef)
            .map_err(D::Error::custom)
    }
}

/// Registry access for by-reference values of one endpoint.
pub(crate) struct MarshalScope {
    endpoint: String,
    registry: Arc<GrainRegistry>,
    channel: Weak<dyn CallChannel>,
}

impl MarshalScope {
    pub(crate) fn new(
        endpoint: impl Into<String>,
        registry: Arc<GrainRegistry>,
        channel: Weak<dyn CallChannel>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            registry,
            channel,
        }
    }

    fn export<I: ?Sized + RemoteInterface>(&self, object: &Arc<I>) -> CallResult<GrainRef> {
        if let Some(id) = self.registry.proxy_id(object) {
            return Ok(GrainRef {
                id,
                origin: GrainOrigin::Receiver,
            });
        }
        let id = self
            .registry
            .get_existing_or_create_new_servant(object)
            .map_err(registry_error)?;
        Ok(GrainRef {
            id,
            origin: GrainOrigin::Sender,
        })
    }

    fn import<I: ?Sized + RemoteInterface>(&self, grain: GrainRef) -> CallResult<Arc<I>> {
        match grain.origin {
            GrainOrigin::Sender => self
                .registry
                .get_existing_or_create_new_proxy::<I>(grain.id, self.channel.clone(), true)
                .map_err(registry_error),
            GrainOrigin::Receiver => {
                self.registry
                    .retrieve_subject::<I>(grain.id)
                    .ok_or_else(|| RpcError::NoSuchServant {
                        endpoint: self.endpoint.clone(),
                        grain_id: grain.id,
                        interface: I::descriptor().name.to_string(),
                        method: String::new(),
                        num_servants: self.registry.num_servants(),
                        num_proxies: self.registry.num_proxies(),
                    })
            }
        }
    }
}

fn registry_error(err: EndpointError) -> RpcError {
    match err {
        EndpointError::TypeMismatch(message) => RpcError::TypeMismatch { message },
        other => RpcError::marshal(other),
    }
}

thread_local! {
    static SCOPES: RefCell<Vec<Arc<MarshalScope>>> = const { RefCell::new(Vec::new()) };
}

/// Keeps a scope active until dropped.
pub(crate) struct ScopeGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        SCOPES.with(|scopes| {
            scopes.borrow_mut().pop();
        });
    }
}

pub(crate) fn enter(scope: Arc<MarshalScope>) -> ScopeGuard {
    SCOPES.with(|scopes| scopes.borrow_mut().push(scope));
    ScopeGuard {
        _not_send: std::marker::PhantomData,
    }
}

fn with_scope<R>(f: impl FnOnce(&MarshalScope) -> CallResult<R>) -> CallResult<R> {
    let scope = SCOPES
        .with(|scopes| scopes.borrow().last().cloned())
        .ok_or_else(|| {
            RpcError::marshal("by-reference values can only be sent through an endpoint")
        })?;
    f(&scope)
}
