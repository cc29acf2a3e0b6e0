//! Execution of inbound invocations.
//!
//! The reader thread resolves the servant, draws the ordering ticket and
//! hands the invocation to the worker pool. Workers run the servant inside
//! the endpoint's marshal scope and send the result back on the connection
//! the invocation arrived on.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info_span, warn};

use crate::connection::{Connection, DisconnectReason};
use crate::error::{CallResult, RemoteException, RpcError};
use crate::ids::RpcId;
use crate::interface::MethodDescriptor;
use crate::marshal::{self, MarshalScope};
use crate::message::{Invocation, Message, MethodResult, Outcome};
use crate::ordering::{Gates, OrderingKey, Ticket};
use crate::pool::WorkerPool;
use crate::proxy::{CallSite, IncomingCall};
use crate::registry::{GrainRegistry, Servant};
use crate::stats::StatCounters;

struct DispatchShared {
    endpoint: String,
    scope: Arc<MarshalScope>,
    stats: Arc<StatCounters>,
    gates: Gates,
    /// Invocations whose result is still owed to the peer.
    in_flight: Mutex<HashSet<RpcId>>,
}

impl DispatchShared {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<RpcId>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) struct Dispatcher {
    shared: Arc<DispatchShared>,
    registry: Arc<GrainRegistry>,
    pool: WorkerPool,
}

impl Dispatcher {
    pub(crate) fn new(
        endpoint: impl Into<String>,
        registry: Arc<GrainRegistry>,
        scope: Arc<MarshalScope>,
        stats: Arc<StatCounters>,
        keep_alive: Duration,
    ) -> Self {
        let endpoint = endpoint.into();
        Self {
            pool: WorkerPool::new(endpoint.clone(), keep_alive),
            shared: Arc::new(DispatchShared {
                endpoint,
                scope,
                stats,
                gates: Gates::default(),
                in_flight: Mutex::new(HashSet::new()),
            }),
            registry,
        }
    }

    /// Queues `invocation` for execution. Errors that concern only this
    /// call are answered right away; only protocol violations end the
    /// connection.
    pub(crate) fn dispatch(
        &self,
        connection: &Arc<Connection>,
        invocation: Invocation,
    ) -> Result<(), DisconnectReason> {
        let (servant, method) = match self.resolve(&invocation) {
            Ok(resolved) => resolved,
            Err(err) => {
                debug!(
                    rpc_id = invocation.rpc_id,
                    grain = invocation.grain_id,
                    method = %invocation.method,
                    error = %err,
                    "rejecting invocation"
                );
                if !invocation.one_way {
                    self.shared.reply(connection, invocation.rpc_id, Err(err));
                }
                return Ok(());
            }
        };

        if !invocation.one_way && !self.shared.in_flight().insert(invocation.rpc_id) {
            warn!(
                connection_id = %connection.id(),
                rpc_id = invocation.rpc_id,
                "peer reused the id of a call still in progress"
            );
            return Err(DisconnectReason::RpcDuplicateRequest);
        }

        let interface = servant.interface().name;
        let key = OrderingKey::for_call(method.dispatch, interface, servant.grain_id(), method.name);
        let span_name = key.as_ref().map_or_else(
            || format!("{interface}.{}() (#{})", method.name, servant.grain_id()),
            OrderingKey::display_name,
        );
        let ticket = key.map(|key| self.shared.gates.ticket(key));

        let shared = Arc::clone(&self.shared);
        let connection = Arc::clone(connection);
        self.pool.execute(move || {
            let span = info_span!(
                "invoke",
                key = %span_name,
                rpc_id = invocation.rpc_id,
                grain = invocation.grain_id
            );
            let _span = span.enter();
            shared.run(&connection, &servant, invocation, ticket);
        });
        Ok(())
    }

    fn resolve(
        &self,
        invocation: &Invocation,
    ) -> CallResult<(Arc<Servant>, &'static MethodDescriptor)> {
        let Some(servant) = self.registry.servant(invocation.grain_id) else {
            return Err(RpcError::NoSuchServant {
                endpoint: self.shared.endpoint.clone(),
                grain_id: invocation.grain_id,
                interface: invocation.interface.clone(),
                method: invocation.method.clone(),
                num_servants: self.registry.num_servants(),
                num_proxies: self.registry.num_proxies(),
            });
        };

        let expected = servant.interface().name;
        if expected != invocation.interface {
            return Err(RpcError::TypeMismatch {
                message: format!(
                    "{}: There was a type mismatch when invoking RPC #{} '{}' on grain #{}: \
                     Expected '{}' but found '{}'",
                    self.shared.endpoint,
                    invocation.rpc_id,
                    invocation.method,
                    invocation.grain_id,
                    invocation.interface,
                    expected
                ),
            });
        }

        let method = servant.interface().method(&invocation.method).ok_or_else(|| {
            RpcError::TypeMismatch {
                message: format!(
                    "{}: interface '{expected}' of grain #{} has no method '{}'",
                    self.shared.endpoint, invocation.grain_id, invocation.method
                ),
            }
        })?;
        Ok((servant, method))
    }

    /// Forgets owed results. Workers still running drop theirs.
    pub(crate) fn clear_invocations(&self) -> usize {
        let mut in_flight = self.shared.in_flight();
        let count = in_flight.len();
        in_flight.clear();
        count
    }

    pub(crate) fn num_pending_invocations(&self) -> usize {
        self.shared.in_flight().len()
    }

    pub(crate) fn shutdown(&self) {
        self.pool.shutdown();
    }
}

impl DispatchShared {
    fn run(
        &self,
        connection: &Connection,
        servant: &Servant,
        invocation: Invocation,
        ticket: Option<Ticket>,
    ) {
        let turn = ticket.as_ref().map(Ticket::enter);
        if connection.is_closed() {
            debug!("connection closed before the invocation ran");
            drop(turn);
            self.retire(ticket);
            return;
        }

        let site = CallSite {
            endpoint: self.endpoint.clone(),
            interface: servant.interface().name,
            method: invocation.method,
            grain_id: invocation.grain_id,
            rpc_id: invocation.rpc_id,
        };
        let mut call = IncomingCall::new(site.clone(), invocation.args);
        let result = {
            let _scope = marshal::enter(Arc::clone(&self.scope));
            panic::catch_unwind(AssertUnwindSafe(|| servant.invoke(&mut call)))
                .unwrap_or_else(|panic| Err(panic_error(panic)))
        };
        drop(turn);
        self.retire(ticket);

        let result = result.map_err(|err| err.with_remote_frame(&site.to_string()));
        if invocation.one_way {
            if let Err(err) = result {
                warn!(error = %err, "one-way invocation failed");
            }
            return;
        }
        if !self.in_flight().remove(&site.rpc_id) {
            debug!("dropping the result of an invocation cancelled by disconnect");
            return;
        }
        self.reply(connection, site.rpc_id, result);
    }

    fn retire(&self, ticket: Option<Ticket>) {
        if let Some(ticket) = ticket {
            self.gates.retire(ticket);
        }
    }

    fn reply(&self, connection: &Connection, rpc_id: RpcId, result: CallResult<Value>) {
        let message = Message::Result(MethodResult {
            rpc_id,
            outcome: Outcome::from_result(result),
        });
        match connection.send(&message) {
            Ok(()) => self.stats.record_call_answered(),
            Err(err) => debug!(rpc_id, error = %err, "failed to send result"),
        }
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> RpcError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "servant panicked".to_string());
    RpcError::Remote(RemoteException {
        type_name: "panic".to_string(),
        message,
        remote_trace: String::new(),
        payload: None,
    })
}
