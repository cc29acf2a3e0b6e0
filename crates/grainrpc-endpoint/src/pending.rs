use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde_json::Value;
use tracing::debug;

use crate::error::{CallResult, RpcError};
use crate::ids::{GrainId, RpcId};
use crate::ordering;

type Callback = Box<dyn FnOnce(CallResult<Value>) + Send + 'static>;

#[derive(Default)]
struct CallState {
    outcome: Option<CallResult<Value>>,
    callback: Option<Callback>,
    completed: bool,
}

/// An outgoing call awaiting its result.
pub(crate) struct PendingCall {
    rpc_id: RpcId,
    grain_id: GrainId,
    method: &'static str,
    state: Mutex<CallState>,
    done: Condvar,
}

impl PendingCall {
    fn new(rpc_id: RpcId, grain_id: GrainId, method: &'static str) -> Self {
        Self {
            rpc_id,
            grain_id,
            method,
            state: Mutex::new(CallState::default()),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn rpc_id(&self) -> RpcId {
        self.rpc_id
    }

    /// Stores the outcome. Only the first completion has an effect.
    pub(crate) fn complete(&self, outcome: CallResult<Value>) -> bool {
        let callback = {
            let mut state = self.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
            match state.callback.take() {
                Some(callback) => Some((callback, outcome)),
                None => {
                    state.outcome = Some(outcome);
                    self.done.notify_all();
                    None
                }
            }
        };
        if let Some((callback, outcome)) = callback {
            callback(outcome);
        }
        true
    }

    /// Runs `callback` with the outcome, immediately if it is already known.
    pub(crate) fn on_complete(&self, callback: impl FnOnce(CallResult<Value>) + Send + 'static) {
        let ready = {
            let mut state = self.lock();
            match state.outcome.take() {
                Some(outcome) => Some(outcome),
                None => {
                    state.callback = Some(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(outcome) = ready {
            callback(outcome);
        }
    }

    /// Blocks the calling thread until the outcome is known.
    pub(crate) fn wait(&self) -> CallResult<Value> {
        ordering::blocking_section(|| {
            let mut state = self.lock();
            loop {
                if let Some(outcome) = state.outcome.take() {
                    return outcome;
                }
                state = self
                    .done
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        })
    }
}

struct CallTable {
    calls: HashMap<RpcId, Arc<PendingCall>>,
    accepting: bool,
}

/// The outgoing calls of one endpoint.
///
/// Rpc ids are minted per endpoint and never reused across connections.
pub(crate) struct PendingCalls {
    endpoint: String,
    max_concurrent_calls: usize,
    next_rpc_id: AtomicU64,
    table: Mutex<CallTable>,
    slot_freed: Condvar,
}

impl PendingCalls {
    pub(crate) fn new(endpoint: impl Into<String>, max_concurrent_calls: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            max_concurrent_calls: max_concurrent_calls.max(1),
            next_rpc_id: AtomicU64::new(1),
            table: Mutex::new(CallTable {
                calls: HashMap::new(),
                accepting: false,
            }),
            slot_freed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CallTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn next_rpc_id(&self) -> RpcId {
        self.next_rpc_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Opens the table for a new connection.
    pub(crate) fn start_accepting(&self) {
        self.lock().accepting = true;
    }

    /// Registers a new call, blocking while the table is full.
    pub(crate) fn enqueue(
        &self,
        grain_id: GrainId,
        method: &'static str,
    ) -> CallResult<Arc<PendingCall>> {
        let mut table = self.lock();
        loop {
            if !table.accepting {
                return Err(RpcError::NotConnected {
                    endpoint: self.endpoint.clone(),
                });
            }
            if table.calls.len() < self.max_concurrent_calls {
                break;
            }
            table = self
                .slot_freed
                .wait(table)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        let call = Arc::new(PendingCall::new(self.next_rpc_id(), grain_id, method));
        table.calls.insert(call.rpc_id, Arc::clone(&call));
        Ok(call)
    }

    /// Completes the call `rpc_id`. Returns false if it is unknown.
    pub(crate) fn complete(&self, rpc_id: RpcId, outcome: CallResult<Value>) -> bool {
        let call = {
            let mut table = self.lock();
            let call = table.calls.remove(&rpc_id);
            if call.is_some() {
                self.slot_freed.notify_one();
            }
            call
        };
        match call {
            Some(call) => call.complete(outcome),
            None => false,
        }
    }

    /// Fails every pending call with `ConnectionLost` and stops accepting
    /// new calls until [`PendingCalls::start_accepting`].
    #[cfg(test)]
    pub(crate) fn cancel_all(&self) -> usize {
        let calls = self.stop_accepting();
        self.fail_all(&calls);
        calls.len()
    }

    /// Refuses new calls and takes the outstanding ones out of the table.
    pub(crate) fn stop_accepting(&self) -> Vec<Arc<PendingCall>> {
        let mut table = self.lock();
        table.accepting = false;
        self.slot_freed.notify_all();
        table.calls.drain().map(|(_, call)| call).collect()
    }

    /// Fails calls taken by [`stop_accepting`](Self::stop_accepting).
    /// Completion callbacks run on the calling thread.
    pub(crate) fn fail_all(&self, calls: &[Arc<PendingCall>]) {
        for call in calls {
            debug!(
                rpc_id = call.rpc_id,
                grain = call.grain_id,
                method = call.method,
                "cancelling pending call"
            );
            call.complete(Err(RpcError::ConnectionLost {
                endpoint: self.endpoint.clone(),
            }));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().calls.len()
    }
}
