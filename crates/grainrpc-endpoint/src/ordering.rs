//! Per-key serialization of inbound invocations.
//!
//! Each serialized ordering key owns a FIFO ticket gate. The reader thread
//! draws a ticket when the invocation arrives, so execution order under a
//! key equals arrival order. The worker then waits for its turn.
//!
//! A worker blocked on a nested outgoing call gives its turn away for the
//! duration of the wait (see [`blocking_section`]) and queues up again
//! afterwards. Otherwise a serialized method that calls back into its own
//! key would deadlock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::ids::GrainId;
use crate::interface::Dispatch;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum OrderingKey {
    Type(&'static str),
    Object(&'static str, GrainId),
    Method(&'static str, GrainId, String),
}

impl OrderingKey {
    pub(crate) fn for_call(
        dispatch: Dispatch,
        interface: &'static str,
        grain_id: GrainId,
        method: &str,
    ) -> Option<Self> {
        match dispatch {
            Dispatch::Unordered | Dispatch::Async => None,
            Dispatch::SerializePerType => Some(OrderingKey::Type(interface)),
            Dispatch::SerializePerObject => Some(OrderingKey::Object(interface, grain_id)),
            Dispatch::SerializePerMethod => {
                Some(OrderingKey::Method(interface, grain_id, method.to_string()))
            }
        }
    }

    /// Diagnostic name of the key, used as the invocation span name.
    pub(crate) fn display_name(&self) -> String {
        match self {
            OrderingKey::Type(interface) => (*interface).to_string(),
            OrderingKey::Object(interface, grain_id) => format!("{interface} (#{grain_id})"),
            OrderingKey::Method(interface, grain_id, method) => {
                format!("{interface}.{method}() (#{grain_id})")
            }
        }
    }
}

#[derive(Debug, Default)]
struct GateState {
    next_ticket: u64,
    now_serving: u64,
}

/// FIFO ticket lock.
#[derive(Debug, Default)]
pub(crate) struct SerialGate {
    state: Mutex<GateState>,
    turn: Condvar,
}

impl SerialGate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn ticket(&self) -> u64 {
        let mut state = self.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        ticket
    }

    fn wait_for(&self, ticket: u64) {
        let mut state = self.lock();
        while state.now_serving != ticket {
            state = self
                .turn
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn advance(&self) {
        let mut state = self.lock();
        state.now_serving += 1;
        self.turn.notify_all();
    }

    /// Waits until `ticket` is served. The turn ends when the guard drops.
    pub(crate) fn enter(self: &Arc<Self>, ticket: u64) -> SerialTurn {
        self.wait_for(ticket);
        HELD.with(|held| held.borrow_mut().push(Arc::clone(self)));
        SerialTurn {
            gate: Arc::clone(self),
        }
    }
}

/// One turn on a [`SerialGate`].
pub(crate) struct SerialTurn {
    gate: Arc<SerialGate>,
}

impl Drop for SerialTurn {
    fn drop(&mut self) {
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|g| Arc::ptr_eq(g, &self.gate)) {
                held.remove(pos);
            }
        });
        self.gate.advance();
    }
}

thread_local! {
    static HELD: RefCell<Vec<Arc<SerialGate>>> = const { RefCell::new(Vec::new()) };
}

/// Runs a blocking wait without holding this thread's serial turns.
pub(crate) fn blocking_section<R>(wait: impl FnOnce() -> R) -> R {
    let held = HELD.with(|held| std::mem::take(&mut *held.borrow_mut()));
    for gate in &held {
        gate.advance();
    }

    let result = wait();

    for gate in &held {
        let ticket = gate.ticket();
        gate.wait_for(ticket);
    }
    HELD.with(|slot| *slot.borrow_mut() = held);
    result
}

/// A place in the queue of one gate, drawn on arrival.
pub(crate) struct Ticket {
    key: OrderingKey,
    gate: Arc<SerialGate>,
    number: u64,
}

impl Ticket {
    pub(crate) fn enter(&self) -> SerialTurn {
        self.gate.enter(self.number)
    }
}

/// The gates of one endpoint. A gate lives only while some invocation
/// holds a ticket for it.
#[derive(Debug, Default)]
pub(crate) struct Gates {
    gates: Mutex<HashMap<OrderingKey, Arc<SerialGate>>>,
}

impl Gates {
    fn lock(&self) -> MutexGuard<'_, HashMap<OrderingKey, Arc<SerialGate>>> {
        self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn ticket(&self, key: OrderingKey) -> Ticket {
        let mut gates = self.lock();
        let gate = Arc::clone(gates.entry(key.clone()).or_default());
        let number = gate.ticket();
        Ticket { key, gate, number }
    }

    /// Returns a used ticket. The gate is dropped once no other ticket or
    /// turn refers to it.
    pub(crate) fn retire(&self, ticket: Ticket) {
        let Ticket { key, gate, .. } = ticket;
        let mut gates = self.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&gate) == 2
            && gates.get(&key).is_some_and(|current| Arc::ptr_eq(current, &gate))
        {
            gates.remove(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
