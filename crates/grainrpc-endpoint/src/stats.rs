use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::registry::CollectionStats;

/// Counters shared by the threads of one endpoint.
#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    calls_invoked: AtomicU64,
    calls_answered: AtomicU64,
    gc_sweeps: AtomicU64,
}

impl StatCounters {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_call_invoked(&self) {
        self.calls_invoked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_call_answered(&self) {
        self.calls_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_gc_sweep(&self) {
        self.gc_sweeps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, collection: CollectionStats) -> EndpointStatistics {
        EndpointStatistics {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            calls_invoked: self.calls_invoked.load(Ordering::Relaxed),
            calls_answered: self.calls_answered.load(Ordering::Relaxed),
            gc_sweeps: self.gc_sweeps.load(Ordering::Relaxed),
            num_proxies_collected: collection.num_proxies_collected,
            num_servants_collected: collection.num_servants_collected,
            total_gc_time: collection.total_gc_time,
        }
    }
}

/// A point-in-time view of an endpoint's traffic over its whole lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStatistics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    /// Outgoing calls handed to a connection.
    pub calls_invoked: u64,
    /// Incoming calls whose result was sent back.
    pub calls_answered: u64,
    pub gc_sweeps: u64,
    pub num_proxies_collected: u64,
    pub num_servants_collected: u64,
    pub total_gc_time: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let counters = StatCounters::default();
        counters.record_sent(10);
        counters.record_sent(5);
        counters.record_received(7);
        counters.record_call_invoked();
        counters.record_gc_sweep();

        let stats = counters.snapshot(CollectionStats {
            num_proxies_collected: 3,
            ..CollectionStats::default()
        });
        assert_eq!(stats.messages_sent, 2);
        assert_eq!(stats.bytes_sent, 15);
        assert_eq!(stats.bytes_received, 7);
        assert_eq!(stats.calls_invoked, 1);
        assert_eq!(stats.calls_answered, 0);
        assert_eq!(stats.gc_sweeps, 1);
        assert_eq!(stats.num_proxies_collected, 3);
    }
}
