use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, Result};

/// Numeric identity of a servant or proxy.
pub type GrainId = u64;

/// Correlates a call with its result.
pub type RpcId = u64;

/// Grain id of the heartbeat servant/proxy pair present on every endpoint.
pub const HEARTBEAT_GRAIN_ID: GrainId = u64::MAX - 1;

/// Grain id of the latency servant/proxy pair present on every endpoint.
pub const LATENCY_GRAIN_ID: GrainId = u64::MAX - 2;

/// First id of the block reserved for internal grains.
pub const RESERVED_GRAIN_IDS_START: GrainId = u64::MAX - 16;

/// First id handed out to implicit servants.
pub const IMPLICIT_GRAIN_IDS_START: GrainId = 1 << 63;

/// True for ids owned by the runtime itself.
pub fn is_reserved(grain_id: GrainId) -> bool {
    grain_id >= RESERVED_GRAIN_IDS_START
}

/// Identity of one successful connection episode of an endpoint.
///
/// The n-th successful connection of an endpoint is `ConnectionId(n)`;
/// ids are never reused. [`ConnectionId::NONE`] means "not connected".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const NONE: ConnectionId = ConnectionId(0);

    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self == Self::NONE
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

/// Mints grain ids for servants created implicitly by by-reference marshalling.
#[derive(Debug)]
pub struct GrainIdGenerator {
    next: AtomicU64,
    last: GrainId,
}

impl GrainIdGenerator {
    pub fn new() -> Self {
        Self::with_range(IMPLICIT_GRAIN_IDS_START, RESERVED_GRAIN_IDS_START - 1)
    }

    /// Generator over the inclusive range `first..=last`.
    pub fn with_range(first: GrainId, last: GrainId) -> Self {
        Self {
            next: AtomicU64::new(first),
            last,
        }
    }

    pub fn next_id(&self) -> Result<GrainId> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| {
                (id <= self.last).then(|| id.saturating_add(1))
            })
            .map_err(|_| EndpointError::GrainIdRangeExhausted)
    }
}

impl Default for GrainIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_starts_in_upper_half() {
        let ids = GrainIdGenerator::new();
        assert_eq!(ids.next_id().unwrap(), 1 << 63);
        assert_eq!(ids.next_id().unwrap(), (1 << 63) + 1);
    }

    #[test]
    fn generator_reports_exhaustion() {
        let ids = GrainIdGenerator::with_range(10, 11);
        assert_eq!(ids.next_id().unwrap(), 10);
        assert_eq!(ids.next_id().unwrap(), 11);
        assert!(matches!(
            ids.next_id(),
            Err(EndpointError::GrainIdRangeExhausted)
        ));
        assert!(ids.next_id().is_err());
    }

    #[test]
    fn internal_grains_are_reserved() {
        assert!(is_reserved(HEARTBEAT_GRAIN_ID));
        assert!(is_reserved(LATENCY_GRAIN_ID));
        assert!(!is_reserved(IMPLICIT_GRAIN_IDS_START));
        assert!(!is_reserved(42));
    }

    #[test]
    fn connection_id_display() {
        assert_eq!(ConnectionId::NONE.to_string(), "none");
        assert_eq!(ConnectionId::new(3).to_string(), "#3");
    }
}
