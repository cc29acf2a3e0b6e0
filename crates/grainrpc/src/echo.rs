//! The echo grain served by `grainrpc serve`.

use std::sync::atomic::{AtomicU64, Ordering};

use grainrpc_endpoint::{remote_interface, CallResult};

/// Grain id the echo servant is registered under unless told otherwise.
pub const DEFAULT_ECHO_GRAIN: u64 = 1;

remote_interface! {
    /// Answers with what it was sent.
    pub trait Echo as "grainrpc.Echo" {
        fn echo(&self, message: String) -> CallResult<String>;
        /// Number of echo calls answered so far.
        fn calls(&self) -> CallResult<u64>;
    }
}

#[derive(Debug, Default)]
pub struct EchoServant {
    calls: AtomicU64,
}

impl Echo for EchoServant {
    fn echo(&self, message: String) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(message)
    }

    fn calls(&self) -> CallResult<u64> {
        Ok(self.calls.load(Ordering::Relaxed))
    }
}
