//! Roundtrip time measurement over the reserved latency grain.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::connection::Connection;
use crate::error::CallResult;
use crate::remote_interface;
use crate::settings::LatencySettings;
use crate::signal::StopSignal;

remote_interface! {
    pub(crate) trait Latency as "grainrpc.Latency" {
        fn roundtrip(&self) -> CallResult<()>;
    }
}

pub(crate) struct LatencyServant;

impl Latency for LatencyServant {
    fn roundtrip(&self) -> CallResult<()> {
        Ok(())
    }
}

/// The most recent roundtrip samples.
#[derive(Debug)]
pub(crate) struct RoundtripSamples {
    samples: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl RoundtripSamples {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn samples(&self) -> MutexGuard<'_, VecDeque<Duration>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, sample: Duration) {
        let mut samples = self.samples();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Mean of the window, zero before the first sample.
    pub(crate) fn mean(&self) -> Duration {
        let samples = self.samples();
        if samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = samples.iter().sum();
        total / samples.len() as u32
    }

    pub(crate) fn clear(&self) {
        self.samples().clear();
    }
}

pub(crate) fn start_monitor(
    endpoint: &str,
    connection: Arc<Connection>,
    peer: Arc<dyn Latency>,
    settings: LatencySettings,
    samples: Arc<RoundtripSamples>,
) -> io::Result<Arc<StopSignal>> {
    let stop = Arc::new(StopSignal::new());
    let signal = Arc::clone(&stop);
    thread::Builder::new()
        .name(format!("{endpoint}-latency"))
        .spawn(move || {
            while !signal.wait(settings.interval()) {
                let started = Instant::now();
                match peer.roundtrip() {
                    Ok(()) => samples.record(started.elapsed()),
                    Err(err) if err.is_connection_error() => break,
                    Err(err) => {
                        debug!(connection_id = %connection.id(), error = %err, "latency probe failed");
                    }
                }
            }
        })?;
    Ok(stop)
}
