//! Endpoint tuning.
//!
//! Durations are stored as milliseconds so the settings read naturally
//! from a JSON file:
//!
//! ```json
//! { "max_concurrent_calls": 500, "heartbeat": { "interval_ms": 250 } }
//! ```
//!
//! Missing fields take their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, Result};

/// Settings of an [`Endpoint`](crate::Endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Outgoing calls allowed to await a result at once. Further calls
    /// block until a slot frees up.
    pub max_concurrent_calls: usize,
    pub handshake_timeout_ms: u64,
    /// How long a local disconnect waits to hand the goodbye to the socket.
    pub goodbye_timeout_ms: u64,
    /// Period of the proxy sweep.
    pub gc_interval_ms: u64,
    /// Idle time after which an invocation worker thread retires.
    pub worker_keep_alive_ms: u64,
    pub heartbeat: HeartbeatSettings,
    pub latency: LatencySettings,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 2000,
            handshake_timeout_ms: 60_000,
            goodbye_timeout_ms: 500,
            gc_interval_ms: 100,
            worker_keep_alive_ms: 10_000,
            heartbeat: HeartbeatSettings::default(),
            latency: LatencySettings::default(),
        }
    }
}

impl EndpointSettings {
    /// Reads settings from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            EndpointError::Settings(format!("failed to read {}: {err}", path.display()))
        })?;
        let settings: Self = serde_json::from_str(&text).map_err(|err| {
            EndpointError::Settings(format!("invalid settings in {}: {err}", path.display()))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |what: &str| Err(EndpointError::Settings(format!("{what} must be greater than zero")));
        if self.max_concurrent_calls == 0 {
            return invalid("max_concurrent_calls");
        }
        if self.handshake_timeout_ms == 0 {
            return invalid("handshake_timeout_ms");
        }
        if self.gc_interval_ms == 0 {
            return invalid("gc_interval_ms");
        }
        if self.heartbeat.interval_ms == 0 {
            return invalid("heartbeat.interval_ms");
        }
        if self.latency.interval_ms == 0 {
            return invalid("latency.interval_ms");
        }
        if self.latency.num_samples == 0 {
            return invalid("latency.num_samples");
        }
        Ok(())
    }

    pub fn with_max_concurrent_calls(mut self, max: usize) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = millis(timeout);
        self
    }

    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval_ms = millis(interval);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatSettings) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_latency(mut self, latency: LatencySettings) -> Self {
        self.latency = latency;
        self
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn goodbye_timeout(&self) -> Duration {
        Duration::from_millis(self.goodbye_timeout_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn worker_keep_alive(&self) -> Duration {
        Duration::from_millis(self.worker_keep_alive_ms)
    }
}

/// Heartbeat monitoring of the connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
    /// Missed beats tolerated before the connection is declared dead.
    pub skipped_heartbeat_threshold: u32,
    /// When false, heartbeats are still sent but never end the connection.
    pub use_failure_detection: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            skipped_heartbeat_threshold: 10,
            use_failure_detection: true,
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// How long one heartbeat may go unanswered.
    pub fn failure_interval(&self) -> Duration {
        self.interval() * self.skipped_heartbeat_threshold.saturating_add(1)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = millis(interval);
        self
    }

    pub fn with_skipped_heartbeat_threshold(mut self, threshold: u32) -> Self {
        self.skipped_heartbeat_threshold = threshold;
        self
    }

    pub fn with_failure_detection(mut self, enabled: bool) -> Self {
        self.use_failure_detection = enabled;
        self
    }
}

/// Roundtrip time measurements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencySettings {
    pub interval_ms: u64,
    /// Size of the window the reported roundtrip time averages over.
    pub num_samples: usize,
    pub perform_measurements: bool,
}

impl Default for LatencySettings {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            num_samples: 10,
            perform_measurements: true,
        }
    }
}

impl LatencySettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = millis(interval);
        self
    }

    pub fn with_measurements(mut self, enabled: bool) -> Self {
        self.perform_measurements = enabled;
        self
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
