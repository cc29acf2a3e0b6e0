//! Connection liveness.
//!
//! Both sides register a heartbeat servant under [`HEARTBEAT_GRAIN_ID`]
//! and hold a proxy to the peer's. While connected, a monitor thread beats
//! once per interval. A beat unanswered for the failure interval ends the
//! connection with `HeartbeatFailure`, unless frames kept arriving in the
//! meantime: then the peer is merely busy working through a backlog.
//!
//! [`HEARTBEAT_GRAIN_ID`]: crate::ids::HEARTBEAT_GRAIN_ID

use std::io;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::connection::Connection;
use crate::remote_interface;
use crate::settings::HeartbeatSettings;
use crate::signal::StopSignal;
use crate::task::Task;

remote_interface! {
    pub(crate) trait Heartbeat as "grainrpc.Heartbeat" {
        fn beat(&self) -> Task<()>;
    }
}

/// Answers the peer's beats.
pub(crate) struct HeartbeatServant;

impl Heartbeat for HeartbeatServant {
    fn beat(&self) -> Task<()> {
        Task::ready(())
    }
}

/// Starts beating on `connection`. `on_failure` runs at most once, on the
/// monitor thread, when the peer stopped answering.
pub(crate) fn start_monitor(
    endpoint: &str,
    connection: Arc<Connection>,
    peer: Arc<dyn Heartbeat>,
    settings: HeartbeatSettings,
    on_failure: impl FnOnce() + Send + 'static,
) -> io::Result<Arc<StopSignal>> {
    let stop = Arc::new(StopSignal::new());
    let signal = Arc::clone(&stop);
    thread::Builder::new()
        .name(format!("{endpoint}-heartbeat"))
        .spawn(move || {
            if run_monitor(&connection, peer.as_ref(), &settings, &signal) {
                on_failure();
            }
        })?;
    Ok(stop)
}

/// Returns true when the connection should be failed.
fn run_monitor(
    connection: &Connection,
    peer: &dyn Heartbeat,
    settings: &HeartbeatSettings,
    stop: &StopSignal,
) -> bool {
    let failure_interval = settings.failure_interval();
    loop {
        if stop.wait(settings.interval()) {
            return false;
        }
        let beat = peer.beat();
        match beat.wait_timeout(failure_interval) {
            Some(Ok(())) => {}
            Some(Err(err)) if err.is_connection_error() => return false,
            Some(Err(err)) => {
                debug!(connection_id = %connection.id(), error = %err, "heartbeat failed");
            }
            None => {
                if stop.is_stopped() {
                    return false;
                }
                if !settings.use_failure_detection {
                    warn!(
                        connection_id = %connection.id(),
                        timeout_ms = failure_interval.as_millis() as u64,
                        "heartbeat not answered, failure detection disabled"
                    );
                    continue;
                }
                let idle = connection.since_last_read();
                if idle < failure_interval {
                    warn!(
                        connection_id = %connection.id(),
                        idle_ms = idle.as_millis() as u64,
                        "heartbeat not answered but the connection is busy"
                    );
                    continue;
                }
                warn!(
                    connection_id = %connection.id(),
                    idle_ms = idle.as_millis() as u64,
                    "heartbeat not answered, declaring the connection dead"
                );
                return true;
            }
        }
    }
}
