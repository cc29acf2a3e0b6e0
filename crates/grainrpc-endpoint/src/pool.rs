use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct PoolState {
    queue: VecDeque<Job>,
    idle: usize,
    threads: usize,
    spawned: usize,
    shutdown: bool,
}

struct PoolShared {
    name: String,
    state: Mutex<PoolState>,
    available: Condvar,
    keep_alive: Duration,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Elastic pool of worker threads.
///
/// A job never waits for another job to finish: when no worker is idle a
/// new one is spawned. Idle workers exit after `keep_alive`.
pub(crate) struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub(crate) fn new(name: impl Into<String>, keep_alive: Duration) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                state: Mutex::new(PoolState::default()),
                available: Condvar::new(),
                keep_alive,
            }),
        }
    }

    pub(crate) fn execute(&self, job: impl FnOnce() + Send + 'static) {
        let spawn_index = {
            let mut state = self.shared.lock();
            if state.shutdown {
                debug!(pool = %self.shared.name, "worker pool is shut down, dropping job");
                return;
            }
            state.queue.push_back(Box::new(job));
            if state.queue.len() > state.idle {
                state.threads += 1;
                state.spawned += 1;
                Some(state.spawned)
            } else {
                self.shared.available.notify_one();
                None
            }
        };

        if let Some(index) = spawn_index {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-worker-{index}", self.shared.name))
                .spawn(move || worker_loop(shared));
            if let Err(err) = spawned {
                warn!(pool = %self.shared.name, error = %err, "failed to spawn worker thread");
                self.shared.lock().threads -= 1;
            }
        }
    }

    /// Stops accepting jobs. Queued jobs still run.
    pub(crate) fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        self.shared.available.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn threads(&self) -> usize {
        self.shared.lock().threads
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break Some(job);
                }
                if state.shutdown {
                    break None;
                }
                state.idle += 1;
                let (guard, timeout) = shared
                    .available
                    .wait_timeout(state, shared.keep_alive)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                state = guard;
                state.idle -= 1;
                if timeout.timed_out() && state.queue.is_empty() {
                    break None;
                }
            }
        };

        match job {
            Some(job) => job(),
            None => break,
        }
    }
    shared.lock().threads -= 1;
}
