//! A minimal blocking future for remote calls.
//!
//! Remote methods may return `Task<T>` instead of `CallResult<T>`. On the
//! caller's side the proxy hands back a running task that completes when
//! the result arrives. On the servant's side the subject returns a task
//! that must already be started; the dispatcher waits for it and sends
//! the outcome back.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{CallResult, RpcError};
use crate::ordering;

type Work<T> = Box<dyn FnOnce() -> CallResult<T> + Send + 'static>;

enum TaskState<T> {
    NotStarted(Work<T>),
    Running,
    Done(CallResult<T>),
    Taken,
}

struct TaskShared<T> {
    state: Mutex<TaskState<T>>,
    done: Condvar,
}

impl<T> TaskShared<T> {
    fn lock(&self) -> MutexGuard<'_, TaskState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn complete(&self, result: CallResult<T>) {
        let mut state = self.lock();
        if matches!(*state, TaskState::Running | TaskState::NotStarted(_)) {
            *state = TaskState::Done(result);
            self.done.notify_all();
        }
    }
}

/// An asynchronous computation producing a `CallResult<T>`.
pub struct Task<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T: Send + 'static> Task<T> {
    /// A task that runs `work` once [`Task::start`] is called.
    pub fn new(work: impl FnOnce() -> CallResult<T> + Send + 'static) -> Self {
        Self::with_state(TaskState::NotStarted(Box::new(work)))
    }

    /// A task that is already running `work` on its own thread.
    pub fn spawn(work: impl FnOnce() -> CallResult<T> + Send + 'static) -> Self {
        let task = Self::new(work);
        task.start();
        task
    }

    /// An already-completed task.
    pub fn from_result(result: CallResult<T>) -> Self {
        Self::with_state(TaskState::Done(result))
    }

    /// An already-completed successful task.
    pub fn ready(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    pub(crate) fn pending() -> (Self, TaskCompleter<T>) {
        let task = Self::with_state(TaskState::Running);
        let completer = TaskCompleter {
            shared: Arc::clone(&task.shared),
        };
        (task, completer)
    }

    fn with_state(state: TaskState<T>) -> Self {
        Self {
            shared: Arc::new(TaskShared {
                state: Mutex::new(state),
                done: Condvar::new(),
            }),
        }
    }

    /// Starts the task if it has not been started yet.
    pub fn start(&self) {
        let work = {
            let mut state = self.shared.lock();
            match std::mem::replace(&mut *state, TaskState::Running) {
                TaskState::NotStarted(work) => work,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("grainrpc-task".to_string())
            .spawn(move || shared.complete(work()));
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn task thread");
            self.shared.complete(Err(RpcError::marshal(format!(
                "failed to spawn task thread: {err}"
            ))));
        }
    }

    pub fn is_started(&self) -> bool {
        !matches!(*self.shared.lock(), TaskState::NotStarted(_))
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.shared.lock(), TaskState::Done(_) | TaskState::Taken)
    }

    /// Blocks until the task completes. Starts it first if necessary.
    pub fn wait(self) -> CallResult<T> {
        self.start();
        ordering::blocking_section(|| {
            let mut state = self.shared.lock();
            loop {
                if let TaskState::Done(_) = *state {
                    return take_result(&mut state);
                }
                state = self
                    .shared
                    .done
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        })
    }

    /// Waits at most `timeout` for the task to complete.
    ///
    /// Returns `None` if it is still running; the task can be waited on again.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CallResult<T>> {
        self.start();
        let deadline = Instant::now() + timeout;
        ordering::blocking_section(|| {
            let mut state = self.shared.lock();
            loop {
                match *state {
                    TaskState::Done(_) => return Some(take_result(&mut state)),
                    TaskState::Taken => return None,
                    _ => {}
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return None;
                }
                state = self
                    .shared
                    .done
                    .wait_timeout(state, remaining)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|poisoned| poisoned.into_inner().0);
            }
        })
    }
}

fn take_result<T>(state: &mut TaskState<T>) -> CallResult<T> {
    match std::mem::replace(state, TaskState::Taken) {
        TaskState::Done(result) => result,
        _ => Err(RpcError::marshal("task result was already taken")),
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.shared.lock() {
            TaskState::NotStarted(_) => "not started",
            TaskState::Running => "running",
            TaskState::Done(_) => "completed",
            TaskState::Taken => "consumed",
        };
        f.debug_struct("Task").field("state", &state).finish()
    }
}

/// Completes a task created with [`Task::pending`].
pub(crate) struct TaskCompleter<T> {
    shared: Arc<TaskShared<T>>,
}

impl<T> TaskCompleter<T> {
    pub(crate) fn complete(self, result: CallResult<T>) {
        self.shared.complete(result);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn new_task_does_not_run_until_started() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task = Task::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(5)
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!task.is_started());
        assert!(!ran.load(Ordering::SeqCst));

        assert_eq!(task.wait().unwrap(), 5);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn spawned_task_completes() {
        let task = Task::spawn(|| Ok("done".to_string()));
        assert!(task.is_started());
        assert_eq!(task.wait().unwrap(), "done");
    }

    #[test]
    fn wait_timeout_returns_none_while_running() {
        let (task, completer) = Task::<u32>::pending();
        assert!(task.wait_timeout(Duration::from_millis(20)).is_none());

        completer.complete(Ok(9));
        assert_eq!(task.wait_timeout(Duration::from_secs(1)), Some(Ok(9)));
        assert!(task.is_completed());
    }

    #[test]
    fn first_completion_wins() {
        let (task, completer) = Task::<u32>::pending();
        let second = TaskCompleter {
            shared: Arc::clone(&task.shared),
        };
        completer.complete(Ok(1));
        second.complete(Ok(2));
        assert_eq!(task.wait().unwrap(), 1);
    }

    #[test]
    fn ready_task_is_started_and_completed() {
        let task = Task::ready(());
        assert!(task.is_started());
        assert!(task.is_completed());
        assert_eq!(format!("{task:?}"), "Task { state: \"completed\" }");
    }
}
