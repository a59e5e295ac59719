//! Supervised background tasks
//!
//! Handlers hand long-running work to a [`TaskGroup`] instead of detaching
//! it. The group logs task panics and, on shutdown, refuses new work and
//! waits for everything already running.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error};

struct State {
    tasks: JoinSet<()>,
    closed: bool,
}

pub struct TaskGroup {
    name: &'static str,
    state: Mutex<State>,
}

impl TaskGroup {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State {
                tasks: JoinSet::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns a task onto the current runtime
    ///
    /// Returns `false` without spawning once the group is closed.
    pub fn spawn<F>(&self, label: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.lock();
        if state.closed {
            debug!("{}: refusing {} task after close", self.name, label);
            return false;
        }

        // Reap finished tasks so the set does not grow without bound
        while let Some(result) = state.tasks.try_join_next() {
            self.report(result);
        }

        state.tasks.spawn(task);
        true
    }

    /// Tasks spawned and not yet reaped
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// Stops accepting new tasks
    pub fn close(&self) {
        self.lock().closed = true;
    }

    /// Waits for every task spawned before the call
    pub async fn drain(&self) {
        let mut tasks = std::mem::take(&mut self.lock().tasks);
        let pending = tasks.len();
        if pending > 0 {
            debug!("{}: draining {} task(s)", self.name, pending);
        }

        while let Some(result) = tasks.join_next().await {
            self.report(result);
        }
    }

    fn report(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                error!("{}: task panicked: {}", self.name, e);
            } else {
                debug!("{}: task cancelled", self.name);
            }
        }
    }
}
