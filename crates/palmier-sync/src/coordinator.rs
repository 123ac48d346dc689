//! Single-run guard shared by the trigger endpoint and the scheduler.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub is_running: bool,
    pub last_run: Option<NaiveDateTime>,
    pub last_status: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    running: bool,
    last_run: Option<NaiveDateTime>,
    last_status: Option<String>,
}

/// In-process only; two processes can still run concurrently.
pub struct RunCoordinator {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
}

impl Default for RunCoordinator {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RunCoordinator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the run slot, or `None` if a run is already in progress.
    pub fn try_start(self: &Arc<Self>) -> Option<RunGuard> {
        let mut state = self.lock();
        if state.running {
            return None;
        }
        state.running = true;
        state.last_status = Some("running".to_string());
        Some(RunGuard {
            coordinator: Arc::clone(self),
            finished: false,
        })
    }

    pub fn status(&self) -> RunStatus {
        let state = self.lock();
        RunStatus {
            is_running: state.running,
            last_run: state.last_run,
            last_status: state.last_status.clone(),
        }
    }

    /// `last_run` only moves when a run completes; aborted runs keep the
    /// previous value.
    fn release(&self, status: String, completed: bool) {
        let mut state = self.lock();
        state.running = false;
        if completed {
            state.last_run = Some(self.clock.now());
        }
        state.last_status = Some(status);
    }
}

/// Releases the run slot when finished or dropped. A guard dropped without
/// `finish` records the run as failed.
pub struct RunGuard {
    coordinator: Arc<RunCoordinator>,
    finished: bool,
}

impl RunGuard {
    pub fn finish(mut self, status: impl Into<String>) {
        self.finished = true;
        self.coordinator.release(status.into(), true);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.release("error: run aborted".to_string(), false);
        }
    }
}
