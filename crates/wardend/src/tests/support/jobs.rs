//! Test job scheduler with scripted unit states.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::service::{JobError, JobScheduler, LoadState};

/// Scheduler double shared between the manager and the scenario.
#[derive(Clone, Default)]
pub struct RecordingJobScheduler {
    state: Arc<Mutex<JobState>>,
}

impl RecordingJobScheduler {
    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().expect("job state mutex poisoned")
    }

    /// Marks `unit` as loaded.
    pub fn set_loaded(&self, unit: &str) {
        self.set_load_state(unit, LoadState::Loaded);
    }

    /// Sets the load state of `unit`.
    pub fn set_load_state(&self, unit: &str, load_state: LoadState) {
        self.state().load_states.insert(unit.to_owned(), load_state);
    }

    /// Queues a stop job for `unit`.
    pub fn set_stop_pending(&self, unit: &str) {
        self.state().stop_pending.insert(unit.to_owned());
    }

    /// Marks `unit` as active.
    pub fn set_active(&self, unit: &str) {
        self.state().active.insert(unit.to_owned());
    }

    /// Makes every start job request fail.
    pub fn refuse_jobs(&self) {
        self.state().refuse = true;
    }

    /// Start jobs queued so far.
    #[must_use]
    pub fn enqueued(&self) -> Vec<String> {
        self.state().enqueued.clone()
    }
}

impl JobScheduler for RecordingJobScheduler {
    fn load_state(&self, unit: &str) -> LoadState {
        self.state()
            .load_states
            .get(unit)
            .copied()
            .unwrap_or(LoadState::NotFound)
    }

    fn stop_pending(&self, unit: &str) -> bool {
        self.state().stop_pending.contains(unit)
    }

    fn active_or_pending(&self, unit: &str) -> bool {
        let state = self.state();
        state.active.contains(unit) || state.enqueued.iter().any(|queued| queued == unit)
    }

    fn enqueue_start(&mut self, unit: &str) -> Result<(), JobError> {
        let mut state = self.state();
        if state.refuse {
            return Err(JobError::new(unit, "transaction is destructive"));
        }
        state.enqueued.push(unit.to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct JobState {
    load_states: BTreeMap<String, LoadState>,
    stop_pending: BTreeSet<String>,
    active: BTreeSet<String>,
    enqueued: Vec<String>,
    refuse: bool,
}
