//! Test double for [`HealthReporter`] that records structured events for
//! assertions.

use std::sync::Mutex;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::notify::{EntityRef, StatusChange};

use warden_config::Config;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// An entity entered a state.
    StatusChanged {
        entity: String,
        from: &'static str,
        to: &'static str,
    },
    /// An entity was removed.
    EntityRemoved(String),
    /// Restoring an entity failed.
    ColdplugFailed(String),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// States entered by `entity`, in order, skipping repeated entries.
    #[must_use]
    pub fn transitions_of(&self, entity: &str) -> Vec<&'static str> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                HealthEvent::StatusChanged {
                    entity: recorded,
                    from,
                    to,
                } if recorded == entity && from != to => Some(to),
                _ => None,
            })
            .collect()
    }

    pub fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn status_changed(&self, change: &StatusChange) {
        self.record(HealthEvent::StatusChanged {
            entity: change.entity.to_string(),
            from: change.from,
            to: change.to,
        });
    }

    fn entity_removed(&self, entity: &EntityRef) {
        self.record(HealthEvent::EntityRemoved(entity.to_string()));
    }

    fn coldplug_failed(&self, entity: &EntityRef, _error: &dyn std::error::Error) {
        self.record(HealthEvent::ColdplugFailed(entity.to_string()));
    }
}
