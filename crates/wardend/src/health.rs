//! Structured health reporting for supervisor lifecycle events.

use std::sync::Arc;

use crate::bootstrap::BootstrapError;
use crate::notify::{EntityRef, StatusChange};

use warden_config::Config;

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked for every state an entity enters.
    fn status_changed(&self, change: &StatusChange);

    /// Invoked after an entity has been torn down and removed.
    fn entity_removed(&self, entity: &EntityRef);

    /// Invoked when re-arming restored state failed for an entity.
    fn coldplug_failed(&self, entity: &EntityRef, error: &dyn std::error::Error);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn status_changed(&self, change: &StatusChange) {
        (**self).status_changed(change);
    }

    fn entity_removed(&self, entity: &EntityRef) {
        (**self).entity_removed(entity);
    }

    fn coldplug_failed(&self, entity: &EntityRef, error: &dyn std::error::Error) {
        (**self).coldplug_failed(entity, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "wardend::health",
            event = "bootstrap_starting",
            "starting supervisor bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "wardend::health",
            event = "bootstrap_succeeded",
            state_file = %config.state_file(),
            bus_scope = %config.bus_scope(),
            log_filter = %config.log_filter(),
            log_format = config.log_format().as_str(),
            "supervisor bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "wardend::health",
            event = "bootstrap_failed",
            error = %error,
            "supervisor bootstrap failed"
        );
    }

    fn status_changed(&self, change: &StatusChange) {
        if change.old == change.new {
            tracing::trace!(
                target: "wardend::health",
                event = "status_changed",
                entity = %change.entity,
                from = change.from,
                to = change.to,
                status = %change.new,
                "entity state set"
            );
            return;
        }
        tracing::info!(
            target: "wardend::health",
            event = "status_changed",
            entity = %change.entity,
            from = change.from,
            to = change.to,
            old = %change.old,
            new = %change.new,
            "entity status changed"
        );
    }

    fn entity_removed(&self, entity: &EntityRef) {
        tracing::info!(
            target: "wardend::health",
            event = "entity_removed",
            entity = %entity,
            id = %entity.id(),
            "entity removed"
        );
    }

    fn coldplug_failed(&self, entity: &EntityRef, error: &dyn std::error::Error) {
        tracing::error!(
            target: "wardend::health",
            event = "coldplug_failed",
            entity = %entity,
            error = %error,
            "failed to restore entity state"
        );
    }
}
