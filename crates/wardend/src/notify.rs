//! Trigger edges between units and the queue of coarse status changes.
//!
//! Edges are plain data keyed by unit name. Neither endpoint owns the other,
//! so an edge can name a unit that is not loaded (yet, or any more) and is
//! simply resolved against the registry whenever a notification fires.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use crate::entity::EntityId;
use crate::status::ActiveState;

/// Directed observer relationships: `observer` triggers `observed`.
#[derive(Debug, Default, Clone)]
pub struct TriggerGraph {
    observers: BTreeMap<String, BTreeSet<String>>,
    triggers: BTreeMap<String, BTreeSet<String>>,
}

impl TriggerGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `observer` triggers and watches `observed`.
    pub fn add_trigger(&mut self, observer: &str, observed: &str) {
        self.observers
            .entry(observed.to_owned())
            .or_default()
            .insert(observer.to_owned());
        self.triggers
            .entry(observer.to_owned())
            .or_default()
            .insert(observed.to_owned());
    }

    /// Drops every edge leaving `observer`.
    pub fn remove_observer(&mut self, observer: &str) {
        let Some(observed) = self.triggers.remove(observer) else {
            return;
        };
        for unit in observed {
            if let Some(set) = self.observers.get_mut(&unit) {
                set.remove(observer);
                if set.is_empty() {
                    self.observers.remove(&unit);
                }
            }
        }
    }

    /// Snapshot of the units observing `observed`.
    ///
    /// A copy is returned so callers may mutate the graph while acting on
    /// each observer.
    #[must_use]
    pub fn observers_of(&self, observed: &str) -> Vec<String> {
        self.observers
            .get(observed)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Units triggered by `observer`.
    #[must_use]
    pub fn triggers_of(&self, observer: &str) -> Vec<String> {
        self.triggers
            .get(observer)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Identity of an entity as it appears in notifications.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    /// Bus-name entity.
    BusName {
        /// Registry id.
        id: EntityId,
        /// Unit identifier.
        unit: String,
    },
    /// Link entity.
    Link {
        /// Registry id.
        id: EntityId,
        /// Kernel interface index.
        ifindex: u32,
        /// Interface name.
        ifname: String,
    },
}

impl EntityRef {
    /// Registry id of the entity.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        match self {
            Self::BusName { id, .. } | Self::Link { id, .. } => *id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusName { unit, .. } => formatter.write_str(unit),
            Self::Link {
                ifindex, ifname, ..
            } => write!(formatter, "{ifname} ({ifindex})"),
        }
    }
}

/// Coarse status change of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Entity whose state was set.
    pub entity: EntityRef,
    /// Fine-grained state name before the change.
    pub from: &'static str,
    /// Fine-grained state name after the change.
    pub to: &'static str,
    /// Coarse status before the change.
    pub old: ActiveState,
    /// Coarse status after the change.
    pub new: ActiveState,
}

/// Shared notification plumbing for every entity on the event loop.
///
/// Entities publish status changes while holding a mutable borrow of
/// themselves; the manager drains the queue once the borrow ends and hands
/// each change to the health reporter.
#[derive(Debug, Default)]
pub struct NotificationBus {
    graph: TriggerGraph,
    queue: VecDeque<StatusChange>,
}

impl NotificationBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger graph.
    #[must_use]
    pub const fn graph(&self) -> &TriggerGraph {
        &self.graph
    }

    /// Mutable trigger graph.
    pub fn graph_mut(&mut self) -> &mut TriggerGraph {
        &mut self.graph
    }

    /// Queues a status change.
    pub fn publish(&mut self, change: StatusChange) {
        self.queue.push_back(change);
    }

    /// Takes every queued status change in publication order.
    pub fn drain(&mut self) -> Vec<StatusChange> {
        self.queue.drain(..).collect()
    }

    /// Number of queued changes.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
