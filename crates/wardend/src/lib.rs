//! Core of the Warden supervisor.
//!
//! Warden drives named entities through ordered activation stages. Each
//! stage issues asynchronous requests through a kernel [`Transport`], counts
//! them in a per-entity tracker, and advances only once every request of the
//! stage has completed. Two entity kinds are provided:
//!
//! - [`BusName`]: activation on demand. The entity listens on a starter
//!   descriptor and queues a start job for its service on the first request.
//! - [`Link`]: network bring-up. The entity joins a bridge, assigns
//!   addresses, installs routes, and waits for the interface to come up.
//!
//! Every entity is owned by the [`Manager`], which routes external requests
//! and loop callbacks to it by generational id so late callbacks for removed
//! entities are recognised and dropped. Entity state survives a re-execution
//! of the supervisor: [`Manager::serialize`] writes it as text plus a table
//! of duplicated descriptors, and [`Manager::deserialize`] followed by
//! [`Manager::coldplug`] restores it, reusing the same kernel resources.
//!
//! The bootstrap sequence loads configuration through [`warden_config`],
//! installs structured telemetry, prepares the state directory, and builds
//! the manager. Lifecycle events are reported through a [`HealthReporter`].

mod bootstrap;
pub mod busname;
pub mod entity;
mod error;
mod health;
pub mod link;
mod manager;
pub mod network;
pub mod notify;
pub mod persistence;
pub mod service;
pub mod status;
mod telemetry;
pub mod tracker;
pub mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, Environment, SystemConfigLoader, bootstrap_with, prepare,
};
pub use busname::{BusName, BusNameConfig, BusNameState};
pub use entity::{EntityId, Registry};
pub use error::{LoadError, StartError, StopError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use link::{Link, LinkState};
pub use manager::Manager;
pub use network::{Address, Device, MacAddr, Network, NetworkMatcher, Route};
pub use persistence::{DescriptorTable, PersistError};
pub use service::{JobError, JobScheduler, LoadState, ServiceResult, ServiceSnapshot, ServiceState};
pub use status::{ActivationResult, ActiveState};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::{Completion, LinkRequest, Ticket, Transport, TransportError, WatchToken};

#[cfg(test)]
mod tests;
