//! Test harness utilities for the supervisor behavioural suites.

mod config_loader;
mod jobs;
mod reporter;
mod transport;
mod world;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use jobs::RecordingJobScheduler;
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use transport::{RecordingTransport, TransportCall};
pub use world::{TestWorld, world};
