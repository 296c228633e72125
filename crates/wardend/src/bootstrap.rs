//! Supervisor bootstrap orchestration.

use std::fs;
use std::io::{self, Write};
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::NamedTempFile;
use thiserror::Error;

use warden_config::{Config, StatePaths, StatePathsError};

use crate::health::HealthReporter;
use crate::manager::Manager;
use crate::network::NetworkMatcher;
use crate::persistence::{DescriptorTable, PersistError};
use crate::service::JobScheduler;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::Transport;

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the supervisor configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The state directory could not be prepared.
    #[error("failed to prepare state directory: {source}")]
    StatePaths {
        /// Filesystem error reported while preparing the directory.
        #[source]
        source: StatePathsError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon<T: Transport, J: JobScheduler> {
    config: Config,
    paths: StatePaths,
    telemetry: TelemetryHandle,
    manager: Manager<T, J>,
}

impl<T: Transport, J: JobScheduler> Daemon<T, J> {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Paths of the serialized state.
    #[must_use]
    pub fn state_paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Entity manager.
    #[must_use]
    pub fn manager(&self) -> &Manager<T, J> {
        &self.manager
    }

    /// Mutable entity manager.
    pub fn manager_mut(&mut self) -> &mut Manager<T, J> {
        &mut self.manager
    }

    /// Serializes every entity to the state file and returns the
    /// descriptors that must be handed to the next process image.
    ///
    /// The file is written next to its final location and renamed into
    /// place, so a reader never sees a partial state.
    pub fn persist_state(&self) -> Result<DescriptorTable, PersistError> {
        let mut fds = DescriptorTable::new();
        let text = self.manager.serialize(&mut fds)?;
        let path = self.paths.state_file();
        let write_error = |source: io::Error| PersistError::Write {
            path: path.to_path_buf(),
            source,
        };

        let mut file = NamedTempFile::new_in(self.paths.state_dir()).map_err(write_error)?;
        file.write_all(text.as_bytes()).map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(path)
            .map_err(|error| write_error(error.error))?;

        tracing::debug!(
            path = %path.display(),
            descriptors = fds.len(),
            "persisted supervisor state"
        );
        Ok(fds)
    }

    /// Reads the state file back, runs the first restore phase, and removes
    /// the file. Returns `false` when there was nothing to restore.
    ///
    /// Call [`Manager::coldplug`] once every entity definition is loaded.
    pub fn restore_state(&mut self, fds: &mut DescriptorTable) -> Result<bool, PersistError> {
        let path = self.paths.state_file();
        let read_error = |source: io::Error| PersistError::Read {
            path: path.to_path_buf(),
            source,
        };

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(error) => return Err(read_error(error)),
        };
        self.manager.deserialize(&text, fds);
        fs::remove_file(path).map_err(read_error)?;

        tracing::debug!(path = %path.display(), "restored supervisor state");
        Ok(true)
    }
}

/// Configuration, telemetry and state paths resolved before any entity
/// exists.
pub struct Environment {
    config: Config,
    paths: StatePaths,
    telemetry: TelemetryHandle,
}

impl Environment {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Paths of the serialized state.
    #[must_use]
    pub fn state_paths(&self) -> &StatePaths {
        &self.paths
    }
}

/// Loads configuration, installs telemetry and prepares the state directory.
///
/// Failures are reported through `reporter`; success is left to the caller,
/// which may still have collaborators to build.
pub fn prepare(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
) -> Result<Environment, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let paths = match StatePaths::from_config(&config) {
        Ok(paths) => paths,
        Err(source) => {
            let error = BootstrapError::StatePaths { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    Ok(Environment {
        config,
        paths,
        telemetry,
    })
}

/// Bootstraps the supervisor using the supplied collaborators.
pub fn bootstrap_with<T, J>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    transport: T,
    jobs: J,
    networks: Box<dyn NetworkMatcher>,
) -> Result<Daemon<T, J>, BootstrapError>
where
    T: Transport,
    J: JobScheduler,
{
    let Environment {
        config,
        paths,
        telemetry,
    } = prepare(loader, reporter.as_ref())?;

    let manager = Manager::new(
        transport,
        jobs,
        config.bus_scope(),
        Arc::clone(&reporter),
        networks,
    );
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        paths,
        telemetry,
        manager,
    })
}
