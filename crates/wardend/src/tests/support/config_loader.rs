//! Test configuration loaders for scenarios covering success and failure
//! paths.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;
use warden_config::{Config, LogFormat};

use crate::bootstrap::ConfigLoader;

/// Loader that places the state file under a temporary directory.
pub struct TestConfigLoader {
    state_dir: TempDir,
}

impl TestConfigLoader {
    #[must_use]
    pub fn new() -> Self {
        let state_dir = TempDir::new().expect("failed to create temporary state directory");
        Self { state_dir }
    }

    /// Path the state file resolves to.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.path().join("warden").join("state")
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let state_file =
            Utf8PathBuf::from_path_buf(self.state_file()).expect("temporary path was not UTF-8");
        Ok(Config {
            state_file,
            log_format: LogFormat::Compact,
            ..Config::default()
        })
    }
}

/// Loader that intentionally fails by passing an invalid CLI argument.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("wardend"),
            OsString::from("--bus-scope"),
            OsString::from("session"),
        ];
        Config::load_from_iter(args)
    }
}
