//! Derives the location of the serialized supervisor state.
//!
//! The supervisor writes its entity state to this file right before it
//! re-executes itself and reads it back on the way up. Both sides must agree
//! on the path, so it is derived from the shared configuration.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;

/// Canonical paths for the serialized state and its directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    state_dir: PathBuf,
    state_file: PathBuf,
}

impl StatePaths {
    /// Derives state paths from the shared configuration, creating the
    /// containing directory when it is missing.
    pub fn from_config(config: &Config) -> Result<Self, StatePathsError> {
        let state_file = config.state_file().as_std_path().to_path_buf();
        let state_dir = match state_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            Some(parent) => parent.to_path_buf(),
            None => {
                return Err(StatePathsError::MissingParent {
                    path: config.state_file().to_string(),
                });
            }
        };
        fs::create_dir_all(&state_dir).map_err(|source| StatePathsError::StateDirectory {
            path: state_dir.clone(),
            source,
        })?;
        Ok(Self {
            state_dir,
            state_file,
        })
    }

    /// Directory holding the state file.
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        self.state_dir.as_path()
    }

    /// Path of the serialized state.
    #[must_use]
    pub fn state_file(&self) -> &Path {
        self.state_file.as_path()
    }
}

/// Errors raised while deriving state paths.
#[derive(Debug, Error)]
pub enum StatePathsError {
    /// The state file path lacked a parent directory.
    #[error("state file '{path}' has no parent directory")]
    MissingParent {
        /// Configured state file path.
        path: String,
    },
    /// Creating the state directory failed.
    #[error("failed to prepare state directory '{path}': {source}")]
    StateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
