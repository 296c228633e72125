//! Shared configuration for the Warden supervisor.
//!
//! Configuration is layered by `ortho_config`: values from an optional TOML
//! file are overridden by `WARDEN_*` environment variables, which are in turn
//! overridden by command-line flags. Every field has a default so the
//! supervisor starts with no configuration at all.

mod defaults;
mod logging;
mod scope;
mod state;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, STATE_FILE_NAME, default_log_filter, default_log_filter_string,
    default_log_format, default_state_file,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use scope::BusScope;
pub use state::{StatePaths, StatePathsError};

/// Resolved supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "WARDEN")]
pub struct Config {
    /// Tracing filter expression, e.g. `info` or `wardend=debug`.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log records.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Bus on which activation descriptors are created.
    #[ortho_config(default = BusScope::System)]
    pub bus_scope: BusScope,
    /// File receiving serialized entity state across a re-execution.
    #[ortho_config(default = default_state_file())]
    pub state_file: Utf8PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            bus_scope: BusScope::default(),
            state_file: default_state_file(),
        }
    }
}

impl Config {
    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Output format for log records.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Bus on which activation descriptors are created.
    #[must_use]
    pub fn bus_scope(&self) -> BusScope {
        self.bus_scope
    }

    /// File receiving serialized entity state.
    #[must_use]
    pub fn state_file(&self) -> &camino::Utf8Path {
        self.state_file.as_path()
    }
}
