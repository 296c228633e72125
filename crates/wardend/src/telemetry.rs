//! Structured telemetry initialisation for the supervisor.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use warden_config::Config;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// The tracing subscriber could not be installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Installs the global tracing subscriber on the first call.
///
/// Later calls find the guard already set and hand back a fresh
/// [`TelemetryHandle`] without touching the global subscriber.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let format = config.log_format();
    let subscriber: Box<dyn Subscriber + Send + Sync> = if format.is_structured() {
        Box::new(builder(filter).json().flatten_event(true).finish())
    } else {
        Box::new(builder(filter).compact().finish())
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn rejects_malformed_filters() {
        let config = Config {
            log_filter: "wardend=[".to_owned(),
            ..Config::default()
        };

        assert!(matches!(
            install_subscriber(&config),
            Err(TelemetryError::Filter(_))
        ));
    }
}
