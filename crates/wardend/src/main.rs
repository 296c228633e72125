use std::process::ExitCode;

use wardend::{HealthReporter, StructuredHealthReporter, SystemConfigLoader};

fn main() -> ExitCode {
    let reporter = StructuredHealthReporter::new();
    match wardend::prepare(&SystemConfigLoader, &reporter) {
        Ok(environment) => {
            reporter.bootstrap_succeeded(environment.config());
            tracing::info!(
                state_file = %environment.state_paths().state_file().display(),
                "wardend environment ready"
            );
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::FAILURE,
    }
}
