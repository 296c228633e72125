//! View of dependent services and the job scheduler that starts them.
//!
//! Services are supervised elsewhere; bus-name entities only observe their
//! state and ask the scheduler to queue start jobs.

use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

/// Load state of a unit known to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LoadState {
    /// Referenced but not loaded yet.
    Stub,
    /// Fully loaded.
    Loaded,
    /// No definition was found.
    NotFound,
    /// Loading failed.
    Error,
    /// Masked by the administrator.
    Masked,
}

/// Fine-grained state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, EnumString, Display, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceState {
    /// Not running.
    Dead,
    /// Running its pre-start command.
    StartPre,
    /// Running its main start command.
    Start,
    /// Running its post-start command.
    StartPost,
    /// Up.
    Running,
    /// Main process exited and the service remains active.
    Exited,
    /// Reloading.
    Reload,
    /// Running its stop command.
    Stop,
    /// Terminating the main process.
    StopSigterm,
    /// Killing the main process.
    StopSigkill,
    /// Running its post-stop command.
    StopPost,
    /// Terminating leftover processes.
    FinalSigterm,
    /// Killing leftover processes.
    FinalSigkill,
    /// Stopped uncleanly.
    Failed,
    /// Waiting to be restarted automatically.
    AutoRestart,
}

impl ServiceState {
    /// Returns `true` for every state on the way down, including the final
    /// dead state and the pause before an automatic restart.
    #[must_use]
    pub const fn is_stopping(self) -> bool {
        matches!(
            self,
            Self::Dead
                | Self::Stop
                | Self::StopSigterm
                | Self::StopSigkill
                | Self::StopPost
                | Self::FinalSigterm
                | Self::FinalSigkill
                | Self::AutoRestart
        )
    }
}

/// Outcome recorded by a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceResult {
    /// No failure.
    #[default]
    Success,
    /// Resources could not be allocated.
    Resources,
    /// A timeout elapsed.
    Timeout,
    /// The main process exited with a failure code.
    ExitCode,
    /// The main process was killed by a signal.
    Signal,
    /// The main process dumped core.
    CoreDump,
    /// The watchdog expired.
    Watchdog,
    /// The service was started too often and gave up.
    StartLimit,
}

impl ServiceResult {
    /// Returns `true` when the service will not be retried automatically.
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        matches!(self, Self::StartLimit)
    }
}

/// State change of a service, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSnapshot {
    /// Unit name of the service.
    pub unit: String,
    /// Load state of the service.
    pub load_state: LoadState,
    /// New fine-grained state.
    pub state: ServiceState,
    /// Current result.
    pub result: ServiceResult,
}

impl ServiceSnapshot {
    /// Loaded service in `state` with a successful result.
    #[must_use]
    pub fn loaded(unit: impl Into<String>, state: ServiceState) -> Self {
        Self {
            unit: unit.into(),
            load_state: LoadState::Loaded,
            state,
            result: ServiceResult::Success,
        }
    }

    /// Replaces the result.
    #[must_use]
    pub fn with_result(mut self, result: ServiceResult) -> Self {
        self.result = result;
        self
    }
}

/// Error returned when the scheduler refuses to queue a job.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to queue start job for {unit}: {message}")]
pub struct JobError {
    /// Unit the job was meant for.
    pub unit: String,
    message: String,
}

impl JobError {
    /// Builds an error for `unit`.
    #[must_use]
    pub fn new(unit: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            message: message.into(),
        }
    }

    /// Human-readable reason.
    #[must_use]
    pub fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Kind of job a status message refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// Start job.
    Start,
    /// Stop job.
    Stop,
}

/// Result of a finished job, used to pick status messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobOutcome {
    /// The job completed.
    Done,
    /// The job failed.
    Failed,
    /// A dependency of the job failed.
    Dependency,
    /// The job timed out.
    Timeout,
}

/// Job layer queried and driven by bus-name entities.
pub trait JobScheduler {
    /// Load state of `unit`.
    fn load_state(&self, unit: &str) -> LoadState;

    /// Returns `true` when a stop job is queued for `unit`.
    fn stop_pending(&self, unit: &str) -> bool;

    /// Returns `true` when `unit` is active or has a start job queued.
    fn active_or_pending(&self, unit: &str) -> bool;

    /// Queues a start job for `unit`, replacing conflicting jobs.
    fn enqueue_start(&mut self, unit: &str) -> Result<(), JobError>;
}
