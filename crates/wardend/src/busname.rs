//! Activation-on-demand for bus names.
//!
//! A bus name owns a starter descriptor created by the kernel bus. While the
//! entity is listening the descriptor is watched for readability; the first
//! activation request queues a start job for the dependent service and moves
//! the entity to `running`. When the service goes down again the entity
//! re-arms the watch so no request is lost.
//!
//! ```text
//! dead ──start──▶ listening ──readable──▶ running
//!   ▲                 ▲                      │
//!   │                 └──service stopping────┘
//!   └──────stop────── (any) ──failure──▶ failed
//! ```

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::epoll::EpollFlags;
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{debug, error, info, warn};
use warden_config::BusScope;

use crate::entity::EntityId;
use crate::error::{LoadError, StartError};
use crate::notify::{EntityRef, NotificationBus, StatusChange};
use crate::persistence::{DescriptorTable, PersistError, write_item};
use crate::service::{
    JobOutcome, JobScheduler, JobType, LoadState, ServiceSnapshot, ServiceState,
};
use crate::status::{ActivationResult, ActiveState};
use crate::transport::{Transport, TransportError, WatchToken};

const UNIT_SUFFIX: &str = ".busname";
const SERVICE_SUFFIX: &str = ".service";
const MAX_NAME_LEN: usize = 255;

/// Fine-grained state of a bus name.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, EnumString, Display, IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BusNameState {
    /// Idle; no descriptor is held.
    #[default]
    Dead,
    /// Watching the starter descriptor for activation requests.
    Listening,
    /// The dependent service has been asked to start.
    Running,
    /// Stopped uncleanly.
    Failed,
}

impl BusNameState {
    /// Coarse status reported to the dependency graph.
    #[must_use]
    pub const fn active_state(self) -> ActiveState {
        match self {
            Self::Dead => ActiveState::Inactive,
            Self::Listening | Self::Running => ActiveState::Active,
            Self::Failed => ActiveState::Failed,
        }
    }

    /// Stable name used in dumps and serialized state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    const fn holds_starter(self) -> bool {
        matches!(self, Self::Listening | Self::Running)
    }

    const fn watches_starter(self) -> bool {
        matches!(self, Self::Listening)
    }
}

/// Definition a bus name is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusNameConfig {
    /// Unit identifier, `<name>.busname`.
    pub unit: String,
    /// Explicit bus name; derived from the unit identifier when absent.
    pub name: Option<String>,
    /// Explicit dependent service; `<name>.service` when absent.
    pub service: Option<String>,
}

impl BusNameConfig {
    /// Definition with every optional setting left to its default.
    #[must_use]
    pub fn new(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            name: None,
            service: None,
        }
    }

    /// Sets an explicit bus name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets an explicit dependent service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }
}

/// Collaborators a bus name needs while handling one event.
pub struct Context<'a> {
    /// Kernel transport.
    pub transport: &'a mut dyn Transport,
    /// Job layer used to start the dependent service.
    pub jobs: &'a mut dyn JobScheduler,
    /// Status change queue.
    pub bus: &'a mut NotificationBus,
    /// Bus the starter descriptor is created on.
    pub scope: BusScope,
}

/// Bus-name entity.
#[derive(Debug)]
pub struct BusName {
    id: EntityId,
    unit: String,
    name: String,
    service: String,
    state: BusNameState,
    deserialized_state: BusNameState,
    result: ActivationResult,
    starter: Option<OwnedFd>,
    watch: Option<WatchToken>,
    watch_enabled: bool,
}

impl BusName {
    /// Builds and verifies a bus name from its definition.
    pub fn load(id: EntityId, config: BusNameConfig) -> Result<Self, LoadError> {
        let Some(prefix) = config.unit.strip_suffix(UNIT_SUFFIX) else {
            return Err(LoadError::NotBusNameUnit { unit: config.unit });
        };
        let name = config.name.unwrap_or_else(|| prefix.to_owned());
        if !is_valid_service_name(&name) {
            return Err(LoadError::InvalidName {
                unit: config.unit,
                name,
            });
        }
        if name != prefix {
            return Err(LoadError::NameMismatch {
                unit: config.unit,
                name,
            });
        }
        let service = config
            .service
            .unwrap_or_else(|| format!("{name}{SERVICE_SUFFIX}"));

        Ok(Self {
            id,
            unit: config.unit,
            name,
            service,
            state: BusNameState::Dead,
            deserialized_state: BusNameState::Dead,
            result: ActivationResult::Success,
            starter: None,
            watch: None,
            watch_enabled: false,
        })
    }

    /// Registry id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Unit identifier.
    #[must_use]
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Bus name being activated.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependent service started on activation.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BusNameState {
        self.state
    }

    /// Coarse status derived from the current state.
    #[must_use]
    pub const fn active_state(&self) -> ActiveState {
        self.state.active_state()
    }

    /// Result of the most recent activation.
    #[must_use]
    pub const fn result(&self) -> ActivationResult {
        self.result
    }

    /// Starter descriptor, while one is held.
    #[must_use]
    pub fn starter(&self) -> Option<BorrowedFd<'_>> {
        self.starter.as_ref().map(AsFd::as_fd)
    }

    /// Returns `true` while the readiness watch is armed.
    #[must_use]
    pub const fn is_watching(&self) -> bool {
        self.watch_enabled
    }

    /// Identity used in notifications.
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::BusName {
            id: self.id,
            unit: self.unit.clone(),
        }
    }

    /// Starts listening.
    ///
    /// Refuses when the dependent service is not loaded. Starting an entity
    /// that is already listening or running does nothing.
    pub fn start(&mut self, ctx: &mut Context<'_>) -> Result<(), StartError> {
        if self.state.holds_starter() {
            return Ok(());
        }
        if ctx.jobs.load_state(&self.service) != LoadState::Loaded {
            error!(
                busname = %self.unit,
                service = %self.service,
                "bus service not loaded, refusing"
            );
            return Err(StartError::DependencyNotLoaded {
                unit: self.unit.clone(),
                service: self.service.clone(),
            });
        }

        self.result = ActivationResult::Success;
        self.enter_listening(ctx);
        Ok(())
    }

    /// Stops the entity, closing its descriptor.
    pub fn stop(&mut self, ctx: &mut Context<'_>) {
        if !self.state.holds_starter() {
            return;
        }
        self.enter_dead(ActivationResult::Success, ctx);
    }

    /// Returns a failed entity to `dead` and clears its result.
    pub fn reset_failed(&mut self, ctx: &mut Context<'_>) {
        if self.state == BusNameState::Failed {
            self.set_state(BusNameState::Dead, ctx);
        }
        self.result = ActivationResult::Success;
    }

    /// Handles readiness reported for the starter descriptor.
    pub fn dispatch_io(&mut self, revents: EpollFlags, ctx: &mut Context<'_>) {
        if self.state != BusNameState::Listening {
            return;
        }
        debug!(busname = %self.unit, "activation request");

        if revents != EpollFlags::EPOLLIN {
            error!(
                busname = %self.unit,
                revents = revents.bits(),
                "unexpected poll event on starter descriptor"
            );
            self.enter_dead(ActivationResult::Resources, ctx);
            return;
        }

        self.enter_running(ctx);
    }

    /// Reacts to a state change of the dependent service.
    pub fn trigger_notify(&mut self, service: &ServiceSnapshot, ctx: &mut Context<'_>) {
        if !self.state.holds_starter() {
            return;
        }
        if service.load_state != LoadState::Loaded {
            return;
        }

        if service.state == ServiceState::Failed {
            if service.result.is_permanent() {
                self.enter_dead(ActivationResult::ServiceFailedPermanent, ctx);
            } else {
                self.enter_listening(ctx);
            }
        } else if service.state.is_stopping() {
            self.enter_listening(ctx);
        }
    }

    /// Human-readable status block.
    #[must_use]
    pub fn dump(&self, prefix: &str) -> String {
        format!(
            "{prefix}Bus Name State: {}\n\
             {prefix}Result: {}\n\
             {prefix}Name: {}\n\
             {prefix}Service: {}\n",
            self.state.as_str(),
            self.result.as_str(),
            self.name,
            self.service,
        )
    }

    /// Message printed when a job on this entity finishes.
    #[must_use]
    pub fn status_message(&self, job: JobType, outcome: JobOutcome) -> Option<String> {
        let name = &self.name;
        let message = match (job, outcome) {
            (JobType::Start, JobOutcome::Done) => format!("Listening on {name}."),
            (JobType::Start, JobOutcome::Failed) => format!("Failed to listen on {name}."),
            (JobType::Start, JobOutcome::Dependency) => format!("Dependency failed for {name}."),
            (JobType::Start, JobOutcome::Timeout) => format!("Timed out starting {name}."),
            (JobType::Stop, JobOutcome::Done) => format!("Closed {name}."),
            (JobType::Stop, JobOutcome::Failed) => format!("Failed stopping {name}."),
            (JobType::Stop, JobOutcome::Timeout) => format!("Timed out stopping {name}."),
            (JobType::Stop, JobOutcome::Dependency) => return None,
        };
        Some(message)
    }

    /// Writes `state`, `result` and, while one is held, a duplicate of the
    /// starter descriptor.
    pub fn serialize(&self, out: &mut String, fds: &mut DescriptorTable) -> Result<(), PersistError> {
        write_item(out, "state", self.state.as_str());
        write_item(out, "result", self.result.as_str());
        if let Some(starter) = &self.starter {
            let id = fds
                .put_dup(starter.as_fd())
                .map_err(|source| PersistError::Duplicate {
                    entity: self.unit.clone(),
                    source,
                })?;
            write_item(out, "starter-fd", id);
        }
        Ok(())
    }

    /// Applies one serialized item. Nothing live is touched until
    /// [`BusName::coldplug`].
    pub fn deserialize_item(&mut self, key: &str, value: &str, fds: &mut DescriptorTable) {
        match key {
            "state" => match value.parse::<BusNameState>() {
                Ok(state) => self.deserialized_state = state,
                Err(_) => debug!(busname = %self.unit, value, "failed to parse state value"),
            },
            "result" => match value.parse::<ActivationResult>() {
                Ok(result) => self.result.record(result),
                Err(_) => debug!(busname = %self.unit, value, "failed to parse result value"),
            },
            "starter-fd" => match value.parse::<i32>() {
                Ok(id) if id >= 0 && fds.contains(id) => {
                    self.starter = fds.take(id);
                }
                _ => debug!(busname = %self.unit, value, "failed to parse starter fd value"),
            },
            _ => debug!(busname = %self.unit, key, "unknown serialization key"),
        }
    }

    /// Re-arms the descriptor and watch of the restored state and applies it.
    pub fn coldplug(&mut self, ctx: &mut Context<'_>) -> Result<(), TransportError> {
        let restored = self.deserialized_state;
        if restored == self.state {
            return Ok(());
        }
        if restored.holds_starter() {
            self.open_starter(ctx)?;
        }
        if restored.watches_starter() {
            self.watch_starter(ctx.transport)?;
        }
        self.set_state(restored, ctx);
        Ok(())
    }

    /// Drives the entity to a terminal state with `result`.
    pub fn enter_dead(&mut self, result: ActivationResult, ctx: &mut Context<'_>) {
        self.result.record(result);
        let state = if self.result.is_success() {
            BusNameState::Dead
        } else {
            BusNameState::Failed
        };
        self.set_state(state, ctx);
    }

    /// Releases the watch and closes the descriptor.
    pub fn teardown(&mut self, transport: &mut dyn Transport) {
        self.disable_watch(transport);
        self.close_starter(transport);
    }

    fn set_state(&mut self, state: BusNameState, ctx: &mut Context<'_>) {
        let old = self.state;
        self.state = state;

        if !state.watches_starter() {
            self.disable_watch(ctx.transport);
        }
        if !state.holds_starter() {
            self.close_starter(ctx.transport);
        }
        if state != old {
            debug!(busname = %self.unit, from = %old, to = %state, "changed state");
        }

        ctx.bus.publish(StatusChange {
            entity: self.entity_ref(),
            from: old.as_str(),
            to: state.as_str(),
            old: old.active_state(),
            new: state.active_state(),
        });
    }

    fn enter_listening(&mut self, ctx: &mut Context<'_>) {
        if let Err(error) = self.open_starter(ctx) {
            warn!(busname = %self.unit, %error, "failed to listen on bus name");
            self.enter_dead(ActivationResult::Resources, ctx);
            return;
        }
        if let Err(error) = self.watch_starter(ctx.transport) {
            warn!(busname = %self.unit, %error, "failed to watch bus name");
            self.enter_dead(ActivationResult::Resources, ctx);
            return;
        }
        self.set_state(BusNameState::Listening, ctx);
    }

    fn enter_running(&mut self, ctx: &mut Context<'_>) {
        if ctx.jobs.stop_pending(&self.unit) {
            debug!(
                busname = %self.unit,
                "suppressing activation request since a stop is scheduled"
            );
            return;
        }

        if ctx.jobs.active_or_pending(&self.service) {
            debug!(busname = %self.unit, service = %self.service, "service already active or pending");
        } else if let Err(error) = ctx.jobs.enqueue_start(&self.service) {
            warn!(
                busname = %self.unit,
                service = %error.unit,
                reason = error.message(),
                "failed to queue service startup job"
            );
            self.enter_dead(ActivationResult::Resources, ctx);
            return;
        } else {
            info!(busname = %self.unit, service = %self.service, "queued service start");
        }

        self.set_state(BusNameState::Running, ctx);
    }

    fn open_starter(&mut self, ctx: &mut Context<'_>) -> Result<(), TransportError> {
        if self.starter.is_some() {
            return Ok(());
        }
        let fd = ctx.transport.create_starter(ctx.scope, &self.name)?;
        self.starter = Some(fd);
        Ok(())
    }

    fn watch_starter(&mut self, transport: &mut dyn Transport) -> Result<(), TransportError> {
        let Some(starter) = &self.starter else {
            return Err(TransportError::new("watch starter", Errno::EBADF));
        };
        if self.watch_enabled {
            return Ok(());
        }
        match self.watch {
            Some(token) => transport.set_watch_enabled(token, true)?,
            None => {
                let token = transport.watch(starter.as_fd(), EpollFlags::EPOLLIN, self.id)?;
                self.watch = Some(token);
            }
        }
        self.watch_enabled = true;
        Ok(())
    }

    fn disable_watch(&mut self, transport: &mut dyn Transport) {
        let Some(token) = self.watch else {
            return;
        };
        if !self.watch_enabled {
            return;
        }
        self.watch_enabled = false;
        if let Err(error) = transport.set_watch_enabled(token, false) {
            debug!(busname = %self.unit, %error, "failed to disable watch");
        }
    }

    fn close_starter(&mut self, transport: &mut dyn Transport) {
        if let Some(token) = self.watch.take() {
            self.watch_enabled = false;
            transport.release_watch(token);
        }
        self.starter = None;
    }
}

/// Checks a well-known bus service name.
#[must_use]
pub fn is_valid_service_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return false;
    }
    let mut elements = 0usize;
    for element in name.split('.') {
        let Some(first) = element.chars().next() else {
            return false;
        };
        if first.is_ascii_digit() {
            return false;
        }
        if !element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return false;
        }
        elements += 1;
    }
    elements >= 2
}
