//! Staged bring-up of a network link.
//!
//! ```text
//! invalid ─▶ join-bridge ─▶ bridge-joined ─▶ set-addresses ─▶ addresses-set
//!                                                                   │
//!            configured ◀─(link up)── routes-set ◀── set-routes ◀───┘
//! ```
//!
//! Each waiting stage issues its requests through the transport and only
//! advances once the tracker reports every request of that stage drained.
//! Stages with nothing to do chain straight into the next one. Entering
//! `bridge-joined` also issues the link-up request; its completion is what
//! finally moves a link from `routes-set` to `configured`.

use nix::errno::Errno;
use serde::Serialize;
use strum::{Display, EnumString, IntoStaticStr};
use tracing::{debug, info, warn};

use crate::entity::EntityId;
use crate::error::LoadError;
use crate::network::{Device, MacAddr, Network};
use crate::notify::{EntityRef, NotificationBus, StatusChange};
use crate::persistence::write_item;
use crate::status::{ActivationResult, ActiveState};
use crate::tracker::{Drain, PendingOperations, StageTicket};
use crate::transport::{LinkRequest, Ticket, Transport, TransportError};

/// Fine-grained state of a link.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum LinkState {
    /// Not configured.
    #[default]
    Invalid,
    /// Waiting for the bridge join to complete.
    JoinBridge,
    /// Bridge membership settled; link-up issued.
    BridgeJoined,
    /// Waiting for address assignments.
    SetAddresses,
    /// Every address assigned.
    AddressesSet,
    /// Waiting for route installations.
    SetRoutes,
    /// Every route installed; waiting for the link to come up.
    RoutesSet,
    /// Fully configured.
    Configured,
    /// Configuration failed or was interrupted.
    Failed,
}

impl LinkState {
    /// Coarse status reported to the dependency graph.
    #[must_use]
    pub const fn active_state(self) -> ActiveState {
        match self {
            Self::Invalid => ActiveState::Inactive,
            Self::JoinBridge
            | Self::BridgeJoined
            | Self::SetAddresses
            | Self::AddressesSet
            | Self::SetRoutes
            | Self::RoutesSet => ActiveState::Activating,
            Self::Configured => ActiveState::Active,
            Self::Failed => ActiveState::Failed,
        }
    }

    /// Stable name used in dumps and serialized state.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Returns `true` for `invalid`, `configured` and `failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Configured | Self::Failed)
    }
}

/// Collaborators a link needs while handling one event.
pub struct LinkContext<'a> {
    /// Kernel transport.
    pub transport: &'a mut dyn Transport,
    /// Status change queue.
    pub bus: &'a mut NotificationBus,
}

/// Link entity.
#[derive(Debug)]
pub struct Link {
    id: EntityId,
    ifindex: u32,
    ifname: String,
    mac: Option<MacAddr>,
    network: Option<Network>,
    master: Option<u32>,
    state: LinkState,
    deserialized_state: Option<LinkState>,
    result: ActivationResult,
    up: bool,
    pending: PendingOperations<LinkState>,
}

impl Link {
    /// Builds a link for a newly appeared device.
    pub fn new(id: EntityId, device: &Device) -> Result<Self, LoadError> {
        if device.ifindex == 0 {
            return Err(LoadError::InvalidInterfaceIndex {
                ifname: device.ifname.clone(),
            });
        }
        let mac = device
            .address
            .as_deref()
            .and_then(|address| match address.parse::<MacAddr>() {
                Ok(mac) => Some(mac),
                Err(error) => {
                    debug!(link = %device.ifname, %error, "ignoring hardware address");
                    None
                }
            });

        Ok(Self {
            id,
            ifindex: device.ifindex,
            ifname: device.ifname.clone(),
            mac,
            network: None,
            master: None,
            state: LinkState::Invalid,
            deserialized_state: None,
            result: ActivationResult::Success,
            up: false,
            pending: PendingOperations::new(),
        })
    }

    /// Registry id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Kernel interface index.
    #[must_use]
    pub const fn ifindex(&self) -> u32 {
        self.ifindex
    }

    /// Interface name.
    #[must_use]
    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    /// Hardware address, when the device reported a parseable one.
    #[must_use]
    pub const fn mac(&self) -> Option<MacAddr> {
        self.mac
    }

    /// Network applied to the link.
    #[must_use]
    pub const fn network(&self) -> Option<&Network> {
        self.network.as_ref()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Result of the most recent configuration.
    #[must_use]
    pub const fn result(&self) -> ActivationResult {
        self.result
    }

    /// Returns `true` once the link-up request has completed.
    #[must_use]
    pub const fn is_up(&self) -> bool {
        self.up
    }

    /// Requests outstanding across every attempt.
    #[must_use]
    pub fn pending_operations(&self) -> u32 {
        self.pending.total()
    }

    /// Outstanding requests issued by `stage` in the current attempt.
    #[must_use]
    pub fn outstanding(&self, stage: LinkState) -> u32 {
        self.pending.outstanding(stage)
    }

    /// Returns `true` while restored state awaits [`Link::coldplug`].
    #[must_use]
    pub const fn has_deserialized_state(&self) -> bool {
        self.deserialized_state.is_some()
    }

    /// Identity used in notifications.
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::Link {
            id: self.id,
            ifindex: self.ifindex,
            ifname: self.ifname.clone(),
        }
    }

    /// Attaches a network definition and its resolved bridge master.
    pub fn apply(&mut self, network: Network, master: Option<u32>) {
        debug!(link = %self.ifname, network = %network.name, "applying network");
        self.network = Some(network);
        self.master = master;
    }

    /// Runs the configuration from the first stage under a fresh attempt.
    pub fn configure(&mut self, ctx: &mut LinkContext<'_>) {
        self.pending.next_attempt();
        self.result = ActivationResult::Success;
        self.enter_join_bridge(ctx);
    }

    /// Configures an idle or failed link; a link already on its way or
    /// configured is left alone.
    pub fn start(&mut self, ctx: &mut LinkContext<'_>) {
        if matches!(self.state, LinkState::Invalid | LinkState::Failed) {
            self.configure(ctx);
        }
    }

    /// Interrupts the configuration.
    ///
    /// In-flight requests are not cancelled; bumping the attempt makes their
    /// completions drain without effect. A configured link returns to
    /// `invalid`, one interrupted mid-stage ends up `failed`.
    ///
    /// A stop is not an error, so the result is left as it was: a link
    /// stopped mid-stage dumps as `failed` with result `success`.
    pub fn stop(&mut self, ctx: &mut LinkContext<'_>) {
        match self.state {
            LinkState::Invalid | LinkState::Failed => {}
            LinkState::Configured => {
                self.pending.next_attempt();
                self.set_state(LinkState::Invalid, ctx);
            }
            _ => {
                self.pending.next_attempt();
                info!(
                    link = %self.ifname,
                    stage = %self.state,
                    outstanding = self.pending.total(),
                    "configuration interrupted"
                );
                self.set_state(LinkState::Failed, ctx);
            }
        }
    }

    /// Returns a failed link to `invalid` and clears its result.
    pub fn reset_failed(&mut self, ctx: &mut LinkContext<'_>) {
        if self.state == LinkState::Failed {
            self.set_state(LinkState::Invalid, ctx);
        }
        self.result = ActivationResult::Success;
    }

    /// Fails the link with `result`.
    pub fn enter_failed(&mut self, result: ActivationResult, ctx: &mut LinkContext<'_>) {
        warn!(link = %self.ifname, result = %result, "could not configure link");
        self.result.record(result);
        self.set_state(LinkState::Failed, ctx);
    }

    /// Handles the completion of a request issued under `operation`.
    pub fn complete(
        &mut self,
        operation: StageTicket<LinkState>,
        status: Result<(), Errno>,
        ctx: &mut LinkContext<'_>,
    ) {
        let current = self.pending.is_current(operation);
        let drain = self.pending.complete(operation);
        if drain == Drain::Unmatched {
            warn!(link = %self.ifname, operation = %operation, "completion matched no request");
            return;
        }
        if !current {
            debug!(link = %self.ifname, operation = %operation, "drained stale completion");
            return;
        }

        let stage = operation.stage();
        if stage == LinkState::BridgeJoined {
            self.link_up_completed(status, ctx);
            return;
        }
        if self.state != stage {
            debug!(
                link = %self.ifname,
                operation = %operation,
                state = %self.state,
                "drained completion for a stage the link has left"
            );
            return;
        }
        match status {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(errno) => warn!(
                link = %self.ifname,
                stage = %stage,
                error = %errno,
                "request failed"
            ),
        }
        if drain == Drain::Settled {
            self.advance(stage, ctx);
        }
    }

    /// Human-readable status block.
    #[must_use]
    pub fn dump(&self, prefix: &str) -> String {
        let mac = self
            .mac
            .map_or_else(|| "n/a".to_owned(), |mac| mac.to_string());
        format!(
            "{prefix}Link State: {}\n\
             {prefix}Result: {}\n\
             {prefix}Interface: {} ({})\n\
             {prefix}MAC: {mac}\n\
             {prefix}Up: {}\n\
             {prefix}Pending Operations: {}\n",
            self.state.as_str(),
            self.result.as_str(),
            self.ifname,
            self.ifindex,
            yes_no(self.up),
            self.pending.total(),
        )
    }

    /// Writes `state`, `result` and `link-up`.
    pub fn serialize(&self, out: &mut String) {
        write_item(out, "state", self.state.as_str());
        write_item(out, "result", self.result.as_str());
        write_item(out, "link-up", yes_no(self.up));
    }

    /// Applies one serialized item without issuing any request.
    pub fn deserialize_item(&mut self, key: &str, value: &str) {
        match key {
            "state" => match value.parse::<LinkState>() {
                Ok(state) => self.deserialized_state = Some(state),
                Err(_) => debug!(link = %self.ifname, value, "failed to parse state value"),
            },
            "result" => match value.parse::<ActivationResult>() {
                Ok(result) => self.result.record(result),
                Err(_) => debug!(link = %self.ifname, value, "failed to parse result value"),
            },
            "link-up" => match parse_yes_no(value) {
                Some(up) => self.up = up,
                None => debug!(link = %self.ifname, value, "failed to parse link-up value"),
            },
            _ => debug!(link = %self.ifname, key, "unknown serialization key"),
        }
    }

    /// Applies restored state.
    ///
    /// Terminal states are applied as they are. A link restored mid-stage is
    /// configured again from the first stage, since the completions it was
    /// waiting for died with the previous process image.
    pub fn coldplug(&mut self, ctx: &mut LinkContext<'_>) {
        let Some(restored) = self.deserialized_state.take() else {
            return;
        };
        if restored == self.state {
            return;
        }
        if restored.is_terminal() {
            self.set_state(restored, ctx);
        } else if self.network.is_some() {
            debug!(link = %self.ifname, stage = %restored, "restarting interrupted configuration");
            self.configure(ctx);
        }
    }

    fn advance(&mut self, stage: LinkState, ctx: &mut LinkContext<'_>) {
        match stage {
            LinkState::JoinBridge => self.enter_bridge_joined(ctx),
            LinkState::SetAddresses => self.enter_addresses_set(ctx),
            LinkState::SetRoutes => self.enter_routes_set(ctx),
            _ => {}
        }
    }

    fn enter_join_bridge(&mut self, ctx: &mut LinkContext<'_>) {
        let Some(bridge) = self.network.as_ref().and_then(|network| network.bridge.clone()) else {
            self.enter_bridge_joined(ctx);
            return;
        };
        let Some(master) = self.master else {
            warn!(link = %self.ifname, bridge = %bridge, "bridge master not found");
            self.enter_failed(ActivationResult::Dependency, ctx);
            return;
        };

        self.set_state(LinkState::JoinBridge, ctx);
        let request = LinkRequest::JoinBridge {
            ifindex: self.ifindex,
            master,
        };
        if let Err(error) = self.issue(request, LinkState::JoinBridge, ctx) {
            warn!(link = %self.ifname, %error, "could not join bridge");
            self.enter_failed(ActivationResult::Resources, ctx);
        }
    }

    fn enter_bridge_joined(&mut self, ctx: &mut LinkContext<'_>) {
        self.set_state(LinkState::BridgeJoined, ctx);
        let request = LinkRequest::SetUp {
            ifindex: self.ifindex,
        };
        if let Err(error) = self.issue(request, LinkState::BridgeJoined, ctx) {
            warn!(link = %self.ifname, %error, "could not bring up interface");
            self.enter_failed(ActivationResult::Resources, ctx);
            return;
        }
        self.enter_set_addresses(ctx);
    }

    fn enter_set_addresses(&mut self, ctx: &mut LinkContext<'_>) {
        let addresses = self
            .network
            .as_ref()
            .map(|network| network.addresses.clone())
            .unwrap_or_default();
        if addresses.is_empty() {
            self.enter_addresses_set(ctx);
            return;
        }

        self.set_state(LinkState::SetAddresses, ctx);
        for address in addresses {
            let request = LinkRequest::AddAddress {
                ifindex: self.ifindex,
                address,
            };
            if let Err(error) = self.issue(request, LinkState::SetAddresses, ctx) {
                warn!(link = %self.ifname, %error, "could not set address");
                self.enter_failed(ActivationResult::Resources, ctx);
                return;
            }
        }
    }

    fn enter_addresses_set(&mut self, ctx: &mut LinkContext<'_>) {
        info!(link = %self.ifname, "addresses set");
        self.set_state(LinkState::AddressesSet, ctx);
        self.enter_set_routes(ctx);
    }

    fn enter_set_routes(&mut self, ctx: &mut LinkContext<'_>) {
        let routes = self
            .network
            .as_ref()
            .map(|network| network.routes.clone())
            .unwrap_or_default();
        if routes.is_empty() {
            self.enter_routes_set(ctx);
            return;
        }

        self.set_state(LinkState::SetRoutes, ctx);
        for route in routes {
            let request = LinkRequest::AddRoute {
                ifindex: self.ifindex,
                route,
            };
            if let Err(error) = self.issue(request, LinkState::SetRoutes, ctx) {
                warn!(link = %self.ifname, %error, "could not set route");
                self.enter_failed(ActivationResult::Resources, ctx);
                return;
            }
        }
    }

    fn enter_routes_set(&mut self, ctx: &mut LinkContext<'_>) {
        info!(link = %self.ifname, "routes set");
        if self.up {
            self.enter_configured(ctx);
        } else {
            self.set_state(LinkState::RoutesSet, ctx);
        }
    }

    fn enter_configured(&mut self, ctx: &mut LinkContext<'_>) {
        info!(link = %self.ifname, "link configured");
        self.set_state(LinkState::Configured, ctx);
    }

    fn link_up_completed(&mut self, status: Result<(), Errno>, ctx: &mut LinkContext<'_>) {
        if let Err(errno) = status {
            warn!(link = %self.ifname, error = %errno, "could not bring up interface");
        }
        self.up = true;
        info!(link = %self.ifname, "link is up");
        if self.state == LinkState::RoutesSet {
            self.enter_configured(ctx);
        }
    }

    fn issue(
        &mut self,
        request: LinkRequest,
        stage: LinkState,
        ctx: &mut LinkContext<'_>,
    ) -> Result<(), TransportError> {
        let operation = self.pending.begin(stage);
        let ticket = Ticket {
            entity: self.id,
            operation,
        };
        if let Err(error) = ctx.transport.submit(request, ticket) {
            self.pending.abandon(operation);
            return Err(error);
        }
        Ok(())
    }

    fn set_state(&mut self, state: LinkState, ctx: &mut LinkContext<'_>) {
        let old = self.state;
        self.state = state;
        if state != old {
            debug!(link = %self.ifname, from = %old, to = %state, "changed state");
        }
        ctx.bus.publish(StatusChange {
            entity: self.entity_ref(),
            from: old.as_str(),
            to: state.as_str(),
            old: old.active_state(),
            new: state.active_state(),
        });
    }
}

const fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}
