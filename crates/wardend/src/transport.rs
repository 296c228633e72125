//! Contract with the kernel transport that carries entity requests.
//!
//! The transport is owned by the event loop and shared by every entity. It
//! creates activation descriptors, watches them for readiness, and submits
//! configuration requests whose completions are later handed back to the
//! manager as [`Completion`] values. Issuing never blocks: a request either
//! fails synchronously or produces exactly one completion later.

use std::os::fd::{BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::epoll::EpollFlags;
use thiserror::Error;
use warden_config::BusScope;

use crate::entity::EntityId;
use crate::link::LinkState;
use crate::network::{Address, Route};
use crate::tracker::StageTicket;

/// Handle to a readiness watch registered with the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchToken(pub u64);

/// Configuration request submitted on behalf of a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// Enslave the interface to a bridge master.
    JoinBridge {
        /// Interface joining the bridge.
        ifindex: u32,
        /// Interface index of the bridge master.
        master: u32,
    },
    /// Assign an address.
    AddAddress {
        /// Target interface.
        ifindex: u32,
        /// Address to assign.
        address: Address,
    },
    /// Install a route.
    AddRoute {
        /// Target interface.
        ifindex: u32,
        /// Route to install.
        route: Route,
    },
    /// Set the interface administratively up.
    SetUp {
        /// Target interface.
        ifindex: u32,
    },
}

/// Continuation handed to the transport with every submitted request.
///
/// It names the entity by generational id and carries the stage ticket the
/// request was counted under, so the completion can be routed back and
/// matched against the tracker without holding a reference to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    /// Link that issued the request.
    pub entity: EntityId,
    /// Stage and attempt the request was counted under.
    pub operation: StageTicket<LinkState>,
}

/// Completion delivered by the transport on the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Ticket supplied at submission.
    pub ticket: Ticket,
    /// Kernel status of the request.
    pub status: Result<(), Errno>,
}

impl Completion {
    /// Successful completion of `ticket`.
    #[must_use]
    pub const fn ok(ticket: Ticket) -> Self {
        Self {
            ticket,
            status: Ok(()),
        }
    }

    /// Failed completion of `ticket`.
    #[must_use]
    pub const fn failed(ticket: Ticket, errno: Errno) -> Self {
        Self {
            ticket,
            status: Err(errno),
        }
    }
}

/// Error raised when a transport operation cannot even be issued.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{operation} failed: {errno}")]
pub struct TransportError {
    /// Operation that failed.
    pub operation: &'static str,
    /// Kernel error code.
    pub errno: Errno,
}

impl TransportError {
    /// Builds an error for `operation`.
    #[must_use]
    pub const fn new(operation: &'static str, errno: Errno) -> Self {
        Self { operation, errno }
    }
}

/// Kernel-facing operations consumed by entities.
pub trait Transport {
    /// Creates the activation descriptor for a bus name on `scope`.
    fn create_starter(&mut self, scope: BusScope, name: &str) -> Result<OwnedFd, TransportError>;

    /// Registers a readiness watch for `fd` on behalf of `entity`.
    fn watch(
        &mut self,
        fd: BorrowedFd<'_>,
        interest: EpollFlags,
        entity: EntityId,
    ) -> Result<WatchToken, TransportError>;

    /// Enables or disables a registered watch.
    fn set_watch_enabled(&mut self, token: WatchToken, enabled: bool)
    -> Result<(), TransportError>;

    /// Drops a registered watch.
    fn release_watch(&mut self, token: WatchToken);

    /// Submits a configuration request; exactly one [`Completion`] carrying
    /// `ticket` follows unless this returns an error.
    fn submit(&mut self, request: LinkRequest, ticket: Ticket) -> Result<(), TransportError>;
}
