//! Test transport: hands out real socket-pair descriptors, records every
//! call, and queues submitted requests until a scenario completes them.

use std::collections::VecDeque;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex, MutexGuard};

use nix::errno::Errno;
use nix::sys::epoll::EpollFlags;
use warden_config::BusScope;

use crate::entity::EntityId;
use crate::transport::{Completion, LinkRequest, Ticket, Transport, TransportError, WatchToken};

/// Observable transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    CreateStarter(String),
    Watch(EntityId),
    SetWatchEnabled(WatchToken, bool),
    ReleaseWatch(WatchToken),
    Submit(LinkRequest),
}

/// Transport double shared between the manager and the scenario.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    state: Arc<Mutex<TransportState>>,
}

impl RecordingTransport {
    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().expect("transport state mutex poisoned")
    }

    /// Every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    /// Forgets recorded calls; queued requests are kept.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Number of starter descriptors created.
    #[must_use]
    pub fn starters_created(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::CreateStarter(_)))
            .count()
    }

    /// Number of watches registered.
    #[must_use]
    pub fn watches_registered(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Watch(_)))
            .count()
    }

    /// Makes starter creation fail.
    pub fn fail_create_starter(&self) {
        self.state().fail_create = true;
    }

    /// Makes the `nth` submission from now (1-based) fail synchronously.
    pub fn fail_submission(&self, nth: usize) {
        let mut state = self.state();
        state.fail_submit_at = Some(state.submissions + nth);
    }

    /// Requests submitted and not yet completed, oldest first.
    #[must_use]
    pub fn queued(&self) -> Vec<(LinkRequest, Ticket)> {
        self.state().queued.iter().cloned().collect()
    }

    /// Removes the first queued request matching `predicate`.
    pub fn complete_matching(
        &self,
        predicate: impl Fn(&LinkRequest) -> bool,
        status: Result<(), Errno>,
    ) -> Option<Completion> {
        let mut state = self.state();
        let position = state.queued.iter().position(|(request, _)| predicate(request))?;
        state
            .queued
            .remove(position)
            .map(|(_, ticket)| Completion { ticket, status })
    }

    /// Drains every queued request into successful completions.
    pub fn complete_all(&self) -> Vec<Completion> {
        self.state()
            .queued
            .drain(..)
            .map(|(_, ticket)| Completion::ok(ticket))
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn create_starter(&mut self, _scope: BusScope, name: &str) -> Result<OwnedFd, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::CreateStarter(name.to_owned()));
        if state.fail_create {
            return Err(TransportError::new("create starter", Errno::EPERM));
        }
        let (local, peer) =
            UnixStream::pair().map_err(|_| TransportError::new("create starter", Errno::EMFILE))?;
        state.peers.push(peer);
        Ok(OwnedFd::from(local))
    }

    fn watch(
        &mut self,
        _fd: BorrowedFd<'_>,
        _interest: EpollFlags,
        entity: EntityId,
    ) -> Result<WatchToken, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::Watch(entity));
        state.next_token += 1;
        Ok(WatchToken(state.next_token))
    }

    fn set_watch_enabled(
        &mut self,
        token: WatchToken,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.state()
            .calls
            .push(TransportCall::SetWatchEnabled(token, enabled));
        Ok(())
    }

    fn release_watch(&mut self, token: WatchToken) {
        self.state().calls.push(TransportCall::ReleaseWatch(token));
    }

    fn submit(&mut self, request: LinkRequest, ticket: Ticket) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::Submit(request.clone()));
        state.submissions += 1;
        if state.fail_submit_at == Some(state.submissions) {
            state.fail_submit_at = None;
            return Err(TransportError::new("submit", Errno::ENOBUFS));
        }
        state.queued.push_back((request, ticket));
        Ok(())
    }
}

#[derive(Default)]
struct TransportState {
    calls: Vec<TransportCall>,
    queued: VecDeque<(LinkRequest, Ticket)>,
    peers: Vec<UnixStream>,
    next_token: u64,
    submissions: usize,
    fail_create: bool,
    fail_submit_at: Option<usize>,
}
