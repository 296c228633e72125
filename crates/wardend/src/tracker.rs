//! Outstanding-request accounting that gates stage advancement.
//!
//! Every asynchronous request an entity issues is counted against the stage
//! that issued it and the activation attempt that stage belongs to. A stage
//! may only advance once its own count drains to zero; completions belonging
//! to an attempt that has since been abandoned (stop, restart) still drain
//! their count but never advance anything.

use std::collections::BTreeMap;
use std::fmt;

/// Identifies one counted request: which attempt and stage issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageTicket<S> {
    attempt: u64,
    stage: S,
}

impl<S: Copy> StageTicket<S> {
    /// Activation attempt the request was issued under.
    #[must_use]
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Stage that issued the request.
    #[must_use]
    pub fn stage(&self) -> S {
        self.stage
    }
}

impl<S: fmt::Display> fmt::Display for StageTicket<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}#{}", self.stage, self.attempt)
    }
}

/// What a completion did to the count of its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Other requests of the same stage are still outstanding.
    Outstanding(u32),
    /// This was the last outstanding request of its stage.
    Settled,
    /// No request was outstanding for the ticket.
    Unmatched,
}

/// Per-entity counter of outstanding requests, keyed by attempt and stage.
#[derive(Debug, Clone)]
pub struct PendingOperations<S> {
    attempt: u64,
    counts: BTreeMap<(u64, S), u32>,
}

impl<S> Default for PendingOperations<S> {
    fn default() -> Self {
        Self {
            attempt: 0,
            counts: BTreeMap::new(),
        }
    }
}

impl<S> PendingOperations<S>
where
    S: Copy + Ord + fmt::Debug,
{
    /// Builds an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new activation attempt; tickets of earlier attempts become
    /// stale.
    pub fn next_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.attempt
    }

    /// Attempt new tickets are issued under.
    #[must_use]
    pub const fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Counts a request for `stage` before it is submitted.
    ///
    /// Incrementing first means a completion delivered inline by the
    /// transport can never observe a premature zero.
    pub fn begin(&mut self, stage: S) -> StageTicket<S> {
        let ticket = StageTicket {
            attempt: self.attempt,
            stage,
        };
        *self.counts.entry((ticket.attempt, stage)).or_insert(0) += 1;
        ticket
    }

    /// Withdraws a ticket whose request could not even be submitted.
    pub fn abandon(&mut self, ticket: StageTicket<S>) {
        let _ = self.decrement(ticket);
    }

    /// Records the completion of a counted request.
    pub fn complete(&mut self, ticket: StageTicket<S>) -> Drain {
        match self.decrement(ticket) {
            Some(0) => Drain::Settled,
            Some(remaining) => Drain::Outstanding(remaining),
            None => Drain::Unmatched,
        }
    }

    /// Returns `true` when the ticket belongs to the current attempt.
    #[must_use]
    pub fn is_current(&self, ticket: StageTicket<S>) -> bool {
        ticket.attempt == self.attempt
    }

    /// Outstanding requests of `stage` in the current attempt.
    #[must_use]
    pub fn outstanding(&self, stage: S) -> u32 {
        self.counts
            .get(&(self.attempt, stage))
            .copied()
            .unwrap_or(0)
    }

    /// Outstanding requests across every attempt and stage.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }

    fn decrement(&mut self, ticket: StageTicket<S>) -> Option<u32> {
        let key = (ticket.attempt, ticket.stage);
        let count = self.counts.get_mut(&key)?;
        *count = count.saturating_sub(1);
        let remaining = *count;
        if remaining == 0 {
            self.counts.remove(&key);
        }
        Some(remaining)
    }
}
