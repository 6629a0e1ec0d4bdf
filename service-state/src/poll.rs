//! Generation-tagged poll batches.
//!
//! Every query of a batch carries the batch's [`Generation`]. Starting or
//! cancelling a batch allocates a fresh generation, which turns every response
//! still in flight into a stale one. In-flight requests are never cancelled,
//! their results are dropped on arrival.

use crate::modem::{PollQuery, Reply, Token};
use derive_more::Display;
use thiserror::Error;

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("gen-{_0}")]
pub struct Generation(u64);

#[derive(Debug, Error)]
#[error("malformed {query:?} response: got a {got} reply")]
pub struct MalformedReply {
    pub query: PollQuery,
    pub got: &'static str,
}

impl MalformedReply {
    pub fn new(query: PollQuery, reply: &Reply) -> Self {
        Self {
            query,
            got: reply.name(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PollCoordinator {
    generation: u64,
    outstanding: usize,
}

impl PollCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation)
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Starts a new batch with no queries issued yet.
    pub fn start(&mut self) -> Generation {
        self.cancel();
        self.generation()
    }

    /// Counts one more query against the active batch and returns its token.
    pub fn issue(&mut self, query: PollQuery) -> Token {
        self.outstanding += 1;
        Token::Poll {
            generation: self.generation(),
            query,
        }
    }

    /// Orphans every response tied to the active batch.
    pub fn cancel(&mut self) {
        self.generation += 1;
        self.outstanding = 0;
    }

    /// A response belongs to the live batch only while that batch still waits
    /// for responses. Once it completed, late duplicates are stale too.
    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.generation() && self.outstanding > 0
    }

    /// Accounts for one processed response. Returns true when it was the last.
    pub fn complete_one(&mut self) -> bool {
        debug_assert!(self.outstanding > 0);
        self.outstanding = self.outstanding.saturating_sub(1);
        self.outstanding == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_counts_down_a_batch() {
        // Arrange
        let mut poll = PollCoordinator::new();
        let generation = poll.start();

        // Act
        let tokens: Vec<_> = [PollQuery::Operator, PollQuery::VoiceRegistration]
            .into_iter()
            .map(|q| poll.issue(q))
            .collect();

        // Assert
        assert_eq!(tokens.len(), 2);
        assert!(poll.is_current(generation));
        assert!(!poll.complete_one());
        assert!(poll.complete_one());
        assert!(!poll.is_current(generation));
    }

    #[test]
    fn it_orphans_responses_on_cancel() {
        let mut poll = PollCoordinator::new();
        let old = poll.start();
        poll.issue(PollQuery::Operator);

        poll.cancel();

        assert!(!poll.is_current(old));
        assert_ne!(poll.generation(), old);
        assert_eq!(poll.outstanding(), 0);
    }

    #[test]
    fn it_never_reuses_a_generation() {
        let mut poll = PollCoordinator::new();
        let a = poll.start();
        poll.cancel();
        poll.cancel();
        let b = poll.start();

        assert!(b > a);
        assert_eq!(b.to_string(), "gen-4");
    }
}
