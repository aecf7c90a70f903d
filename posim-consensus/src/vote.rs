//! Fan-out/fan-in helpers for votes and acknowledgements
//!
//! Replies are collected until every expected one arrived, the deadline
//! passed or the simulation was cancelled, whichever comes first.

use crate::message::VoteMessage;
use crate::{ConsensusError, ConsensusResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Replies gathered from one fan-out
#[derive(Debug)]
pub struct Replies<T> {
    pub received: Vec<T>,
    /// Expected replies that never arrived
    pub missing: usize,
}

impl<T> Replies<T> {
    /// `VoteTimeout` when some expected reply never arrived
    pub fn complete(&self) -> ConsensusResult<()> {
        match self.missing {
            0 => Ok(()),
            missing => Err(ConsensusError::VoteTimeout { missing }),
        }
    }
}

/// Receive up to `expected` votes for `round`
pub async fn collect_votes(
    mut inbox: mpsc::Receiver<VoteMessage>,
    round: u64,
    expected: usize,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Replies<VoteMessage> {
    let until = Instant::now() + deadline;
    let mut votes = Vec::with_capacity(expected);

    while votes.len() < expected {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(until) => break,
            received = inbox.recv() => match received {
                Some(vote) if vote.round == round => votes.push(vote),
                Some(stale) => warn!(round, stale_round = stale.round, "dropping stale vote"),
                None => break,
            },
        }
    }

    Replies {
        missing: expected - votes.len(),
        received: votes,
    }
}

/// Wait for acknowledgements; a dropped sender counts as missing
pub async fn await_acks<T>(
    acks: Vec<oneshot::Receiver<T>>,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Replies<T> {
    let expected = acks.len();
    let mut pending: FuturesUnordered<_> = acks.into_iter().collect();
    let until = Instant::now() + deadline;
    let mut received = Vec::with_capacity(expected);

    while !pending.is_empty() {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(until) => break,
            next = pending.next() => match next {
                Some(Ok(value)) => received.push(value),
                Some(Err(_)) => {}
                None => break,
            },
        }
    }

    Replies {
        missing: expected - received.len(),
        received,
    }
}
