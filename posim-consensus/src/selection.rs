//! Committee, proposer and delegate selection

use crate::message::{Candidate, DelegateBallot};
use crate::validator::ValidatorHandle;
use posim_core::Address;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::HashMap;

fn weight(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 {
        w
    } else {
        0.0
    }
}

/// Pick one index with probability proportional to its weight
///
/// Draws `u` uniformly from `[0, total)` and walks the cumulative sum until it
/// reaches `u`. Zero-weight entries are never returned.
pub fn weighted_pick<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> Option<usize> {
    let total: f64 = weights.iter().copied().map(weight).sum();
    if total <= 0.0 {
        return None;
    }

    let u = rng.random_range(0.0..total);
    let mut running = 0.0;
    let mut last_positive = None;
    for (i, w) in weights.iter().copied().map(weight).enumerate() {
        if w == 0.0 {
            continue;
        }
        running += w;
        last_positive = Some(i);
        if running >= u {
            return Some(i);
        }
    }
    // Rounding can leave `running` a hair below `u`.
    last_positive
}

/// Draw up to `count` distinct indices, each with probability proportional to
/// its weight among those not yet drawn
pub fn weighted_sample<R: Rng + ?Sized>(weights: &[f64], count: usize, rng: &mut R) -> Vec<usize> {
    let mut remaining: Vec<f64> = weights.iter().copied().map(weight).collect();
    let mut picked = Vec::with_capacity(count.min(weights.len()));

    while picked.len() < count {
        let Some(i) = weighted_pick(&remaining, rng) else {
            break;
        };
        remaining[i] = 0.0;
        picked.push(i);
    }
    picked
}

/// Stake-weighted committee without replacement; may come back short
pub fn choose_committee<R: Rng + ?Sized>(
    roster: &[ValidatorHandle],
    size: usize,
    rng: &mut R,
) -> Vec<ValidatorHandle> {
    let stakes: Vec<f64> = roster.iter().map(|v| v.state.stake()).collect();
    weighted_sample(&stakes, size, rng)
        .into_iter()
        .map(|i| roster[i].clone())
        .collect()
}

/// Stake-weighted proposer from the committee
pub fn choose_proposer<R: Rng + ?Sized>(
    committee: &[ValidatorHandle],
    rng: &mut R,
) -> Option<ValidatorHandle> {
    let stakes: Vec<f64> = committee.iter().map(|v| v.state.stake()).collect();
    weighted_pick(&stakes, rng).map(|i| committee[i].clone())
}

/// A voter's ballot: the `n` highest-reputation candidates, best first
///
/// Equal reputations keep roster order.
pub fn rank_by_reputation(candidates: &[Candidate], n: usize) -> Vec<Address> {
    let mut ranked: Vec<&Candidate> = candidates.iter().collect();
    ranked.sort_by(|a, b| {
        b.reputation
            .partial_cmp(&a.reputation)
            .unwrap_or(Ordering::Equal)
    });
    ranked.into_iter().take(n).map(|c| c.address).collect()
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    votes: u64,
    first_preferences: u64,
}

/// Count ballots and return the `n` most-nominated validators
///
/// Every nomination on a ballot counts one vote, not only the first
/// preference. Ties go to more first preferences, then to earlier roster
/// position. Nominees missing from `roster` are ignored.
pub fn tally_delegates(ballots: &[DelegateBallot], roster: &[Address], n: usize) -> Vec<Address> {
    let mut tallies: HashMap<Address, Tally> = HashMap::new();
    for ballot in ballots {
        for (rank, nominee) in ballot.nominees.iter().enumerate() {
            let tally = tallies.entry(*nominee).or_default();
            tally.votes += 1;
            if rank == 0 {
                tally.first_preferences += 1;
            }
        }
    }

    let mut nominated: Vec<(usize, Address, Tally)> = roster
        .iter()
        .enumerate()
        .filter_map(|(pos, addr)| tallies.get(addr).map(|t| (pos, *addr, *t)))
        .collect();

    nominated.sort_by(|(pos_a, _, a), (pos_b, _, b)| {
        b.votes
            .cmp(&a.votes)
            .then(b.first_preferences.cmp(&a.first_preferences))
            .then(pos_a.cmp(pos_b))
    });

    nominated.into_iter().take(n).map(|(_, addr, _)| addr).collect()
}

/// Round-robin proposer order over the elected delegates
#[derive(Debug, Clone)]
pub struct DelegateSchedule {
    term: u64,
    counter: u64,
    delegates: Vec<Address>,
}

impl DelegateSchedule {
    /// A schedule that re-elects every `term` rounds; the first round always elects
    pub fn new(term: u64) -> Self {
        Self {
            term: term.max(1),
            counter: 0,
            delegates: Vec::new(),
        }
    }

    pub fn needs_election(&self) -> bool {
        self.delegates.is_empty() || self.counter >= self.term
    }

    /// Install a freshly elected set and restart the term
    pub fn install(&mut self, delegates: Vec<Address>) {
        self.delegates = delegates;
        self.counter = 0;
    }

    /// Proposer for this round, advancing the rotation
    pub fn next_proposer(&mut self) -> Option<Address> {
        if self.delegates.is_empty() {
            return None;
        }
        let proposer = self.delegates[(self.counter % self.delegates.len() as u64) as usize];
        self.counter += 1;
        Some(proposer)
    }

    pub fn delegates(&self) -> &[Address] {
        &self.delegates
    }
}
