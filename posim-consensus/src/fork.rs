//! Fork resolution rules
//!
//! Resolution looks at every validator's chain length and tip, picks the
//! canonical chain and reports what it decided. Copying the winner to the
//! other validators is done by the round driver.

use crate::validator::ValidatorHandle;
use posim_core::{Address, Hash};
use serde::{Deserialize, Serialize};

/// One validator's chain as seen by resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainView {
    pub len: usize,
    pub tip: Hash,
}

impl ChainView {
    pub fn of(handle: &ValidatorHandle) -> Self {
        let ledger = handle.state.ledger();
        Self {
            len: ledger.chain.len(),
            tip: ledger.chain.tip().hash,
        }
    }
}

/// Decision of one resolution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Adopt the chain of the validator at this roster position
    Adopt(usize),
    /// Two forks are too close to call
    Deferred { longest: usize, runner_up: usize },
    /// No validators
    Empty,
}

/// Position of the first longest chain in roster order
pub fn longest_chain(views: &[ChainView]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, view) in views.iter().enumerate() {
        match best {
            Some(b) if views[b].len >= view.len => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Longest chain wins, ties broken by roster order
pub fn resolve_longest(views: &[ChainView]) -> Resolution {
    longest_chain(views).map_or(Resolution::Empty, Resolution::Adopt)
}

/// Compare the longest chain with the longest chain ending at a different
/// tip; adopt only when the lead is more than one block
pub fn resolve_balance(views: &[ChainView]) -> Resolution {
    let Some(best) = longest_chain(views) else {
        return Resolution::Empty;
    };
    let leader = views[best];
    let runner_up = views
        .iter()
        .filter(|v| v.tip != leader.tip)
        .map(|v| v.len)
        .max();

    match runner_up {
        Some(len) if leader.len - len <= 1 => Resolution::Deferred {
            longest: leader.len,
            runner_up: len,
        },
        _ => Resolution::Adopt(best),
    }
}

/// What a resolution pass did, for events and logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionReport {
    Adopted {
        source: Address,
        chain_len: usize,
        resynced: usize,
        punished: Option<Address>,
    },
    Deferred {
        longest: usize,
        runner_up: usize,
    },
    Skipped,
}
