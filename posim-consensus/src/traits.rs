//! Consensus seams and round result types

use crate::config::ReputationConfig;
use crate::incentives::PenaltyLedger;
use crate::validator::ValidatorState;
use posim_core::{Address, Hash};
use serde::{Deserialize, Serialize};

/// What a committee decided about one proposed block
#[derive(Debug)]
pub struct VoteVerdict<'a> {
    pub proposer: &'a ValidatorState,
    /// Committee members entitled to vote on this block, replies or not
    pub electorate: usize,
    /// Replies that arrived before the deadline
    pub ballots: Vec<(&'a ValidatorState, bool)>,
}

impl VoteVerdict<'_> {
    pub fn valid_votes(&self) -> usize {
        self.ballots.iter().filter(|(_, valid)| *valid).count()
    }

    /// Strict majority of the electorate; missing votes count against
    pub fn accepted(&self) -> bool {
        is_majority(self.valid_votes(), self.electorate)
    }

    /// Voters whose vote disagreed with the outcome
    pub fn minority(&self) -> impl Iterator<Item = &ValidatorState> + '_ {
        let accepted = self.accepted();
        self.ballots
            .iter()
            .filter(move |(_, valid)| *valid != accepted)
            .map(|(v, _)| *v)
    }

    /// Voters whose vote matched the outcome
    pub fn majority(&self) -> impl Iterator<Item = &ValidatorState> + '_ {
        let accepted = self.accepted();
        self.ballots
            .iter()
            .filter(move |(_, valid)| *valid == accepted)
            .map(|(v, _)| *v)
    }
}

/// `valid` is more than half of `electorate`
pub fn is_majority(valid: usize, electorate: usize) -> bool {
    electorate > 0 && 2 * valid > electorate
}

/// Economic consequences of consensus events, one implementation per variant
pub trait IncentivePolicy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Reward and punish proposer and voters after a vote
    fn apply_vote(&self, verdict: &VoteVerdict<'_>, penalties: &mut PenaltyLedger);

    /// Punish the proposer whose dual proposal split the network
    fn apply_fork_penalty(&self, proposer: &ValidatorState, penalties: &mut PenaltyLedger);

    /// Reward a validator for casting a delegate ballot
    fn reward_ballot(&self, voter: &ValidatorState, reputation: &ReputationConfig) {
        voter.add_reputation(reputation.reward, reputation.max);
    }
}

/// Why a slot produced no vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    NoValidators,
    NoCommittee,
    NoProposer,
    EmptyMempool,
}

/// Result of one slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Nothing was voted on
    Skipped(SkipReason),
    /// A single block was voted on
    Decided {
        proposer: Address,
        block: Hash,
        accepted: bool,
        valid_votes: usize,
        electorate: usize,
    },
    /// Two conflicting blocks were voted on by the two groups
    Split {
        proposer: Address,
        primary_accepted: bool,
        secondary_accepted: bool,
        forked: bool,
    },
}

impl RoundOutcome {
    /// Number of blocks that made it into some chain this slot
    pub fn blocks_accepted(&self) -> usize {
        match self {
            RoundOutcome::Skipped(_) => 0,
            RoundOutcome::Decided { accepted, .. } => usize::from(*accepted),
            RoundOutcome::Split {
                primary_accepted,
                secondary_accepted,
                ..
            } => usize::from(*primary_accepted) + usize::from(*secondary_accepted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strict_majority() {
        assert!(!is_majority(0, 0));
        assert!(!is_majority(1, 2));
        assert!(is_majority(2, 3));
        assert!(!is_majority(2, 4));
        assert!(is_majority(3, 4));
    }

    proptest! {
        #[test]
        fn majority_is_exclusive(electorate in 1usize..200, valid in 0usize..200) {
            let valid = valid.min(electorate);
            // At most one side of a vote can hold a strict majority.
            prop_assert!(!(is_majority(valid, electorate) && is_majority(electorate - valid, electorate)));
            prop_assert_eq!(is_majority(valid, electorate), valid * 2 > electorate);
        }
    }

    #[test]
    fn test_blocks_accepted() {
        let split = RoundOutcome::Split {
            proposer: Address::zero(),
            primary_accepted: true,
            secondary_accepted: true,
            forked: true,
        };
        assert_eq!(split.blocks_accepted(), 2);
        assert_eq!(RoundOutcome::Skipped(SkipReason::EmptyMempool).blocks_accepted(), 0);
    }
}
