//! Incentive policies for the three consensus variants

use crate::config::{ConsensusVariant, ReputationConfig, SimulationConfig};
use crate::traits::{IncentivePolicy, VoteVerdict};
use crate::validator::ValidatorState;
use posim_core::Address;
use std::collections::HashSet;
use tracing::info;

/// Validators already penalised in the current round
///
/// A validator caught twice in one round (say, as failed proposer and as
/// minority voter) is penalised once.
#[derive(Debug, Default)]
pub struct PenaltyLedger {
    penalised: HashSet<Address>,
}

impl PenaltyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `penalty` unless this validator was already penalised this round
    pub fn penalise<F>(&mut self, validator: &ValidatorState, penalty: F) -> bool
    where
        F: FnOnce(&ValidatorState),
    {
        if !self.penalised.insert(validator.address()) {
            return false;
        }
        penalty(validator);
        true
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.penalised.contains(address)
    }

    pub fn len(&self) -> usize {
        self.penalised.len()
    }

    pub fn is_empty(&self) -> bool {
        self.penalised.is_empty()
    }
}

/// Plain proof of stake: rewards flow through settlement, nobody is punished
#[derive(Debug, Default)]
pub struct PlainIncentives;

impl IncentivePolicy for PlainIncentives {
    fn name(&self) -> &'static str {
        "pos"
    }

    fn apply_vote(&self, _verdict: &VoteVerdict<'_>, _penalties: &mut PenaltyLedger) {}

    fn apply_fork_penalty(&self, proposer: &ValidatorState, _penalties: &mut PenaltyLedger) {
        info!(
            proposer = %proposer.address().short(),
            "fork resolved, plain proof of stake has no penalty"
        );
    }
}

/// Multiplicative stake slashing for failed proposers and minority voters
#[derive(Debug)]
pub struct SlashingIncentives {
    slash_factor: f64,
}

impl SlashingIncentives {
    pub fn new(slash_factor: f64) -> Self {
        Self { slash_factor }
    }

    fn slash(&self, validator: &ValidatorState, penalties: &mut PenaltyLedger, reason: &str) {
        let factor = self.slash_factor;
        let applied = penalties.penalise(validator, |v| v.scale_stake(factor));
        if applied {
            info!(
                validator = %validator.address().short(),
                stake = validator.stake(),
                reason,
                "stake slashed"
            );
        }
    }
}

impl IncentivePolicy for SlashingIncentives {
    fn name(&self) -> &'static str {
        "slashing"
    }

    fn apply_vote(&self, verdict: &VoteVerdict<'_>, penalties: &mut PenaltyLedger) {
        if verdict.electorate == 0 {
            return;
        }
        if !verdict.accepted() {
            self.slash(verdict.proposer, penalties, "proposal rejected");
        }
        for voter in verdict.minority() {
            self.slash(voter, penalties, "minority vote");
        }
    }

    fn apply_fork_penalty(&self, proposer: &ValidatorState, penalties: &mut PenaltyLedger) {
        self.slash(proposer, penalties, "forked the network");
    }
}

/// Reputation rewards and multiplicative reputation penalties
#[derive(Debug)]
pub struct ReputationIncentives {
    slash_factor: f64,
    reputation: ReputationConfig,
}

impl ReputationIncentives {
    pub fn new(slash_factor: f64, reputation: ReputationConfig) -> Self {
        Self {
            slash_factor,
            reputation,
        }
    }

    fn reward(&self, validator: &ValidatorState) {
        validator.add_reputation(self.reputation.reward, self.reputation.max);
    }

    fn penalise(
        &self,
        validator: &ValidatorState,
        factor: f64,
        penalties: &mut PenaltyLedger,
        reason: &str,
    ) {
        let max = self.reputation.max;
        if penalties.penalise(validator, |v| v.scale_reputation(factor, max)) {
            info!(
                validator = %validator.address().short(),
                reputation = validator.reputation(),
                reason,
                "reputation reduced"
            );
        }
    }
}

impl IncentivePolicy for ReputationIncentives {
    fn name(&self) -> &'static str {
        "reputation"
    }

    fn apply_vote(&self, verdict: &VoteVerdict<'_>, penalties: &mut PenaltyLedger) {
        if verdict.electorate == 0 {
            return;
        }
        if verdict.accepted() {
            self.reward(verdict.proposer);
        } else {
            self.penalise(verdict.proposer, self.slash_factor, penalties, "proposal rejected");
        }
        for voter in verdict.majority() {
            self.reward(voter);
        }
        for voter in verdict.minority() {
            self.penalise(voter, self.reputation.vote_penalty, penalties, "minority vote");
        }
    }

    fn apply_fork_penalty(&self, proposer: &ValidatorState, penalties: &mut PenaltyLedger) {
        self.penalise(proposer, self.slash_factor, penalties, "forked the network");
    }
}

/// Build the policy for the configured variant
pub fn incentive_policy(config: &SimulationConfig) -> Box<dyn IncentivePolicy> {
    match config.variant {
        ConsensusVariant::Pos => Box::new(PlainIncentives),
        ConsensusVariant::Slashing => Box::new(SlashingIncentives::new(config.slash_factor)),
        ConsensusVariant::Reputation => Box::new(ReputationIncentives::new(
            config.slash_factor,
            config.reputation,
        )),
    }
}
