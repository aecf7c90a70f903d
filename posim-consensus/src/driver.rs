//! Round driver
//!
//! A single control loop advances discrete slots. Each slot may first run
//! fork resolution, then selects a committee and proposer, collects votes on
//! the proposed block(s), settles accepted blocks and applies incentives.

use crate::attack::{BalanceTarget, ForkState};
use crate::config::{AttackMode, ConsensusVariant};
use crate::context::SimulationContext;
use crate::fork::{resolve_balance, resolve_longest, ChainView, Resolution, ResolutionReport};
use crate::incentives::{incentive_policy, PenaltyLedger};
use crate::message::{
    Branch, Candidate, ControlMessage, DelegateVoteRequest, ShortAttackRequest, ValidateRequest,
    VoteMessage,
};
use crate::producer::{generate_block_on, generate_conflicting_pair};
use crate::report::SimulationEvent;
use crate::selection::{choose_committee, choose_proposer, tally_delegates, DelegateSchedule};
use crate::traits::{IncentivePolicy, RoundOutcome, SkipReason, VoteVerdict};
use crate::validator::{ValidatorHandle, ValidatorState};
use crate::vote::{await_acks, collect_votes, Replies};
use crate::{ConsensusError, ConsensusResult};
use posim_core::{Address, Block};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of the current round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Between rounds
    Idle,
    CommitteeChosen,
    ProposerChosen,
    BlockProposed,
    VotesCollected,
    Settled,
}

/// Committee and proposer for one round
#[derive(Debug, Clone)]
pub struct RoundPlan {
    pub committee: Vec<ValidatorHandle>,
    pub proposer: ValidatorHandle,
}

pub struct RoundDriver {
    ctx: Arc<SimulationContext>,
    policy: Box<dyn IncentivePolicy>,
    rng: StdRng,
    phase: RoundPhase,
    round: u64,
    slots_since_resolution: u64,
    fork: ForkState,
    delegates: DelegateSchedule,
    cancel: CancellationToken,
    event_sender: Option<mpsc::UnboundedSender<SimulationEvent>>,
}

impl RoundDriver {
    pub fn new(ctx: Arc<SimulationContext>, cancel: CancellationToken) -> Self {
        let config = ctx.config();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let policy = incentive_policy(config);
        let delegates = DelegateSchedule::new(config.delegate_term());
        info!(policy = policy.name(), seeded = config.seed.is_some(), "round driver created");

        Self {
            ctx,
            policy,
            rng,
            phase: RoundPhase::Idle,
            round: 0,
            slots_since_resolution: 0,
            fork: ForkState::default(),
            delegates,
            cancel,
            event_sender: None,
        }
    }

    /// Set event sender for notifications
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<SimulationEvent>) {
        self.event_sender = Some(sender);
    }

    pub fn context(&self) -> &Arc<SimulationContext> {
        &self.ctx
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_forked(&self) -> bool {
        self.fork.is_forked()
    }

    pub fn fork_proposer(&self) -> Option<Address> {
        self.fork.proposer()
    }

    pub fn delegates(&self) -> &[Address] {
        self.delegates.delegates()
    }

    /// Drive slots until cancelled or `max_rounds` is reached
    pub async fn run(mut self) -> u64 {
        let mut ticker = tokio::time::interval(self.ctx.config().slot_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(slot_ms = self.ctx.config().slot_duration_ms, "round driver started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Some(max) = self.ctx.config().max_rounds {
                if self.round >= max {
                    info!(max, "round limit reached");
                    break;
                }
            }
            if let Err(e) = self.next_slot().await {
                warn!(round = self.round, "slot failed: {}", e);
            }
        }

        info!(rounds = self.round, "round driver stopped");
        self.round
    }

    /// Run one full slot: periodic fork resolution, selection, vote, settlement
    pub async fn next_slot(&mut self) -> ConsensusResult<RoundOutcome> {
        self.round += 1;
        let mut penalties = PenaltyLedger::new();

        self.slots_since_resolution += 1;
        if self.slots_since_resolution >= self.ctx.config().fork_resolution_interval {
            self.slots_since_resolution = 0;
            self.resolve_forks_with(&mut penalties).await?;
        }

        let outcome = match self.plan_round().await {
            Ok(plan) => self.execute(plan, &mut penalties).await?,
            Err(reason) => {
                info!(round = self.round, ?reason, "round skipped");
                RoundOutcome::Skipped(reason)
            }
        };
        self.finish_round(&outcome);
        Ok(outcome)
    }

    /// Run one round with a preselected committee and proposer
    pub async fn play_round(&mut self, plan: RoundPlan) -> ConsensusResult<RoundOutcome> {
        self.round += 1;
        let mut penalties = PenaltyLedger::new();
        let outcome = self.execute(plan, &mut penalties).await?;
        self.finish_round(&outcome);
        Ok(outcome)
    }

    /// Reconcile all validators onto one canonical chain
    pub async fn resolve_forks(&mut self) -> ConsensusResult<ResolutionReport> {
        let mut penalties = PenaltyLedger::new();
        self.resolve_forks_with(&mut penalties).await
    }

    async fn resolve_forks_with(
        &mut self,
        penalties: &mut PenaltyLedger,
    ) -> ConsensusResult<ResolutionReport> {
        let roster = self.ctx.validators();
        let views: Vec<ChainView> = roster.iter().map(ChainView::of).collect();
        let resolution = match self.ctx.config().attack {
            AttackMode::Balance => resolve_balance(&views),
            _ => resolve_longest(&views),
        };

        let report = match resolution {
            Resolution::Empty => ResolutionReport::Skipped,
            Resolution::Deferred { longest, runner_up } => {
                info!(longest, runner_up, "forks too close, resolution deferred");
                ResolutionReport::Deferred { longest, runner_up }
            }
            Resolution::Adopt(position) => {
                let source = &roster[position];
                let canonical = source.state.ledger_snapshot();
                let chain_len = canonical.chain.len();
                self.ctx.set_certified(canonical.chain.blocks().to_vec());

                let mut acks = Vec::with_capacity(roster.len());
                for (i, validator) in roster.iter().enumerate() {
                    if i == position {
                        continue;
                    }
                    let (ack, rx) = oneshot::channel();
                    let message = ControlMessage::ConsensusResync {
                        ledger: Box::new(canonical.clone()),
                        ack,
                    };
                    match validator.send_control(message) {
                        Ok(()) => acks.push(rx),
                        Err(e) => warn!("resync not sent: {}", e),
                    }
                }
                let replies = await_acks(acks, self.ctx.config().vote_timeout(), &self.cancel).await;
                if let Err(e) = replies.complete() {
                    warn!("resync incomplete: {}", e);
                }
                let resynced = replies.received.len();

                let punished = self.fork.close();
                if let Some(address) = punished {
                    match self.ctx.validator(&address) {
                        Some(offender) => self.policy.apply_fork_penalty(&offender.state, penalties),
                        None => warn!(proposer = %address.short(), "fork proposer left the roster"),
                    }
                }

                info!(
                    source = %source.address().short(),
                    chain_len,
                    resynced,
                    "fork resolution adopted canonical chain"
                );
                ResolutionReport::Adopted {
                    source: source.address(),
                    chain_len,
                    resynced,
                    punished,
                }
            }
        };

        self.emit(SimulationEvent::ForkResolved {
            round: self.round,
            report: report.clone(),
        });
        Ok(report)
    }

    async fn plan_round(&mut self) -> Result<RoundPlan, SkipReason> {
        let roster = self.ctx.validators();
        if roster.is_empty() {
            return Err(SkipReason::NoValidators);
        }

        if self.ctx.config().variant == ConsensusVariant::Reputation {
            if self.delegates.needs_election() {
                self.elect_delegates(&roster).await;
            }
            let committee: Vec<ValidatorHandle> = self
                .delegates
                .delegates()
                .iter()
                .filter_map(|a| roster.iter().find(|v| v.address() == *a).cloned())
                .collect();
            if committee.is_empty() {
                return Err(SkipReason::NoCommittee);
            }
            let proposer = self
                .delegates
                .next_proposer()
                .and_then(|a| committee.iter().find(|v| v.address() == a).cloned())
                .ok_or(SkipReason::NoProposer)?;
            return Ok(RoundPlan { committee, proposer });
        }

        let committee = choose_committee(&roster, self.ctx.config().committee_size, &mut self.rng);
        if committee.is_empty() {
            return Err(SkipReason::NoCommittee);
        }
        let proposer = choose_proposer(&committee, &mut self.rng).ok_or(SkipReason::NoProposer)?;
        Ok(RoundPlan { committee, proposer })
    }

    async fn elect_delegates(&mut self, roster: &[ValidatorHandle]) {
        let delegate_size = self.ctx.config().delegate_size;
        let request = DelegateVoteRequest {
            delegate_size,
            candidates: roster
                .iter()
                .map(|v| Candidate {
                    address: v.address(),
                    reputation: v.state.reputation(),
                })
                .collect(),
        };

        let mut replies = Vec::with_capacity(roster.len());
        for validator in roster {
            let (reply, rx) = oneshot::channel();
            let message = ControlMessage::DelegateVote {
                request: request.clone(),
                reply,
            };
            match validator.send_control(message) {
                Ok(()) => replies.push(rx),
                Err(e) => warn!("ballot request not sent: {}", e),
            }
        }
        let replies = await_acks(replies, self.ctx.config().vote_timeout(), &self.cancel).await;
        if let Err(e) = replies.complete() {
            warn!(round = self.round, "delegate election: {}", e);
        }
        let ballots = replies.received;

        let reputation = self.ctx.config().reputation;
        for ballot in &ballots {
            if let Some(voter) = roster.iter().find(|v| v.address() == ballot.voter) {
                self.policy.reward_ballot(&voter.state, &reputation);
            }
        }

        let order: Vec<Address> = roster.iter().map(ValidatorHandle::address).collect();
        let elected = tally_delegates(&ballots, &order, delegate_size);
        info!(
            round = self.round,
            ballots = ballots.len(),
            delegates = ?elected.iter().map(|a| a.short()).collect::<Vec<_>>(),
            "delegates elected"
        );
        self.delegates.install(elected.clone());
        self.emit(SimulationEvent::DelegatesElected {
            round: self.round,
            delegates: elected,
        });
    }

    async fn execute(
        &mut self,
        plan: RoundPlan,
        penalties: &mut PenaltyLedger,
    ) -> ConsensusResult<RoundOutcome> {
        let RoundPlan {
            committee,
            proposer,
        } = plan;

        self.phase = RoundPhase::CommitteeChosen;
        for member in &committee {
            member.state.record_committee_seat();
        }

        self.phase = RoundPhase::ProposerChosen;
        proposer.state.record_proposal();
        info!(
            round = self.round,
            proposer = %proposer.address().short(),
            malicious = proposer.state.is_malicious(),
            committee = committee.len(),
            "proposer elected"
        );

        let dual = self.ctx.config().attack == AttackMode::NetworkPartition
            && proposer.state.is_malicious()
            && !self.fork.is_forked();
        if dual {
            return self.execute_dual(&committee, &proposer, penalties).await;
        }

        let (predecessor, scripted_vote) = self.choose_parent(&proposer);
        let max = self.ctx.config().max_block_transactions;
        let block = match generate_block_on(&proposer.state, &predecessor, max) {
            Ok(block) => block,
            Err(ConsensusError::InsufficientMempool) => return Ok(self.skip_empty(&proposer)),
            Err(e) => return Err(e),
        };
        self.phase = RoundPhase::BlockProposed;

        let round = self.round;
        let collected = self
            .poll_committee(&committee, |reply| {
                ControlMessage::Validate(ValidateRequest {
                    round,
                    block: block.clone(),
                    predecessor: predecessor.clone(),
                    scripted_vote,
                    reply,
                })
            })
            .await;
        self.phase = RoundPhase::VotesCollected;

        let verdict = verdict_for(&proposer.state, &committee, &collected.received, Branch::Primary);
        let accepted = verdict.accepted();
        let valid_votes = verdict.valid_votes();

        if accepted {
            let recipients = if self.fork.is_forked() {
                self.ctx.group_members(proposer.state.group())
            } else {
                self.ctx.validators()
            };
            self.commit(&block, &proposer.state, &recipients).await;
        }
        info!(
            round,
            block = %block.hash.short(),
            valid_votes,
            electorate = committee.len(),
            accepted,
            "block voted"
        );

        self.policy.apply_vote(&verdict, penalties);
        self.phase = RoundPhase::Settled;

        Ok(RoundOutcome::Decided {
            proposer: proposer.address(),
            block: block.hash,
            accepted,
            valid_votes,
            electorate: committee.len(),
        })
    }

    async fn execute_dual(
        &mut self,
        committee: &[ValidatorHandle],
        proposer: &ValidatorHandle,
        penalties: &mut PenaltyLedger,
    ) -> ConsensusResult<RoundOutcome> {
        let predecessor = proposer.state.tip();
        let max = self.ctx.config().max_block_transactions;
        let (primary, secondary) = match generate_conflicting_pair(&proposer.state, &predecessor, max) {
            Ok(pair) => pair,
            Err(ConsensusError::InsufficientMempool) => return Ok(self.skip_empty(proposer)),
            Err(e) => return Err(e),
        };
        self.phase = RoundPhase::BlockProposed;
        warn!(
            round = self.round,
            proposer = %proposer.address().short(),
            primary = %primary.hash.short(),
            secondary = %secondary.hash.short(),
            "malicious proposer sent conflicting blocks"
        );

        let round = self.round;
        let primary_group = proposer.state.group();
        let collected = self
            .poll_committee(committee, |reply| {
                ControlMessage::ValidateShortAttack(ShortAttackRequest {
                    round,
                    primary: primary.clone(),
                    secondary: secondary.clone(),
                    predecessor: predecessor.clone(),
                    primary_group,
                    reply,
                })
            })
            .await;
        self.phase = RoundPhase::VotesCollected;

        let (primary_voters, secondary_voters): (Vec<ValidatorHandle>, Vec<ValidatorHandle>) =
            committee
                .iter()
                .cloned()
                .partition(|v| v.state.group() == primary_group);
        let primary_verdict =
            verdict_for(&proposer.state, &primary_voters, &collected.received, Branch::Primary);
        let secondary_verdict = verdict_for(
            &proposer.state,
            &secondary_voters,
            &collected.received,
            Branch::Secondary,
        );
        let primary_accepted = primary_verdict.accepted();
        let secondary_accepted = secondary_verdict.accepted();

        if primary_accepted {
            let recipients = self.ctx.group_members(primary_group);
            self.commit(&primary, &proposer.state, &recipients).await;
        }
        if secondary_accepted {
            let recipients = self.ctx.group_members(primary_group.other());
            self.commit(&secondary, &proposer.state, &recipients).await;
        }

        self.policy.apply_vote(&primary_verdict, penalties);
        self.policy.apply_vote(&secondary_verdict, penalties);

        let forked = primary_accepted && secondary_accepted;
        if forked {
            self.fork.open(proposer.address());
            warn!(round, proposer = %proposer.address().short(), "both branches accepted, network forked");
        } else {
            info!(round, primary_accepted, secondary_accepted, "dual proposal did not fork");
        }
        self.phase = RoundPhase::Settled;

        Ok(RoundOutcome::Split {
            proposer: proposer.address(),
            primary_accepted,
            secondary_accepted,
            forked,
        })
    }

    /// Parent block for the proposal and, under the balance attack, the vote
    /// malicious committee members will cast
    fn choose_parent(&self, proposer: &ValidatorHandle) -> (Block, Option<bool>) {
        let (own_tip, own_len) = {
            let ledger = proposer.state.ledger();
            (ledger.chain.tip().clone(), ledger.chain.len())
        };
        if self.ctx.config().attack != AttackMode::Balance {
            return (own_tip, None);
        }
        let Some(target) = BalanceTarget::find(&self.ctx.validators()) else {
            return (own_tip, None);
        };

        if proposer.state.is_malicious() {
            debug!(
                shorter_len = target.shorter_len,
                "malicious proposer extends the shorter fork"
            );
            let vote = target.scripted_vote(target.shorter_len);
            (target.shorter_tip, Some(vote))
        } else {
            let vote = target.scripted_vote(own_len);
            (own_tip, Some(vote))
        }
    }

    fn skip_empty(&mut self, proposer: &ValidatorHandle) -> RoundOutcome {
        info!(
            round = self.round,
            proposer = %proposer.address().short(),
            "{}",
            ConsensusError::InsufficientMempool
        );
        self.phase = RoundPhase::Settled;
        RoundOutcome::Skipped(SkipReason::EmptyMempool)
    }

    /// Send a vote request to every committee member and gather the replies
    async fn poll_committee<F>(&self, committee: &[ValidatorHandle], request: F) -> Replies<VoteMessage>
    where
        F: Fn(mpsc::Sender<VoteMessage>) -> ControlMessage,
    {
        let (reply_tx, reply_rx) = mpsc::channel(committee.len().max(1));
        let mut expected = 0;
        for member in committee {
            match member.send_control(request(reply_tx.clone())) {
                Ok(()) => expected += 1,
                Err(e) => warn!(round = self.round, "vote request not sent: {}", e),
            }
        }
        drop(reply_tx);

        let mut collected = collect_votes(
            reply_rx,
            self.round,
            expected,
            self.ctx.config().vote_timeout(),
            &self.cancel,
        )
        .await;
        collected.missing += committee.len() - expected;
        if let Err(e) = collected.complete() {
            warn!(round = self.round, "counting abstentions: {}", e);
        }
        collected
    }

    /// Deliver an accepted block, then settle its transactions
    async fn commit(&self, block: &Block, proposer: &ValidatorState, recipients: &[ValidatorHandle]) {
        let mut acks = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let (ack, rx) = oneshot::channel();
            let message = ControlMessage::VerifiedBlock {
                block: block.clone(),
                ack,
            };
            match recipient.send_control(message) {
                Ok(()) => acks.push(rx),
                Err(e) => warn!("verified block not sent: {}", e),
            }
        }
        let replies = await_acks(acks, self.ctx.config().vote_timeout(), &self.cancel).await;
        if let Err(e) = replies.complete() {
            warn!(block = %block.hash.short(), "delivery incomplete: {}", e);
        }
        let extended = replies.received.iter().filter(|grew| **grew).count();
        debug!(
            block = %block.hash.short(),
            recipients = recipients.len(),
            extended,
            "verified block delivered"
        );

        for tx in &block.transactions {
            if self.ctx.users().settle(tx) {
                proposer.credit_stake(tx.reward);
            }
        }
        proposer.record_block_added();
    }

    fn finish_round(&mut self, outcome: &RoundOutcome) {
        self.emit(SimulationEvent::RoundCompleted {
            round: self.round,
            outcome: outcome.clone(),
        });
        if self.event_sender.is_some() {
            let snapshot = self.ctx.snapshot(self.round, self.fork.is_forked());
            self.emit(SimulationEvent::Snapshot(Box::new(snapshot)));
        }
        self.phase = RoundPhase::Idle;
    }

    fn emit(&self, event: SimulationEvent) {
        if let Some(sender) = &self.event_sender {
            if sender.send(event).is_err() {
                debug!(round = self.round, "event receiver dropped");
            }
        }
    }
}

/// Match replies for `branch` against the members entitled to judge it
fn verdict_for<'a>(
    proposer: &'a ValidatorState,
    electorate: &'a [ValidatorHandle],
    votes: &[VoteMessage],
    branch: Branch,
) -> VoteVerdict<'a> {
    let ballots = votes
        .iter()
        .filter(|vote| vote.branch == branch)
        .filter_map(|vote| {
            electorate
                .iter()
                .find(|member| member.address() == vote.voter)
                .map(|member| (member.state.as_ref(), vote.valid))
        })
        .collect();
    VoteVerdict {
        proposer,
        electorate: electorate.len(),
        ballots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    fn driver(config: SimulationConfig) -> RoundDriver {
        let ctx = SimulationContext::new(config).unwrap();
        RoundDriver::new(ctx, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_no_validators_skips() {
        let mut driver = driver(SimulationConfig::default().with_seed(1));
        let outcome = driver.next_slot().await.unwrap();
        assert_eq!(outcome, RoundOutcome::Skipped(SkipReason::NoValidators));
        assert_eq!(driver.round(), 1);
        assert_eq!(driver.phase(), RoundPhase::Idle);
    }

    #[tokio::test]
    async fn test_empty_mempool_skips_without_penalty() {
        let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::None).with_seed(3);
        let mut driver = driver(config);
        for _ in 0..3 {
            driver.context().join_validator(100.0, false).unwrap();
        }

        let outcome = driver.next_slot().await.unwrap();
        assert_eq!(outcome, RoundOutcome::Skipped(SkipReason::EmptyMempool));
        for v in driver.context().validators() {
            assert_eq!(v.state.stake(), 100.0);
        }
    }

    #[tokio::test]
    async fn test_dropped_event_receiver_does_not_stop_rounds() {
        let mut driver = driver(SimulationConfig::default().with_seed(1));
        let (sender, receiver) = mpsc::unbounded_channel();
        driver.set_event_sender(sender);
        drop(receiver);

        for round in 1..=3 {
            let outcome = driver.next_slot().await.unwrap();
            assert_eq!(outcome, RoundOutcome::Skipped(SkipReason::NoValidators));
            assert_eq!(driver.round(), round);
        }
    }

    #[tokio::test]
    async fn test_committee_bounded_and_contains_proposer() {
        let config = SimulationConfig::new(ConsensusVariant::Pos, AttackMode::None)
            .with_seed(11)
            .with_committee_size(3);
        let mut driver = driver(config);
        for stake in [10.0, 20.0, 30.0, 40.0, 50.0] {
            driver.context().join_validator(stake, false).unwrap();
        }

        for _ in 0..50 {
            let plan = driver.plan_round().await.unwrap();
            assert!(plan.committee.len() <= 3);
            assert!(plan
                .committee
                .iter()
                .any(|m| m.address() == plan.proposer.address()));
        }
    }
}
