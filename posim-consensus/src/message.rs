//! Messages exchanged between the round driver and validator workers

use crate::validator::{ForkGroup, LocalLedger};
use posim_core::{Address, Block};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// Control messages delivered to a validator's control mailbox
#[derive(Debug)]
pub enum ControlMessage {
    /// Judge a single proposed block
    Validate(ValidateRequest),
    /// Judge one of two conflicting blocks, chosen by the recipient's group
    ValidateShortAttack(ShortAttackRequest),
    /// Apply a block the committee accepted
    VerifiedBlock {
        block: Block,
        ack: oneshot::Sender<bool>,
    },
    /// Replace the local ledger with the canonical one
    ConsensusResync {
        ledger: Box<LocalLedger>,
        ack: oneshot::Sender<()>,
    },
    /// Rank candidates for delegate election
    DelegateVote {
        request: DelegateVoteRequest,
        reply: oneshot::Sender<DelegateBallot>,
    },
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Validate(_) => "validate",
            ControlMessage::ValidateShortAttack(_) => "validate_short_attack",
            ControlMessage::VerifiedBlock { .. } => "verified_block",
            ControlMessage::ConsensusResync { .. } => "consensus_resync",
            ControlMessage::DelegateVote { .. } => "delegate_vote",
        }
    }
}

/// Request to vote on one block
#[derive(Debug)]
pub struct ValidateRequest {
    pub round: u64,
    pub block: Block,
    /// Block the proposal claims to extend
    pub predecessor: Block,
    /// Vote a malicious validator casts regardless of structure (balance attack)
    pub scripted_vote: Option<bool>,
    pub reply: mpsc::Sender<VoteMessage>,
}

/// Request to vote during a dual-block round
#[derive(Debug)]
pub struct ShortAttackRequest {
    pub round: u64,
    pub primary: Block,
    pub secondary: Block,
    pub predecessor: Block,
    /// Group that judges the primary block; the other group judges the secondary
    pub primary_group: ForkGroup,
    pub reply: mpsc::Sender<VoteMessage>,
}

/// Which of two conflicting blocks a vote concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    Primary,
    Secondary,
}

/// A single vote sent back on the fan-in channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMessage {
    pub round: u64,
    pub voter: Address,
    pub branch: Branch,
    pub valid: bool,
}

/// Candidate entry handed to voters in a delegate election
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub address: Address,
    pub reputation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateVoteRequest {
    pub delegate_size: usize,
    /// Candidates in roster order
    pub candidates: Vec<Candidate>,
}

/// Ranked nominations from one voter, most preferred first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateBallot {
    pub voter: Address,
    pub nominees: Vec<Address>,
}
