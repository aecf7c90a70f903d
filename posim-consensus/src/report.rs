//! Observable simulation state and events

use crate::fork::ResolutionReport;
use crate::traits::RoundOutcome;
use crate::validator::ForkGroup;
use posim_core::{Address, Amount, Block, Hash};
use serde::{Deserialize, Serialize};

/// Per-validator view exported after each round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorReport {
    pub address: Address,
    pub malicious: bool,
    pub group: ForkGroup,
    pub chain_len: usize,
    pub tip: Hash,
    pub mempool_len: usize,
    pub stake: Amount,
    pub reputation: f64,
    pub committee_count: u64,
    pub proposer_count: u64,
    pub blocks_added: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReport {
    pub name: String,
    pub address: Address,
    pub balance: Amount,
}

/// Full state after a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    pub round: u64,
    pub forked: bool,
    pub certified_chain: Vec<Block>,
    pub validators: Vec<ValidatorReport>,
    pub users: Vec<UserReport>,
}

impl SimulationSnapshot {
    /// Summary figures over the certified chain
    pub fn evaluate(&self, elapsed_secs: f64) -> Evaluation {
        Evaluation::from_chain(self.round, &self.certified_chain, elapsed_secs)
    }
}

/// Periodic evaluation of what the certified chain contains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub round: u64,
    /// Blocks beyond the root
    pub total_blocks: usize,
    pub malicious_blocks: usize,
    pub transactions: usize,
    pub elapsed_secs: f64,
}

impl Evaluation {
    pub fn from_chain(round: u64, chain: &[Block], elapsed_secs: f64) -> Self {
        let body = chain.iter().filter(|b| !b.is_genesis());
        let (mut total_blocks, mut malicious_blocks, mut transactions) = (0, 0, 0);
        for block in body {
            total_blocks += 1;
            if block.malicious {
                malicious_blocks += 1;
            }
            transactions += block.transactions.len();
        }
        Self {
            round,
            total_blocks,
            malicious_blocks,
            transactions,
            elapsed_secs,
        }
    }

    /// Share of certified blocks proposed by malicious validators
    pub fn malicious_share(&self) -> f64 {
        if self.total_blocks == 0 {
            0.0
        } else {
            self.malicious_blocks as f64 / self.total_blocks as f64
        }
    }
}

/// Events emitted by the round driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SimulationEvent {
    RoundCompleted { round: u64, outcome: RoundOutcome },
    ForkResolved { round: u64, report: ResolutionReport },
    DelegatesElected { round: u64, delegates: Vec<Address> },
    Snapshot(Box<SimulationSnapshot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_counts_body_only() {
        let genesis = Block::genesis(1).unwrap();
        let honest = Block::successor(&genesis, 2, vec![], Address::zero(), false).unwrap();
        let evil = Block::successor(&honest, 3, vec![], Address::zero(), true).unwrap();
        let eval = Evaluation::from_chain(4, &[genesis, honest, evil], 1.5);

        assert_eq!(eval.total_blocks, 2);
        assert_eq!(eval.malicious_blocks, 1);
        assert_eq!(eval.transactions, 0);
        assert_eq!(eval.malicious_share(), 0.5);
    }
}
