//! Attack bookkeeping: group assignment, fork state and balance steering

use crate::config::AttackMode;
use crate::validator::{ForkGroup, ValidatorHandle};
use posim_core::{Address, Block};

/// Assigns joining validators to groups, alternating within the honest and
/// the malicious class so both groups get a share of each
#[derive(Debug, Default)]
pub struct GroupSplit {
    honest: usize,
    malicious: usize,
}

impl GroupSplit {
    pub fn assign(&mut self, attack: AttackMode, malicious: bool) -> ForkGroup {
        if attack == AttackMode::None {
            return ForkGroup::A;
        }
        let counter = if malicious {
            &mut self.malicious
        } else {
            &mut self.honest
        };
        let group = if *counter % 2 == 0 {
            ForkGroup::A
        } else {
            ForkGroup::B
        };
        *counter += 1;
        group
    }
}

/// Whether a dual-block round has split the network and who caused it
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ForkState {
    proposer: Option<Address>,
}

impl ForkState {
    pub fn is_forked(&self) -> bool {
        self.proposer.is_some()
    }

    pub fn open(&mut self, proposer: Address) {
        self.proposer = Some(proposer);
    }

    /// Clear the fork, returning the proposer that caused it
    pub fn close(&mut self) -> Option<Address> {
        self.proposer.take()
    }

    pub fn proposer(&self) -> Option<Address> {
        self.proposer
    }
}

/// Where a malicious proposer builds during the balance attack
#[derive(Debug, Clone)]
pub struct BalanceTarget {
    /// Length of the shortest chain in the roster
    pub shorter_len: usize,
    /// Tip of the first validator holding a chain of that length
    pub shorter_tip: Block,
}

impl BalanceTarget {
    pub fn find(roster: &[ValidatorHandle]) -> Option<Self> {
        let mut target: Option<Self> = None;
        for handle in roster {
            let ledger = handle.state.ledger();
            let len = ledger.chain.len();
            if target.as_ref().map_or(true, |t| len < t.shorter_len) {
                target = Some(Self {
                    shorter_len: len,
                    shorter_tip: ledger.chain.tip().clone(),
                });
            }
        }
        target
    }

    /// Scripted vote of malicious validators: yes iff the block extends the shorter fork
    pub fn scripted_vote(&self, predecessor_chain_len: usize) -> bool {
        predecessor_chain_len == self.shorter_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_alternate_per_class() {
        let mut split = GroupSplit::default();
        let attack = AttackMode::NetworkPartition;
        let groups: Vec<ForkGroup> = [true, false, true, false, false, true]
            .iter()
            .map(|m| split.assign(attack, *m))
            .collect();
        assert_eq!(
            groups,
            vec![
                ForkGroup::A,
                ForkGroup::A,
                ForkGroup::B,
                ForkGroup::B,
                ForkGroup::A,
                ForkGroup::A
            ]
        );
    }

    #[test]
    fn test_no_attack_single_group() {
        let mut split = GroupSplit::default();
        assert_eq!(split.assign(AttackMode::None, true), ForkGroup::A);
        assert_eq!(split.assign(AttackMode::None, true), ForkGroup::A);
    }

    #[test]
    fn test_fork_state() {
        let mut fork = ForkState::default();
        assert!(!fork.is_forked());
        fork.open(Address::new([7; 20]));
        assert!(fork.is_forked());
        assert_eq!(fork.close(), Some(Address::new([7; 20])));
        assert!(!fork.is_forked());
        assert_eq!(fork.close(), None);
    }
}
