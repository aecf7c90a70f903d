//! Block production from a proposer's mempool

use crate::validator::ValidatorState;
use crate::{ConsensusError, ConsensusResult};
use posim_core::{now_millis, Block};
use tracing::debug;

/// Build a block extending `predecessor` from up to `max_transactions`
/// mempool entries
pub fn generate_block_on(
    proposer: &ValidatorState,
    predecessor: &Block,
    max_transactions: usize,
) -> ConsensusResult<Block> {
    let transactions = proposer.ledger().pending(max_transactions);
    if transactions.is_empty() {
        return Err(ConsensusError::InsufficientMempool);
    }

    let block = Block::successor(
        predecessor,
        now_millis(),
        transactions,
        proposer.address(),
        proposer.is_malicious(),
    )?;
    debug!(
        proposer = %proposer.address().short(),
        index = block.index,
        hash = %block.hash.short(),
        transactions = block.transactions.len(),
        "block generated"
    );
    Ok(block)
}

/// Two conflicting blocks on `predecessor` from one mempool snapshot
///
/// The secondary block carries the same transactions in reverse order and a
/// later timestamp, so the two hashes always differ.
pub fn generate_conflicting_pair(
    proposer: &ValidatorState,
    predecessor: &Block,
    max_transactions: usize,
) -> ConsensusResult<(Block, Block)> {
    let primary = generate_block_on(proposer, predecessor, max_transactions)?;

    let mut transactions = primary.transactions.clone();
    transactions.reverse();
    let secondary = Block::successor(
        predecessor,
        primary.timestamp + 1,
        transactions,
        proposer.address(),
        proposer.is_malicious(),
    )?;
    Ok((primary, secondary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::ForkGroup;
    use posim_core::{Address, Keypair, Transaction};

    fn proposer_with(txs: u64) -> ValidatorState {
        let v = ValidatorState::new(
            Address::new([1; 20]),
            10.0,
            5.0,
            true,
            ForkGroup::A,
            Block::genesis(1).unwrap(),
        );
        let keypair = Keypair::generate();
        for id in 0..txs {
            let tx = Transaction::new_signed(
                id,
                Address::new([2; 20]),
                Address::new([3; 20]),
                1.0,
                0.1,
                &keypair,
            )
            .unwrap();
            v.ledger().admit(tx);
        }
        v
    }

    #[test]
    fn test_empty_mempool_is_soft() {
        let proposer = proposer_with(0);
        let err = generate_block_on(&proposer, &proposer.tip(), 5).unwrap_err();
        assert!(matches!(err, ConsensusError::InsufficientMempool));
        assert!(err.is_soft());
    }

    #[test]
    fn test_block_capacity() {
        let proposer = proposer_with(8);
        let block = generate_block_on(&proposer, &proposer.tip(), 5).unwrap();
        assert_eq!(block.transaction_ids(), vec![0, 1, 2, 3, 4]);
        assert!(block.malicious);
        assert!(block.verify_successor(&proposer.tip()).is_ok());
    }

    #[test]
    fn test_conflicting_pair_shares_parent() {
        let proposer = proposer_with(3);
        let tip = proposer.tip();
        let (primary, secondary) = generate_conflicting_pair(&proposer, &tip, 5).unwrap();

        assert_ne!(primary.hash, secondary.hash);
        assert!(primary.verify_successor(&tip).is_ok());
        assert!(secondary.verify_successor(&tip).is_ok());
        assert_eq!(secondary.transaction_ids(), vec![2, 1, 0]);
    }
}
