//! Block data structures and operations

use crate::transaction::TransactionDigest;
use crate::{
    Address, BlockFault, BlockIndex, CoreError, CoreResult, Hash, Timestamp, Transaction,
    TransactionId,
};
use serde::{Deserialize, Serialize};

/// A block in some validator's local chain
///
/// Never mutated after creation. `hash` commits to index, timestamp,
/// predecessor hash and a per-transaction summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Height within the chain it extends
    pub index: BlockIndex,
    /// Creation time in milliseconds
    pub timestamp: Timestamp,
    /// Ordered transactions
    pub transactions: Vec<Transaction>,
    /// Content hash
    pub hash: Hash,
    /// Hash of the predecessor block
    pub prev_hash: Hash,
    /// Address of the proposing validator
    pub proposer: Address,
    /// Whether the proposer was malicious
    pub malicious: bool,
}

/// Helper struct for encoding the hashed content of a block
#[derive(bincode::Encode)]
struct BlockHashInput {
    index: BlockIndex,
    timestamp: Timestamp,
    prev_hash: Hash,
    transactions: Vec<TransactionDigest>,
}

impl Block {
    /// Create genesis block
    pub fn genesis(timestamp: Timestamp) -> CoreResult<Self> {
        Self::assemble(0, timestamp, Hash::zero(), Vec::new(), Address::zero(), false)
    }

    /// Create the root of a competing fork (a second genesis with its own hash)
    pub fn fork_genesis(timestamp: Timestamp) -> CoreResult<Self> {
        Self::assemble(0, timestamp, Hash::zero(), Vec::new(), Address::zero(), true)
    }

    /// Create a block extending `predecessor`
    pub fn successor(
        predecessor: &Block,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
        proposer: Address,
        malicious: bool,
    ) -> CoreResult<Self> {
        Self::assemble(
            predecessor.index + 1,
            timestamp,
            predecessor.hash,
            transactions,
            proposer,
            malicious,
        )
    }

    fn assemble(
        index: BlockIndex,
        timestamp: Timestamp,
        prev_hash: Hash,
        transactions: Vec<Transaction>,
        proposer: Address,
        malicious: bool,
    ) -> CoreResult<Self> {
        let hash = Self::calculate_hash(index, timestamp, &prev_hash, &transactions)?;
        Ok(Self {
            index,
            timestamp,
            transactions,
            hash,
            prev_hash,
            proposer,
            malicious,
        })
    }

    /// H(index, timestamp, prev_hash, transactions)
    pub fn calculate_hash(
        index: BlockIndex,
        timestamp: Timestamp,
        prev_hash: &Hash,
        transactions: &[Transaction],
    ) -> CoreResult<Hash> {
        let input = BlockHashInput {
            index,
            timestamp,
            prev_hash: *prev_hash,
            transactions: transactions.iter().map(Transaction::digest).collect(),
        };
        let encoded = bincode::encode_to_vec(&input, bincode::config::standard())
            .map_err(|e| CoreError::Bincode(e.to_string()))?;
        Ok(Hash::keccak(&encoded))
    }

    /// Recompute the hash of this block's content
    pub fn compute_hash(&self) -> CoreResult<Hash> {
        Self::calculate_hash(self.index, self.timestamp, &self.prev_hash, &self.transactions)
    }

    /// Check this block against its predecessor: index, link, then content hash
    pub fn verify_successor(&self, predecessor: &Block) -> CoreResult<()> {
        let expected = predecessor.index + 1;
        if self.index != expected {
            return Err(CoreError::InvalidBlock(BlockFault::IndexGap {
                expected,
                actual: self.index,
            }));
        }

        if self.prev_hash != predecessor.hash {
            return Err(CoreError::InvalidBlock(BlockFault::PrevHashMismatch));
        }

        if self.compute_hash()? != self.hash {
            return Err(CoreError::InvalidBlock(BlockFault::HashMismatch));
        }

        Ok(())
    }

    /// Boolean form of [`Block::verify_successor`]
    pub fn is_valid_successor(&self, predecessor: &Block) -> bool {
        self.verify_successor(predecessor).is_ok()
    }

    /// Ids of the contained transactions
    pub fn transaction_ids(&self) -> Vec<TransactionId> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }

    /// Check if block is a genesis block
    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.prev_hash == Hash::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Keypair;

    fn sample_tx(id: TransactionId) -> Transaction {
        let keypair = Keypair::from_seed(&[9u8; 32]);
        Transaction::new_signed(
            id,
            Address::new([1u8; 20]),
            Address::new([2u8; 20]),
            5.0,
            1.0,
            &keypair,
        )
        .unwrap()
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis(1_000).unwrap();
        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.prev_hash, Hash::zero());
        assert!(genesis.transactions.is_empty());
        assert!(genesis.is_genesis());
        assert!(!genesis.malicious);
    }

    #[test]
    fn test_fork_genesis_differs() {
        let genesis = Block::genesis(1_000).unwrap();
        let fork = Block::fork_genesis(1_001).unwrap();
        assert!(fork.is_genesis());
        assert!(fork.malicious);
        assert_ne!(genesis.hash, fork.hash);
    }

    #[test]
    fn test_successor_links_to_predecessor() {
        let genesis = Block::genesis(1_000).unwrap();
        let block =
            Block::successor(&genesis, 2_000, vec![sample_tx(1)], Address::new([5u8; 20]), false)
                .unwrap();

        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, genesis.hash);
        assert_eq!(block.hash, block.compute_hash().unwrap());
        assert!(block.verify_successor(&genesis).is_ok());
        assert_eq!(block.transaction_ids(), vec![1]);
    }

    #[test]
    fn test_index_checked_first() {
        let genesis = Block::genesis(1_000).unwrap();
        let mut block = Block::successor(&genesis, 2_000, vec![], Address::zero(), false).unwrap();
        block.index = 5;
        block.prev_hash = Hash::new([4u8; 32]);

        match block.verify_successor(&genesis) {
            Err(CoreError::InvalidBlock(BlockFault::IndexGap { expected, actual })) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 5);
            }
            other => panic!("expected index gap, got {:?}", other),
        }
    }

    #[test]
    fn test_prev_hash_mismatch() {
        let genesis = Block::genesis(1_000).unwrap();
        let other = Block::genesis(1_500).unwrap();
        let block = Block::successor(&other, 2_000, vec![], Address::zero(), false).unwrap();

        assert!(matches!(
            block.verify_successor(&genesis),
            Err(CoreError::InvalidBlock(BlockFault::PrevHashMismatch))
        ));
    }

    #[test]
    fn test_tampered_content_detected() {
        let genesis = Block::genesis(1_000).unwrap();
        let mut block =
            Block::successor(&genesis, 2_000, vec![sample_tx(1)], Address::zero(), false).unwrap();
        block.transactions.push(sample_tx(2));

        assert!(matches!(
            block.verify_successor(&genesis),
            Err(CoreError::InvalidBlock(BlockFault::HashMismatch))
        ));
        assert!(!block.is_valid_successor(&genesis));
    }

    #[test]
    fn test_amount_not_hashed_but_signature_is() {
        let genesis = Block::genesis(1_000).unwrap();
        let block =
            Block::successor(&genesis, 2_000, vec![sample_tx(1)], Address::zero(), false).unwrap();

        let mut resigned = block.clone();
        resigned.transactions[0].signature[0] ^= 0xff;
        assert_ne!(resigned.compute_hash().unwrap(), block.hash);
    }
}
