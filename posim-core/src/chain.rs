//! Append-only local chain view
//!
//! Every validator owns its own copy. Blocks never point at each other;
//! the predecessor of a block is found by index.

use crate::{Block, BlockIndex, CoreError, CoreResult, Hash};
use serde::{Deserialize, Serialize};

/// A validator's local view of the chain, rooted at a genesis block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChain {
    blocks: Vec<Block>,
}

impl LocalChain {
    /// Start a chain from its root block
    pub fn new(root: Block) -> Self {
        Self { blocks: vec![root] }
    }

    /// Rebuild a chain from a block sequence, checking every link
    pub fn from_blocks(blocks: Vec<Block>) -> CoreResult<Self> {
        if blocks.is_empty() {
            return Err(CoreError::EmptyChain);
        }
        for pair in blocks.windows(2) {
            pair[1].verify_successor(&pair[0])?;
        }
        Ok(Self { blocks })
    }

    /// Latest block
    pub fn tip(&self) -> &Block {
        // The root is never removed, so the chain is never empty.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Root block (genesis or fork genesis)
    pub fn root(&self) -> &Block {
        &self.blocks[0]
    }

    /// Number of blocks, root included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Block at a given index
    pub fn get(&self, index: BlockIndex) -> Option<&Block> {
        let offset = index.checked_sub(self.root().index)?;
        self.blocks.get(offset as usize)
    }

    /// Index-based predecessor lookup
    pub fn predecessor_of(&self, block: &Block) -> Option<&Block> {
        let index = block.index.checked_sub(1)?;
        self.get(index).filter(|pred| pred.hash == block.prev_hash)
    }

    /// Append `block` if it is a valid successor of the tip
    pub fn try_extend(&mut self, block: Block) -> CoreResult<()> {
        block.verify_successor(self.tip())?;
        self.blocks.push(block);
        Ok(())
    }

    /// Whether `block` would be accepted by [`LocalChain::try_extend`]
    pub fn extends_tip(&self, block: &Block) -> bool {
        block.is_valid_successor(self.tip())
    }

    /// All blocks in order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Block hashes in order
    pub fn hashes(&self) -> Vec<Hash> {
        self.blocks.iter().map(|b| b.hash).collect()
    }

    /// Re-check every link and hash
    pub fn verify(&self) -> CoreResult<()> {
        for pair in self.blocks.windows(2) {
            pair[1].verify_successor(&pair[0])?;
        }
        Ok(())
    }

    /// Consume into the underlying sequence
    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}
