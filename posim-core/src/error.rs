//! Error types for the core crate

use thiserror::Error;

/// Reason a block fails successor validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockFault {
    /// `block.index != predecessor.index + 1`
    IndexGap { expected: u64, actual: u64 },
    /// `block.prev_hash != predecessor.hash`
    PrevHashMismatch,
    /// Recomputed hash differs from the stored one
    HashMismatch,
}

impl std::fmt::Display for BlockFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockFault::IndexGap { expected, actual } => {
                write!(f, "index gap: expected {}, got {}", expected, actual)
            }
            BlockFault::PrevHashMismatch => write!(f, "predecessor hash mismatch"),
            BlockFault::HashMismatch => write!(f, "recomputed hash mismatch"),
        }
    }
}

/// Core ledger errors
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(BlockFault),

    #[error("Chain has no root block")]
    EmptyChain,

    #[error("Bincode error: {0}")]
    Bincode(String),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
