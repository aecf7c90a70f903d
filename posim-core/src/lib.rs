//! Ledger primitives for the proof-of-stake simulator
//!
//! This crate provides the immutable records every participant shares:
//! - Basic types (Hash, Address, Timestamp, amounts)
//! - Signed transactions and their verification
//! - Blocks, the block hash rule and successor validation
//! - Append-only local chains with index-based predecessor lookup

pub mod block;
pub mod chain;
pub mod crypto;
pub mod error;
pub mod transaction;
pub mod types;

// Re-export commonly used types
pub use block::*;
pub use chain::*;
pub use crypto::*;
pub use error::*;
pub use transaction::*;
pub use types::*;
