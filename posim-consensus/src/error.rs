//! Consensus error types

use posim_core::{CoreError, TransactionId};
use thiserror::Error;

/// Consensus error type
///
/// The first group are soft failures the round driver recovers from
/// locally; the rest abort the operation that raised them.
#[derive(Error, Debug, Clone)]
pub enum ConsensusError {
    /// Proposer has nothing to build a block from
    #[error("No transactions to validate in proposer mempool")]
    InsufficientMempool,

    /// Transaction rejected at mempool entry
    #[error("Invalid transaction {id}: {reason}")]
    InvalidTransaction { id: TransactionId, reason: String },

    /// Block failed structural validation
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Some workers did not reply before the deadline
    #[error("Timed out waiting for {missing} replies")]
    VoteTimeout { missing: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// User name already taken by a live user
    #[error("User name already taken: {0}")]
    DuplicateUserName(String),

    /// Address does not belong to any live participant
    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    /// A worker mailbox was closed
    #[error("Mailbox closed: {0}")]
    MailboxClosed(String),

    /// Ledger primitive error
    #[error("Core error: {0}")]
    Core(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConsensusError {
    /// Soft failures skip the round without penalising anyone
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            ConsensusError::InsufficientMempool
                | ConsensusError::InvalidTransaction { .. }
                | ConsensusError::InvalidBlock(_)
                | ConsensusError::VoteTimeout { .. }
        )
    }
}

impl From<CoreError> for ConsensusError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidBlock(fault) => ConsensusError::InvalidBlock(fault.to_string()),
            other => ConsensusError::Core(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConsensusError {
    fn from(err: serde_json::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ConsensusError {
    fn from(err: toml::de::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for ConsensusError {
    fn from(err: toml::ser::Error) -> Self {
        ConsensusError::Serialization(err.to_string())
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
