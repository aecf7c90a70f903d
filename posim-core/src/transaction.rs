//! Transaction data structures and operations

use crate::{Address, Amount, CoreError, CoreResult, Keypair, PublicKey, TransactionId};
use serde::{Deserialize, Serialize};

/// A signed transfer between two users
///
/// Immutable once signed. The proposer's reward is paid by the sender on top
/// of `amount`, so settlement debits `amount + reward`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode)]
pub struct Transaction {
    /// Unique, monotonically assigned id
    pub id: TransactionId,
    /// Sending user
    pub sender: Address,
    /// Receiving user
    pub receiver: Address,
    /// Value transferred to the receiver
    pub amount: Amount,
    /// Value credited to the proposer's stake
    pub reward: Amount,
    /// Sender's signature over the signing payload
    pub signature: Vec<u8>,
}

impl Transaction {
    /// Create and sign a transaction
    pub fn new_signed(
        id: TransactionId,
        sender: Address,
        receiver: Address,
        amount: Amount,
        reward: Amount,
        keypair: &Keypair,
    ) -> CoreResult<Self> {
        let mut tx = Self {
            id,
            sender,
            receiver,
            amount,
            reward,
            signature: Vec::new(),
        };
        tx.signature = keypair.sign(&tx.encode_for_signing()?);
        Ok(tx)
    }

    /// Encode the canonical payload covered by the signature
    pub fn encode_for_signing(&self) -> CoreResult<Vec<u8>> {
        let payload = TransactionForSigning {
            id: self.id,
            sender: self.sender,
            receiver: self.receiver,
            amount: self.amount,
            reward: self.reward,
        };

        bincode::encode_to_vec(&payload, bincode::config::standard())
            .map_err(|e| CoreError::Bincode(e.to_string()))
    }

    /// Verify the signature against the sender's public key
    pub fn verify_signature(&self, sender_key: &PublicKey) -> CoreResult<()> {
        if self.signature.is_empty() {
            return Err(CoreError::InvalidSignature);
        }
        sender_key.verify(&self.encode_for_signing()?, &self.signature)
    }

    /// Total debited from the sender at settlement
    pub fn total_debit(&self) -> Amount {
        self.amount + self.reward
    }

    /// Summary of this transaction that enters the block hash
    pub(crate) fn digest(&self) -> TransactionDigest {
        TransactionDigest {
            id: self.id,
            sender: self.sender,
            receiver: self.receiver,
            signature: self.signature.clone(),
            reward: self.reward,
        }
    }
}

/// Helper struct for encoding transaction data for signing
#[derive(bincode::Encode)]
struct TransactionForSigning {
    id: TransactionId,
    sender: Address,
    receiver: Address,
    amount: Amount,
    reward: Amount,
}

/// Per-transaction summary hashed into a block (id, parties, signature, reward)
#[derive(bincode::Encode)]
pub(crate) struct TransactionDigest {
    id: TransactionId,
    sender: Address,
    receiver: Address,
    signature: Vec<u8>,
    reward: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed(id: TransactionId, keypair: &Keypair) -> Transaction {
        let sender = Address::new([1u8; 20]);
        let receiver = Address::new([2u8; 20]);
        Transaction::new_signed(id, sender, receiver, 10.0, 0.5, keypair).unwrap()
    }

    #[test]
    fn test_transaction_creation() {
        let keypair = Keypair::generate();
        let tx = signed(1, &keypair);

        assert_eq!(tx.id, 1);
        assert_eq!(tx.total_debit(), 10.5);
        assert_eq!(tx.signature.len(), 64);
        assert!(tx.verify_signature(&keypair.public()).is_ok());
    }

    #[test]
    fn test_tampered_amount_fails_verification() {
        let keypair = Keypair::generate();
        let mut tx = signed(1, &keypair);
        tx.amount = 1_000.0;

        assert!(tx.verify_signature(&keypair.public()).is_err());
    }

    #[test]
    fn test_unsigned_transaction_fails_verification() {
        let keypair = Keypair::generate();
        let mut tx = signed(1, &keypair);
        tx.signature.clear();

        assert!(matches!(
            tx.verify_signature(&keypair.public()),
            Err(CoreError::InvalidSignature)
        ));
    }
}
