//! Users: named transaction senders with a balance and a signing key

use crate::{ConsensusError, ConsensusResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use posim_core::{Address, Amount, Keypair, PublicKey, Transaction, TransactionId};
use std::sync::Arc;
use tracing::warn;

/// A user of the simulated network
#[derive(Debug)]
pub struct User {
    name: String,
    address: Address,
    keypair: Keypair,
    balance: Mutex<Amount>,
}

impl User {
    pub fn new(name: impl Into<String>, address: Address, balance: Amount) -> Self {
        Self {
            name: name.into(),
            address,
            keypair: Keypair::generate(),
            balance: Mutex::new(balance),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public()
    }

    pub fn balance(&self) -> Amount {
        *self.balance.lock()
    }

    pub fn credit(&self, amount: Amount) {
        *self.balance.lock() += amount;
    }

    /// Subtract `amount` and return the new balance
    pub fn debit(&self, amount: Amount) -> Amount {
        let mut balance = self.balance.lock();
        *balance -= amount;
        *balance
    }

    /// Sign a transfer from this user
    pub fn sign_transfer(
        &self,
        id: TransactionId,
        receiver: Address,
        amount: Amount,
        reward: Amount,
    ) -> ConsensusResult<Transaction> {
        Ok(Transaction::new_signed(
            id,
            self.address,
            receiver,
            amount,
            reward,
            &self.keypair,
        )?)
    }
}

/// Live users, addressable by address and by unique name
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_address: DashMap<Address, Arc<User>>,
    by_name: DashMap<String, Address>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user; names are unique among live users
    pub fn register(&self, user: Arc<User>) -> ConsensusResult<()> {
        match self.by_name.entry(user.name().to_string()) {
            Entry::Occupied(_) => Err(ConsensusError::DuplicateUserName(user.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user.address());
                self.by_address.insert(user.address(), user);
                Ok(())
            }
        }
    }

    pub fn get(&self, address: &Address) -> Option<Arc<User>> {
        self.by_address.get(address).map(|u| Arc::clone(u.value()))
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<User>> {
        let address = *self.by_name.get(name)?;
        self.get(&address)
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    /// All users sorted by name
    pub fn all(&self) -> Vec<Arc<User>> {
        let mut users: Vec<Arc<User>> =
            self.by_address.iter().map(|u| Arc::clone(u.value())).collect();
        users.sort_by(|a, b| a.name().cmp(b.name()));
        users
    }

    /// Mempool admission checks that need the user set: both parties resolve,
    /// the signature verifies and the sender can cover amount plus reward
    pub fn check_transaction(&self, tx: &Transaction) -> ConsensusResult<()> {
        let reject = |reason: &str| ConsensusError::InvalidTransaction {
            id: tx.id,
            reason: reason.to_string(),
        };

        let sender = self.get(&tx.sender).ok_or_else(|| reject("unknown sender"))?;
        if self.get(&tx.receiver).is_none() {
            return Err(reject("unknown receiver"));
        }

        tx.verify_signature(&sender.public_key())
            .map_err(|_| reject("signature does not verify"))?;

        if sender.balance() < tx.total_debit() {
            return Err(reject("sender balance below amount plus reward"));
        }

        Ok(())
    }

    /// Move funds for a transaction included in an accepted block
    ///
    /// The balance was checked at mempool admission, not here. Two transfers
    /// admitted against the same balance both settle, so a sender can end
    /// up overdrawn.
    pub fn settle(&self, tx: &Transaction) -> bool {
        let (Some(sender), Some(receiver)) = (self.get(&tx.sender), self.get(&tx.receiver)) else {
            warn!(id = tx.id, "settling transaction with a departed party, skipping");
            return false;
        };
        let remaining = sender.debit(tx.total_debit());
        if remaining < 0.0 {
            warn!(id = tx.id, sender = sender.name(), remaining, "sender overdrawn by settlement");
        }
        receiver.credit(tx.amount);
        true
    }
}
