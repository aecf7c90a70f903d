//! Validator state shared between the round driver and the validator's workers

use crate::message::ControlMessage;
use crate::report::ValidatorReport;
use crate::user::UserDirectory;
use crate::{ConsensusError, ConsensusResult};
use parking_lot::{Mutex, MutexGuard, RwLock};
use posim_core::{Address, Amount, Block, LocalChain, Transaction, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// One of the two disjoint validator groups used by the attack models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ForkGroup {
    A,
    B,
}

impl ForkGroup {
    pub fn other(self) -> Self {
        match self {
            ForkGroup::A => ForkGroup::B,
            ForkGroup::B => ForkGroup::A,
        }
    }
}

/// Chain view, mempool and confirmed-id set of one validator
///
/// Guarded by a single lock because the transaction listener and the control
/// handler both touch the mempool/confirmed pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalLedger {
    pub chain: LocalChain,
    pub mempool: BTreeMap<TransactionId, Transaction>,
    pub confirmed: HashSet<TransactionId>,
}

impl LocalLedger {
    pub fn new(root: Block) -> Self {
        Self {
            chain: LocalChain::new(root),
            mempool: BTreeMap::new(),
            confirmed: HashSet::new(),
        }
    }

    /// Put a verified transaction into the mempool unless its id is already confirmed
    pub fn admit(&mut self, tx: Transaction) -> bool {
        if self.confirmed.contains(&tx.id) {
            return false;
        }
        self.mempool.insert(tx.id, tx);
        true
    }

    /// Up to `limit` transactions in mempool iteration order
    pub fn pending(&self, limit: usize) -> Vec<Transaction> {
        self.mempool.values().take(limit).cloned().collect()
    }

    /// Move transaction ids from the mempool to the confirmed set
    pub fn confirm<I: IntoIterator<Item = TransactionId>>(&mut self, ids: I) {
        for id in ids {
            self.mempool.remove(&id);
            self.confirmed.insert(id);
        }
    }

    /// Apply a block the committee accepted; returns whether the chain grew
    pub fn apply_verified(&mut self, block: Block) -> bool {
        self.confirm(block.transaction_ids());
        self.chain.try_extend(block).is_ok()
    }
}

/// Economic standing and round statistics of a validator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub stake: Amount,
    pub reputation: f64,
    pub committee_count: u64,
    pub proposer_count: u64,
    pub blocks_added: u64,
}

/// A validator as seen by everyone else
///
/// Identity fields are fixed at join. `standing` is written only by the
/// round driver's post-vote step.
#[derive(Debug)]
pub struct ValidatorState {
    address: Address,
    malicious: bool,
    group: ForkGroup,
    ledger: Mutex<LocalLedger>,
    standing: RwLock<Standing>,
}

impl ValidatorState {
    pub fn new(
        address: Address,
        stake: Amount,
        reputation: f64,
        malicious: bool,
        group: ForkGroup,
        root: Block,
    ) -> Self {
        Self {
            address,
            malicious,
            group,
            ledger: Mutex::new(LocalLedger::new(root)),
            standing: RwLock::new(Standing {
                stake,
                reputation,
                committee_count: 0,
                proposer_count: 0,
                blocks_added: 0,
            }),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_malicious(&self) -> bool {
        self.malicious
    }

    pub fn group(&self) -> ForkGroup {
        self.group
    }

    /// Lock the ledger; keep the guard short-lived and never hold it across an await
    pub fn ledger(&self) -> MutexGuard<'_, LocalLedger> {
        self.ledger.lock()
    }

    pub fn chain_len(&self) -> usize {
        self.ledger.lock().chain.len()
    }

    pub fn tip(&self) -> Block {
        self.ledger.lock().chain.tip().clone()
    }

    pub fn mempool_len(&self) -> usize {
        self.ledger.lock().mempool.len()
    }

    pub fn has_pending(&self, id: TransactionId) -> bool {
        self.ledger.lock().mempool.contains_key(&id)
    }

    /// Deep copy of the ledger, used as a resync snapshot
    pub fn ledger_snapshot(&self) -> LocalLedger {
        self.ledger.lock().clone()
    }

    /// Replace the ledger wholesale
    pub fn restore_ledger(&self, ledger: LocalLedger) {
        *self.ledger.lock() = ledger;
    }

    /// Validate a transaction and admit it to the mempool
    pub fn admit_transaction(&self, tx: Transaction, users: &UserDirectory) -> ConsensusResult<()> {
        users.check_transaction(&tx)?;

        let id = tx.id;
        if !self.ledger.lock().admit(tx) {
            return Err(crate::ConsensusError::InvalidTransaction {
                id,
                reason: "transaction was already spent".to_string(),
            });
        }
        Ok(())
    }

    /// Apply an accepted block; returns whether the local chain grew
    pub fn apply_verified(&self, block: Block) -> bool {
        let index = block.index;
        let grew = self.ledger.lock().apply_verified(block);
        if !grew {
            debug!(
                validator = %self.address.short(),
                index,
                "verified block does not extend local tip, keeping prior tip"
            );
        }
        grew
    }

    pub fn standing(&self) -> Standing {
        *self.standing.read()
    }

    pub fn stake(&self) -> Amount {
        self.standing.read().stake
    }

    pub fn reputation(&self) -> f64 {
        self.standing.read().reputation
    }

    pub fn credit_stake(&self, amount: Amount) {
        self.standing.write().stake += amount;
    }

    pub fn scale_stake(&self, factor: f64) {
        self.standing.write().stake *= factor;
    }

    /// Add `delta` to reputation, clamped to `[0, max]`
    pub fn add_reputation(&self, delta: f64, max: f64) {
        let mut standing = self.standing.write();
        standing.reputation = (standing.reputation + delta).clamp(0.0, max);
    }

    /// Multiply reputation by `factor`, clamped to `[0, max]`
    pub fn scale_reputation(&self, factor: f64, max: f64) {
        let mut standing = self.standing.write();
        standing.reputation = (standing.reputation * factor).clamp(0.0, max);
    }

    pub fn record_committee_seat(&self) {
        self.standing.write().committee_count += 1;
    }

    pub fn record_proposal(&self) {
        self.standing.write().proposer_count += 1;
    }

    pub fn record_block_added(&self) {
        self.standing.write().blocks_added += 1;
    }

    pub fn report(&self) -> ValidatorReport {
        let standing = self.standing();
        let ledger = self.ledger.lock();
        ValidatorReport {
            address: self.address,
            malicious: self.malicious,
            group: self.group,
            chain_len: ledger.chain.len(),
            tip: ledger.chain.tip().hash,
            mempool_len: ledger.mempool.len(),
            stake: standing.stake,
            reputation: standing.reputation,
            committee_count: standing.committee_count,
            proposer_count: standing.proposer_count,
            blocks_added: standing.blocks_added,
        }
    }
}

/// Driver-side handle: shared state plus the validator's inbound mailboxes
#[derive(Debug, Clone)]
pub struct ValidatorHandle {
    pub state: Arc<ValidatorState>,
    pub(crate) control: mpsc::UnboundedSender<ControlMessage>,
    pub(crate) transactions: mpsc::UnboundedSender<Transaction>,
}

impl ValidatorHandle {
    pub fn address(&self) -> Address {
        self.state.address()
    }

    /// Fire-and-forget delivery to the transaction mailbox
    pub fn deliver_transaction(&self, tx: Transaction) -> bool {
        self.transactions.send(tx).is_ok()
    }

    /// Queue a control message; fails once the worker has stopped
    pub(crate) fn send_control(&self, message: ControlMessage) -> ConsensusResult<()> {
        self.control
            .send(message)
            .map_err(|_| ConsensusError::MailboxClosed(self.address().short()))
    }
}
