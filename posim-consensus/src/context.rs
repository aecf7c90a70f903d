//! Simulation context: rosters, users and the certified chain
//!
//! One context is shared by the round driver, the validator workers and the
//! traffic tasks. It owns everything that used to be process-wide state.

use crate::attack::GroupSplit;
use crate::config::{AttackMode, SimulationConfig};
use crate::report::{SimulationSnapshot, UserReport};
use crate::user::{User, UserDirectory};
use crate::validator::{ForkGroup, ValidatorHandle, ValidatorState};
use crate::worker::spawn_validator;
use crate::{ConsensusError, ConsensusResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use posim_core::{address_from_join, now_millis, Address, Amount, Block, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Role and parameters declared by a joining participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum JoinRequest {
    User { name: String, balance: Amount },
    Validator { stake: Amount, malicious: bool },
}

/// A freshly joined participant
#[derive(Debug, Clone)]
pub enum Participant {
    User(Arc<User>),
    Validator(ValidatorHandle),
}

pub struct SimulationContext {
    config: SimulationConfig,
    genesis: Block,
    fork_genesis: Block,
    roster: RwLock<Vec<ValidatorHandle>>,
    users: Arc<UserDirectory>,
    certified: RwLock<Vec<Block>>,
    split: Mutex<GroupSplit>,
    next_transaction_id: AtomicU64,
    join_sequence: AtomicU64,
}

impl SimulationContext {
    /// Validate the configuration and create the genesis blocks
    pub fn new(config: SimulationConfig) -> ConsensusResult<Arc<Self>> {
        config.validate()?;
        let now = now_millis();
        let genesis = Block::genesis(now)?;
        // The competing root must hash differently from the real one.
        let fork_genesis = Block::fork_genesis(now + 1)?;

        info!(
            variant = %config.variant,
            attack = %config.attack,
            genesis = %genesis.hash.short(),
            "simulation context created"
        );

        Ok(Arc::new(Self {
            config,
            certified: RwLock::new(vec![genesis.clone()]),
            genesis,
            fork_genesis,
            roster: RwLock::new(Vec::new()),
            users: Arc::new(UserDirectory::new()),
            split: Mutex::new(GroupSplit::default()),
            next_transaction_id: AtomicU64::new(0),
            join_sequence: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn fork_genesis(&self) -> &Block {
        &self.fork_genesis
    }

    pub fn users(&self) -> &Arc<UserDirectory> {
        &self.users
    }

    /// Admit a participant; must be called from within a tokio runtime
    pub fn join(&self, request: JoinRequest) -> ConsensusResult<Participant> {
        match request {
            JoinRequest::User { name, balance } => {
                self.join_user(name, balance).map(Participant::User)
            }
            JoinRequest::Validator { stake, malicious } => self
                .join_validator(stake, malicious)
                .map(Participant::Validator),
        }
    }

    pub fn join_user(&self, name: impl Into<String>, balance: Amount) -> ConsensusResult<Arc<User>> {
        let name = name.into();
        if name.is_empty() {
            return Err(ConsensusError::Config("user name must not be empty".to_string()));
        }
        if !(balance.is_finite() && balance >= 0.0) {
            return Err(ConsensusError::Config(format!("invalid balance {}", balance)));
        }

        let user = Arc::new(User::new(name, self.fresh_address(), balance));
        self.users.register(Arc::clone(&user))?;
        info!(name = user.name(), address = %user.address().short(), balance, "user joined");
        Ok(user)
    }

    pub fn join_validator(&self, stake: Amount, malicious: bool) -> ConsensusResult<ValidatorHandle> {
        if !(stake.is_finite() && stake >= 0.0) {
            return Err(ConsensusError::Config(format!("invalid stake {}", stake)));
        }

        let group = self.split.lock().assign(self.config.attack, malicious);
        let root = match (self.config.attack, group) {
            (AttackMode::Balance, ForkGroup::B) => self.fork_genesis.clone(),
            _ => self.genesis.clone(),
        };

        let state = Arc::new(ValidatorState::new(
            self.fresh_address(),
            stake,
            self.config.reputation.initial,
            malicious,
            group,
            root,
        ));
        let handle = spawn_validator(state, Arc::clone(&self.users));
        self.roster.write().push(handle.clone());

        info!(
            address = %handle.address().short(),
            stake,
            malicious,
            ?group,
            "validator joined"
        );
        Ok(handle)
    }

    fn fresh_address(&self) -> Address {
        let sequence = self.join_sequence.fetch_add(1, Ordering::SeqCst);
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        address_from_join(nanos, sequence)
    }

    /// Roster snapshot in join order
    pub fn validators(&self) -> Vec<ValidatorHandle> {
        self.roster.read().clone()
    }

    pub fn validator_count(&self) -> usize {
        self.roster.read().len()
    }

    pub fn validator(&self, address: &Address) -> Option<ValidatorHandle> {
        self.roster
            .read()
            .iter()
            .find(|v| v.address() == *address)
            .cloned()
    }

    /// Validators in `group`, in join order
    pub fn group_members(&self, group: ForkGroup) -> Vec<ValidatorHandle> {
        self.roster
            .read()
            .iter()
            .filter(|v| v.state.group() == group)
            .cloned()
            .collect()
    }

    /// Sign a transfer from `sender` and broadcast it to every validator
    pub fn submit_transaction(
        &self,
        sender: &User,
        receiver: Address,
        amount: Amount,
        reward: Amount,
    ) -> ConsensusResult<Transaction> {
        for party in [sender.address(), receiver] {
            if self.users.get(&party).is_none() {
                return Err(ConsensusError::UnknownParticipant(party.to_string()));
            }
        }
        let id = self.next_transaction_id.fetch_add(1, Ordering::SeqCst);
        let tx = sender.sign_transfer(id, receiver, amount, reward)?;
        let delivered = self.broadcast_transaction(&tx);
        debug!(id, sender = sender.name(), amount, reward, delivered, "transaction submitted");
        Ok(tx)
    }

    /// Fire-and-forget delivery to every validator's transaction mailbox
    pub fn broadcast_transaction(&self, tx: &Transaction) -> usize {
        self.validators()
            .iter()
            .filter(|v| v.deliver_transaction(tx.clone()))
            .count()
    }

    /// Chain agreed at the most recent fork resolution
    pub fn certified_chain(&self) -> Vec<Block> {
        self.certified.read().clone()
    }

    pub(crate) fn set_certified(&self, chain: Vec<Block>) {
        *self.certified.write() = chain;
    }

    /// Observable state after a round
    pub fn snapshot(&self, round: u64, forked: bool) -> SimulationSnapshot {
        SimulationSnapshot {
            round,
            forked,
            certified_chain: self.certified_chain(),
            validators: self.validators().iter().map(|v| v.state.report()).collect(),
            users: self
                .users
                .all()
                .iter()
                .map(|u| UserReport {
                    name: u.name().to_string(),
                    address: u.address(),
                    balance: u.balance(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationContext")
            .field("variant", &self.config.variant)
            .field("attack", &self.config.attack)
            .field("validators", &self.validator_count())
            .field("users", &self.users.len())
            .finish()
    }
}
