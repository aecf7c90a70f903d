//! Simulation configuration

use crate::{ConsensusError, ConsensusResult};
use posim_core::Amount;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Consensus rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusVariant {
    /// Plain stake-weighted proof of stake, no penalties
    Pos,
    /// Proof of stake with multiplicative stake slashing
    Slashing,
    /// Delegated proof of stake driven by reputation
    Reputation,
}

/// Byzantine behaviour under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackMode {
    None,
    /// Short-range dual-block proposal to two validator groups
    NetworkPartition,
    /// Two persistent forks kept at near-equal length
    Balance,
}

impl FromStr for ConsensusVariant {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pos" => Ok(Self::Pos),
            "slashing" => Ok(Self::Slashing),
            "reputation" => Ok(Self::Reputation),
            other => Err(ConsensusError::Config(format!(
                "unknown consensus variant '{}', expected pos|slashing|reputation",
                other
            ))),
        }
    }
}

impl FromStr for AttackMode {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "network_partition" => Ok(Self::NetworkPartition),
            "balance" => Ok(Self::Balance),
            other => Err(ConsensusError::Config(format!(
                "unknown attack '{}', expected none|network_partition|balance",
                other
            ))),
        }
    }
}

impl fmt::Display for ConsensusVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pos => "pos",
            Self::Slashing => "slashing",
            Self::Reputation => "reputation",
        };
        f.write_str(name)
    }
}

impl fmt::Display for AttackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::NetworkPartition => "network_partition",
            Self::Balance => "balance",
        };
        f.write_str(name)
    }
}

/// Closed-open range used for random stakes, balances and traffic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: Amount,
    pub max: Amount,
}

impl AmountRange {
    pub fn new(min: Amount, max: Amount) -> Self {
        Self { min, max }
    }

    /// Draw a value uniformly from the range
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Amount {
        if self.max <= self.min {
            return self.min;
        }
        rng.random_range(self.min..self.max)
    }
}

/// Reputation bounds and adjustments
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Reputation of a freshly joined validator
    pub initial: f64,
    /// Upper bound; reputation is clamped to `[0, max]`
    pub max: f64,
    /// Additive reward for majority votes, accepted proposals and ballots
    pub reward: f64,
    /// Multiplier applied to minority voters
    pub vote_penalty: f64,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial: 5.0,
            max: 100.0,
            reward: 1.0,
            vote_penalty: 0.5,
        }
    }
}

/// Automatic transaction traffic generated by each user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Pause between two submissions of one user
    pub interval_ms: u64,
    pub amount: AmountRange,
    pub reward: AmountRange,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            amount: AmountRange::new(1.0, 101.0),
            reward: AmountRange::new(0.0, 5.0),
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Validators joined automatically by the node
    pub validator_count: usize,
    /// Users joined automatically by the node
    pub user_count: usize,
    /// How many of the auto-joined validators are malicious
    pub malicious_count: usize,
    /// Stake-weighted committee size
    pub committee_size: usize,
    /// Delegate set size (reputation variant)
    pub delegate_size: usize,
    pub variant: ConsensusVariant,
    pub attack: AttackMode,
    /// Slot duration in milliseconds
    pub slot_duration_ms: u64,
    /// Rounds between two fork resolutions
    pub fork_resolution_interval: u64,
    /// Block capacity
    pub max_block_transactions: usize,
    /// Multiplicative penalty for rejected or forking proposers
    pub slash_factor: f64,
    pub reputation: ReputationConfig,
    /// Deadline for vote and acknowledgement collection, in milliseconds
    pub vote_timeout_ms: u64,
    /// RNG seed for reproducible selection
    pub seed: Option<u64>,
    /// Range of auto-joined validator stakes
    pub stake_range: AmountRange,
    /// Range of auto-joined user balances
    pub balance_range: AmountRange,
    pub traffic: TrafficConfig,
    /// Stop after this many rounds
    pub max_rounds: Option<u64>,
    /// Rounds between two evaluation reports
    pub report_interval: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            validator_count: 10,
            user_count: 3,
            malicious_count: 4,
            committee_size: 3,
            delegate_size: 3,
            variant: ConsensusVariant::Slashing,
            attack: AttackMode::NetworkPartition,
            slot_duration_ms: 1_000,
            fork_resolution_interval: 5,
            max_block_transactions: 5,
            slash_factor: 0.2,
            reputation: ReputationConfig::default(),
            vote_timeout_ms: 5_000,
            seed: None,
            stake_range: AmountRange::new(300.0, 1_000.0),
            balance_range: AmountRange::new(10.0, 1_010.0),
            traffic: TrafficConfig::default(),
            max_rounds: None,
            report_interval: 10,
        }
    }
}

impl SimulationConfig {
    /// Create a configuration for the given rule set and attack
    pub fn new(variant: ConsensusVariant, attack: AttackMode) -> Self {
        Self {
            variant,
            attack,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML or JSON file (chosen by extension)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> ConsensusResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConsensusError::Config(format!("Failed to read config file: {}", e)))?;

        let config: SimulationConfig = if is_json(path) {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML or JSON file (chosen by extension)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> ConsensusResult<()> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            toml::to_string_pretty(self)?
        };
        fs::write(path, content)
            .map_err(|e| ConsensusError::Config(format!("Failed to write config file: {}", e)))?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConsensusResult<()> {
        if self.malicious_count > self.validator_count {
            return Err(ConsensusError::Config(format!(
                "malicious_count ({}) exceeds validator_count ({})",
                self.malicious_count, self.validator_count
            )));
        }

        if self.committee_size == 0 {
            return Err(ConsensusError::Config(
                "Committee size must be greater than 0".to_string(),
            ));
        }

        if self.variant == ConsensusVariant::Reputation && self.delegate_size == 0 {
            return Err(ConsensusError::Config(
                "Delegate size must be greater than 0".to_string(),
            ));
        }

        if self.slot_duration_ms == 0 {
            return Err(ConsensusError::Config(
                "Slot duration must be greater than 0".to_string(),
            ));
        }

        if self.fork_resolution_interval == 0 {
            return Err(ConsensusError::Config(
                "Fork resolution interval must be greater than 0".to_string(),
            ));
        }

        if self.max_block_transactions == 0 {
            return Err(ConsensusError::Config(
                "Blocks must hold at least one transaction".to_string(),
            ));
        }

        if !(self.slash_factor > 0.0 && self.slash_factor <= 1.0) {
            return Err(ConsensusError::Config(format!(
                "slash_factor must be in (0, 1], got {}",
                self.slash_factor
            )));
        }

        let rep = &self.reputation;
        if rep.max <= 0.0 || rep.initial < 0.0 || rep.initial > rep.max {
            return Err(ConsensusError::Config(format!(
                "reputation initial {} must lie in [0, {}] with a positive max",
                rep.initial, rep.max
            )));
        }
        if !(rep.vote_penalty > 0.0 && rep.vote_penalty <= 1.0) || rep.reward < 0.0 {
            return Err(ConsensusError::Config(
                "reputation penalty must be in (0, 1] and reward non-negative".to_string(),
            ));
        }

        for (name, range) in [
            ("stake_range", self.stake_range),
            ("balance_range", self.balance_range),
            ("traffic.amount", self.traffic.amount),
            ("traffic.reward", self.traffic.reward),
        ] {
            let finite = range.min.is_finite() && range.max.is_finite();
            if !finite || range.min < 0.0 || range.max < range.min {
                return Err(ConsensusError::Config(format!(
                    "{} must be finite with 0 <= min <= max",
                    name
                )));
            }
        }

        if self.report_interval == 0 {
            return Err(ConsensusError::Config(
                "Report interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get slot duration as Duration
    pub fn slot_duration(&self) -> Duration {
        Duration::from_millis(self.slot_duration_ms)
    }

    /// Get the fan-in deadline as Duration
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    /// Rounds between two delegate elections
    pub fn delegate_term(&self) -> u64 {
        2 * self.delegate_size as u64
    }

    pub fn with_committee_size(mut self, size: usize) -> Self {
        self.committee_size = size;
        self
    }

    pub fn with_delegate_size(mut self, size: usize) -> Self {
        self.delegate_size = size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_slot_duration_ms(mut self, millis: u64) -> Self {
        self.slot_duration_ms = millis;
        self
    }

    pub fn with_population(mut self, validators: usize, malicious: usize, users: usize) -> Self {
        self.validator_count = validators;
        self.malicious_count = malicious;
        self.user_count = users;
        self
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}
