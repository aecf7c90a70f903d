//! Proof-of-stake consensus simulation
//!
//! This crate runs the simulated network: validator and user actors, the
//! round driver, stake-weighted and delegated selection, the vote protocol,
//! incentive policies and the network-partition and balance attack models.

pub mod attack;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fork;
pub mod incentives;
pub mod message;
pub mod producer;
pub mod report;
pub mod selection;
pub mod traffic;
pub mod traits;
pub mod user;
pub mod validator;
pub mod vote;
mod worker;

pub use config::{AmountRange, AttackMode, ConsensusVariant, SimulationConfig};
pub use context::{JoinRequest, Participant, SimulationContext};
pub use driver::{RoundDriver, RoundPhase, RoundPlan};
pub use error::{ConsensusError, ConsensusResult};
pub use fork::ResolutionReport;
pub use report::{Evaluation, SimulationEvent, SimulationSnapshot, ValidatorReport};
pub use traits::{IncentivePolicy, RoundOutcome, SkipReason};
pub use user::{User, UserDirectory};
pub use validator::{ForkGroup, LocalLedger, ValidatorHandle, ValidatorState};
