//! Automatic population of a simulation from its configuration

use posim_consensus::traffic::spawn_traffic;
use posim_consensus::{ConsensusResult, SimulationContext};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Join the configured validators and users
///
/// The first `malicious_count` validators are malicious. Users are named
/// `user0`, `user1`, and so on.
pub fn populate(ctx: &SimulationContext) -> ConsensusResult<()> {
    let config = ctx.config().clone();
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
        None => StdRng::from_rng(&mut rand::rng()),
    };

    for i in 0..config.validator_count {
        let stake = config.stake_range.sample(&mut rng);
        ctx.join_validator(stake, i < config.malicious_count)?;
    }
    for i in 0..config.user_count {
        let balance = config.balance_range.sample(&mut rng);
        ctx.join_user(format!("user{}", i), balance)?;
    }

    info!(
        validators = config.validator_count,
        malicious = config.malicious_count,
        users = config.user_count,
        "population joined"
    );
    Ok(())
}

/// Start one traffic task per user
pub fn start_traffic(ctx: &Arc<SimulationContext>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    ctx.users()
        .all()
        .into_iter()
        .map(|user| spawn_traffic(Arc::clone(ctx), user, cancel.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use posim_consensus::{AttackMode, ConsensusVariant, SimulationConfig};

    #[tokio::test]
    async fn test_populate_marks_first_validators_malicious() {
        let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::NetworkPartition)
            .with_population(5, 2, 3)
            .with_seed(8);
        let ctx = SimulationContext::new(config).unwrap();
        populate(&ctx).unwrap();

        let validators = ctx.validators();
        assert_eq!(validators.len(), 5);
        let malicious: Vec<bool> = validators.iter().map(|v| v.state.is_malicious()).collect();
        assert_eq!(malicious, vec![true, true, false, false, false]);
        for v in &validators {
            assert!((300.0..1_000.0).contains(&v.state.stake()));
        }

        assert_eq!(ctx.users().len(), 3);
        assert!(ctx.users().by_name("user2").is_some());
    }
}
