//! Background transaction traffic from users

use crate::context::SimulationContext;
use crate::user::User;
use posim_core::Address;
use rand::seq::IndexedRandom;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Periodically send a random transfer from `user` to another user
pub fn spawn_traffic(
    ctx: Arc<SimulationContext>,
    user: Arc<User>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let traffic = ctx.config().traffic;
        let interval = std::time::Duration::from_millis(traffic.interval_ms);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let draw = {
                let mut rng = rand::rng();
                let others: Vec<Address> = ctx
                    .users()
                    .all()
                    .iter()
                    .map(|u| u.address())
                    .filter(|a| *a != user.address())
                    .collect();
                others.choose(&mut rng).map(|receiver| {
                    (
                        *receiver,
                        traffic.amount.sample(&mut rng),
                        traffic.reward.sample(&mut rng),
                    )
                })
            };

            let Some((receiver, amount, reward)) = draw else {
                trace!(user = user.name(), "no counterparty yet");
                continue;
            };
            if let Err(e) = ctx.submit_transaction(&user, receiver, amount, reward) {
                debug!(user = user.name(), "transaction not submitted: {}", e);
            }
        }
        trace!(user = user.name(), "traffic stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttackMode, ConsensusVariant, SimulationConfig};
    use std::time::Duration;

    #[tokio::test]
    async fn test_traffic_reaches_validators() {
        let mut config = SimulationConfig::new(ConsensusVariant::Pos, AttackMode::None);
        config.traffic.interval_ms = 10;
        let ctx = SimulationContext::new(config).unwrap();
        let validator = ctx.join_validator(10.0, false).unwrap();
        let alice = ctx.join_user("alice", 1_000_000.0).unwrap();
        ctx.join_user("bob", 0.0).unwrap();

        let cancel = CancellationToken::new();
        let task = spawn_traffic(Arc::clone(&ctx), alice, cancel.clone());

        let mut seen = false;
        for _ in 0..200 {
            if validator.state.mempool_len() > 0 {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert!(seen);
    }
}
