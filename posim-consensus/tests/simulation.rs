//! End-to-end rounds against live validator workers

use posim_consensus::{
    AttackMode, ConsensusVariant, ResolutionReport, RoundDriver, RoundOutcome, RoundPlan,
    SimulationConfig, SimulationContext, ValidatorHandle,
};
use posim_core::{Address, Block, TransactionId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn setup(config: SimulationConfig) -> RoundDriver {
    let ctx = SimulationContext::new(config).unwrap();
    RoundDriver::new(ctx, CancellationToken::new())
}

/// Wait until every validator holds transaction `id` in its mempool
async fn wait_for_mempools(ctx: &Arc<SimulationContext>, id: TransactionId) {
    for _ in 0..400 {
        if ctx.validators().iter().all(|v| v.state.has_pending(id)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("transaction {} never reached every mempool", id);
}

fn grow(validator: &ValidatorHandle, blocks: usize, salt: u64) {
    for i in 0..blocks {
        let tip = validator.state.tip();
        let next = Block::successor(&tip, tip.timestamp + salt + i as u64 + 1, vec![], Address::zero(), false)
            .unwrap();
        assert!(validator.state.apply_verified(next));
    }
}

fn hashes(validator: &ValidatorHandle) -> Vec<posim_core::Hash> {
    validator.state.ledger().chain.hashes()
}

#[tokio::test]
async fn test_single_transaction_settles_once_everywhere() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::None)
        .with_seed(5)
        .with_committee_size(3);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    for _ in 0..5 {
        ctx.join_validator(100.0, false).unwrap();
    }
    let alice = ctx.join_user("alice", 100.0).unwrap();
    let bob = ctx.join_user("bob", 0.0).unwrap();

    let tx = ctx.submit_transaction(&alice, bob.address(), 10.0, 1.0).unwrap();
    wait_for_mempools(&ctx, tx.id).await;

    let outcome = driver.next_slot().await.unwrap();
    let RoundOutcome::Decided {
        proposer, accepted, ..
    } = outcome
    else {
        panic!("expected a decided round, got {:?}", outcome);
    };
    assert!(accepted);

    for v in ctx.validators() {
        let ledger = v.state.ledger();
        assert_eq!(ledger.chain.len(), 2);
        assert_eq!(ledger.chain.tip().transaction_ids(), vec![tx.id]);
        assert!(ledger.confirmed.contains(&tx.id));
        assert!(ledger.mempool.is_empty());
    }
    assert!((alice.balance() - 89.0).abs() < 1e-9);
    assert!((bob.balance() - 10.0).abs() < 1e-9);
    let proposer = ctx.validator(&proposer).unwrap();
    assert!((proposer.state.stake() - 101.0).abs() < 1e-9);
    assert_eq!(proposer.state.standing().blocks_added, 1);

    // A replay of the same transaction is refused and nothing settles twice.
    ctx.broadcast_transaction(&tx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let outcome = driver.next_slot().await.unwrap();
    assert_eq!(outcome.blocks_accepted(), 0);
    assert!((alice.balance() - 89.0).abs() < 1e-9);
    assert!((bob.balance() - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_fork_resolution_adopts_longest_chain() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::None);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    let validators: Vec<_> = (0..3).map(|_| ctx.join_validator(50.0, false).unwrap()).collect();
    grow(&validators[0], 2, 0);
    grow(&validators[1], 2, 100);
    grow(&validators[2], 6, 200);

    let report = driver.resolve_forks().await.unwrap();
    assert!(matches!(
        report,
        ResolutionReport::Adopted {
            chain_len: 7,
            resynced: 2,
            punished: None,
            ..
        }
    ));

    let canonical = hashes(&validators[2]);
    assert_eq!(canonical.len(), 7);
    for v in &validators {
        assert_eq!(hashes(v), canonical);
    }
    let certified: Vec<_> = ctx.certified_chain().iter().map(|b| b.hash).collect();
    assert_eq!(certified, canonical);
}

#[tokio::test]
async fn test_balance_resolution_defers_close_forks() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::Balance);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    let on_genesis = ctx.join_validator(50.0, false).unwrap();
    let on_fork = ctx.join_validator(50.0, false).unwrap();
    assert_ne!(on_genesis.state.tip().hash, on_fork.state.tip().hash);

    grow(&on_genesis, 4, 0);
    grow(&on_fork, 5, 0);
    let report = driver.resolve_forks().await.unwrap();
    assert_eq!(
        report,
        ResolutionReport::Deferred {
            longest: 6,
            runner_up: 5
        }
    );
    assert_eq!(on_genesis.state.chain_len(), 5);
    assert_eq!(on_fork.state.chain_len(), 6);

    grow(&on_genesis, 4, 50);
    let report = driver.resolve_forks().await.unwrap();
    assert!(matches!(report, ResolutionReport::Adopted { chain_len: 9, .. }));
    assert_eq!(hashes(&on_fork), hashes(&on_genesis));
}

#[tokio::test]
async fn test_network_partition_fork_is_punished_at_resolution() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::NetworkPartition)
        .with_seed(9);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    // Malicious and honest validators alternate groups within their class.
    let attacker = ctx.join_validator(100.0, true).unwrap();
    let h0 = ctx.join_validator(100.0, false).unwrap();
    let h1 = ctx.join_validator(100.0, false).unwrap();
    let h2 = ctx.join_validator(100.0, false).unwrap();
    let h3 = ctx.join_validator(100.0, false).unwrap();
    assert_eq!(attacker.state.group(), h0.state.group());
    assert_eq!(h1.state.group(), h3.state.group());
    assert_ne!(h0.state.group(), h1.state.group());

    let alice = ctx.join_user("alice", 100.0).unwrap();
    let bob = ctx.join_user("bob", 0.0).unwrap();
    let tx = ctx.submit_transaction(&alice, bob.address(), 10.0, 0.0).unwrap();
    wait_for_mempools(&ctx, tx.id).await;

    let pre_attack = attacker.state.stake();
    let plan = RoundPlan {
        committee: vec![attacker.clone(), h0.clone(), h1.clone(), h3.clone()],
        proposer: attacker.clone(),
    };
    let outcome = driver.play_round(plan).await.unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Split {
            proposer: attacker.address(),
            primary_accepted: true,
            secondary_accepted: true,
            forked: true,
        }
    );
    assert!(driver.is_forked());
    assert_eq!(driver.fork_proposer(), Some(attacker.address()));

    // Each group holds its own branch on top of the same parent.
    assert_eq!(hashes(&h0), hashes(&h2));
    assert_eq!(hashes(&h1), hashes(&h3));
    assert_ne!(h0.state.tip().hash, h1.state.tip().hash);
    assert_eq!(h0.state.tip().prev_hash, h1.state.tip().prev_hash);
    // Both branches settled the same transfer.
    assert!((alice.balance() - 80.0).abs() < 1e-9);
    assert_eq!(attacker.state.stake(), pre_attack);

    let report = driver.resolve_forks().await.unwrap();
    let ResolutionReport::Adopted { punished, .. } = report else {
        panic!("expected adoption, got {:?}", report);
    };
    assert_eq!(punished, Some(attacker.address()));
    assert!(!driver.is_forked());
    assert!((attacker.state.stake() - 0.2 * pre_attack).abs() < 1e-9);

    let canonical = hashes(&attacker);
    for v in ctx.validators() {
        assert_eq!(hashes(&v), canonical);
    }
}

#[tokio::test]
async fn test_partition_with_one_passing_branch_does_not_fork() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::NetworkPartition)
        .with_seed(13);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    let attacker = ctx.join_validator(100.0, true).unwrap();
    let h0 = ctx.join_validator(100.0, false).unwrap();
    let h1 = ctx.join_validator(100.0, false).unwrap();
    let h2 = ctx.join_validator(100.0, false).unwrap();
    let h3 = ctx.join_validator(100.0, false).unwrap();
    let home = attacker.state.group();
    assert_eq!(h0.state.group(), home);
    assert_eq!(h2.state.group(), home);
    assert_ne!(h1.state.group(), home);
    assert_ne!(h3.state.group(), home);

    let alice = ctx.join_user("alice", 100.0).unwrap();
    let bob = ctx.join_user("bob", 0.0).unwrap();
    let tx = ctx.submit_transaction(&alice, bob.address(), 10.0, 0.0).unwrap();
    wait_for_mempools(&ctx, tx.id).await;

    let old_tip = h1.state.tip().hash;
    let pre_attack = attacker.state.stake();

    // Nobody from the other group sits on the committee, so the secondary
    // branch has no electorate and cannot pass.
    let outcome = driver
        .play_round(RoundPlan {
            committee: vec![attacker.clone(), h0.clone(), h2.clone()],
            proposer: attacker.clone(),
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        RoundOutcome::Split {
            proposer: attacker.address(),
            primary_accepted: true,
            secondary_accepted: false,
            forked: false,
        }
    );
    assert!(!driver.is_forked());
    assert_eq!(driver.fork_proposer(), None);

    // The accepted branch reached the proposer's group only.
    for v in [&attacker, &h0, &h2] {
        let ledger = v.state.ledger();
        assert_eq!(ledger.chain.len(), 2);
        assert!(ledger.confirmed.contains(&tx.id));
    }
    for v in [&h1, &h3] {
        assert_eq!(v.state.tip().hash, old_tip);
        let ledger = v.state.ledger();
        assert_eq!(ledger.chain.len(), 1);
        assert!(!ledger.confirmed.contains(&tx.id));
        assert!(ledger.mempool.contains_key(&tx.id));
    }

    // The transfer settled once, through the primary branch only.
    assert!((alice.balance() - 90.0).abs() < 1e-9);
    assert!((bob.balance() - 10.0).abs() < 1e-9);
    assert_eq!(attacker.state.stake(), pre_attack);
}

#[tokio::test]
async fn test_balance_attack_steers_votes_to_shorter_fork() {
    let config = SimulationConfig::new(ConsensusVariant::Slashing, AttackMode::Balance).with_seed(4);
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    let m0 = ctx.join_validator(100.0, true).unwrap();
    let m1 = ctx.join_validator(100.0, true).unwrap();
    let h0 = ctx.join_validator(100.0, false).unwrap();
    let h1 = ctx.join_validator(100.0, false).unwrap();
    assert_eq!(m0.state.group(), h0.state.group());
    assert_eq!(m1.state.group(), h1.state.group());

    // The fork-genesis side pulls ahead by one block.
    grow(&m1, 1, 0);
    let b_tip = m1.state.tip();
    assert!(h1.state.apply_verified(b_tip));

    let alice = ctx.join_user("alice", 100.0).unwrap();
    let bob = ctx.join_user("bob", 0.0).unwrap();
    let tx = ctx.submit_transaction(&alice, bob.address(), 5.0, 0.0).unwrap();
    wait_for_mempools(&ctx, tx.id).await;

    // An honest proposer on the longer fork is voted down by the malicious members.
    let outcome = driver
        .play_round(RoundPlan {
            committee: vec![h1.clone(), m0.clone(), m1.clone()],
            proposer: h1.clone(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, RoundOutcome::Decided { accepted: false, valid_votes: 1, .. }));
    assert!((h1.state.stake() - 20.0).abs() < 1e-9);

    // A malicious proposer extends the shorter fork and everybody agrees.
    let outcome = driver
        .play_round(RoundPlan {
            committee: vec![m0.clone(), m1.clone(), h0.clone()],
            proposer: m0.clone(),
        })
        .await
        .unwrap();
    assert!(matches!(outcome, RoundOutcome::Decided { accepted: true, valid_votes: 3, .. }));

    assert_eq!(m0.state.chain_len(), 2);
    assert_eq!(h0.state.chain_len(), 2);
    assert_eq!(m1.state.chain_len(), 2);
    assert_eq!(h1.state.chain_len(), 2);
    assert_ne!(h0.state.tip().hash, h1.state.tip().hash);
}

#[tokio::test]
async fn test_delegated_round_rewards_reputation() {
    let config = SimulationConfig::new(ConsensusVariant::Reputation, AttackMode::None)
        .with_seed(2)
        .with_delegate_size(2);
    let initial = config.reputation.initial;
    let mut driver = setup(config);
    let ctx = Arc::clone(driver.context());

    let validators: Vec<_> = (0..4).map(|_| ctx.join_validator(100.0, false).unwrap()).collect();
    let alice = ctx.join_user("alice", 100.0).unwrap();
    let bob = ctx.join_user("bob", 0.0).unwrap();
    let tx = ctx.submit_transaction(&alice, bob.address(), 1.0, 0.5).unwrap();
    wait_for_mempools(&ctx, tx.id).await;

    let outcome = driver.next_slot().await.unwrap();
    assert!(matches!(
        outcome,
        RoundOutcome::Decided { accepted: true, electorate: 2, .. }
    ));
    assert_eq!(
        driver.delegates(),
        &[validators[0].address(), validators[1].address()]
    );

    // ballot + accepted proposal + majority vote, ballot + majority vote, ballot only
    assert_eq!(validators[0].state.reputation(), initial + 3.0);
    assert_eq!(validators[1].state.reputation(), initial + 2.0);
    assert_eq!(validators[2].state.reputation(), initial + 1.0);
    assert_eq!(validators[3].state.reputation(), initial + 1.0);
}
