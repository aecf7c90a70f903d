//! Validator worker tasks
//!
//! Each validator runs two tasks: a transaction listener feeding its mempool
//! and a control loop answering votes, verified blocks, resyncs and delegate
//! ballots. Both stop when the handle's senders are dropped.

use crate::message::{
    Branch, ControlMessage, DelegateBallot, DelegateVoteRequest, ShortAttackRequest,
    ValidateRequest, VoteMessage,
};
use crate::selection::rank_by_reputation;
use crate::user::UserDirectory;
use crate::validator::{ValidatorHandle, ValidatorState};
use posim_core::{Block, Transaction};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Spawn the worker tasks for a validator and return its handle
pub(crate) fn spawn_validator(state: Arc<ValidatorState>, users: Arc<UserDirectory>) -> ValidatorHandle {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (tx_tx, tx_rx) = mpsc::unbounded_channel();

    tokio::spawn(transaction_listener(Arc::clone(&state), users, tx_rx));
    tokio::spawn(control_loop(Arc::clone(&state), control_rx));

    ValidatorHandle {
        state,
        control: control_tx,
        transactions: tx_tx,
    }
}

async fn transaction_listener(
    state: Arc<ValidatorState>,
    users: Arc<UserDirectory>,
    mut inbox: mpsc::UnboundedReceiver<Transaction>,
) {
    while let Some(tx) = inbox.recv().await {
        let id = tx.id;
        match state.admit_transaction(tx, &users) {
            Ok(()) => trace!(validator = %state.address().short(), id, "transaction admitted"),
            Err(e) => debug!(validator = %state.address().short(), "{}", e),
        }
    }
    trace!(validator = %state.address().short(), "transaction listener stopped");
}

async fn control_loop(state: Arc<ValidatorState>, mut inbox: mpsc::UnboundedReceiver<ControlMessage>) {
    while let Some(message) = inbox.recv().await {
        trace!(validator = %state.address().short(), kind = message.kind(), "control message");
        match message {
            ControlMessage::Validate(request) => handle_validate(&state, request).await,
            ControlMessage::ValidateShortAttack(request) => {
                handle_short_attack(&state, request).await
            }
            ControlMessage::VerifiedBlock { block, ack } => {
                let grew = state.apply_verified(block);
                if ack.send(grew).is_err() {
                    trace!(validator = %state.address().short(), "block ack dropped");
                }
            }
            ControlMessage::ConsensusResync { ledger, ack } => {
                state.restore_ledger(*ledger);
                if ack.send(()).is_err() {
                    trace!(validator = %state.address().short(), "resync ack dropped");
                }
            }
            ControlMessage::DelegateVote { request, reply } => {
                if reply.send(cast_ballot(&state, &request)).is_err() {
                    debug!(validator = %state.address().short(), "ballot arrived after the deadline");
                }
            }
        }
    }
    trace!(validator = %state.address().short(), "control loop stopped");
}

/// Structural vote: the block must extend `predecessor` and hash correctly
fn judge_block(state: &ValidatorState, block: &Block, predecessor: &Block) -> bool {
    match block.verify_successor(predecessor) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                validator = %state.address().short(),
                block = %block.hash.short(),
                "voting against block: {}",
                e
            );
            false
        }
    }
}

async fn handle_validate(state: &ValidatorState, request: ValidateRequest) {
    let valid = match request.scripted_vote {
        Some(vote) if state.is_malicious() => vote,
        _ => judge_block(state, &request.block, &request.predecessor),
    };
    send_vote(state, &request.reply, request.round, Branch::Primary, valid).await;
}

async fn handle_short_attack(state: &ValidatorState, request: ShortAttackRequest) {
    let (branch, block) = if state.group() == request.primary_group {
        (Branch::Primary, &request.primary)
    } else {
        (Branch::Secondary, &request.secondary)
    };
    let valid = judge_block(state, block, &request.predecessor);
    send_vote(state, &request.reply, request.round, branch, valid).await;
}

async fn send_vote(
    state: &ValidatorState,
    reply: &mpsc::Sender<VoteMessage>,
    round: u64,
    branch: Branch,
    valid: bool,
) {
    let vote = VoteMessage {
        round,
        voter: state.address(),
        branch,
        valid,
    };
    if reply.send(vote).await.is_err() {
        debug!(validator = %state.address().short(), round, "vote arrived after the deadline");
    }
}

fn cast_ballot(state: &ValidatorState, request: &DelegateVoteRequest) -> DelegateBallot {
    DelegateBallot {
        voter: state.address(),
        nominees: rank_by_reputation(&request.candidates, request.delegate_size),
    }
}
