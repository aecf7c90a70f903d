//! Consumes simulation events and reports progress

use chrono::{DateTime, Utc};
use posim_consensus::{
    Evaluation, ResolutionReport, RoundOutcome, SimulationEvent, SimulationSnapshot,
};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct Reporter {
    report_interval: u64,
    started_at: DateTime<Utc>,
    output: Option<PathBuf>,
    last_snapshot: Option<SimulationSnapshot>,
    accepted_blocks: usize,
    skipped_rounds: u64,
}

impl Reporter {
    pub fn new(report_interval: u64, output: Option<PathBuf>) -> Self {
        Self {
            report_interval: report_interval.max(1),
            started_at: Utc::now(),
            output,
            last_snapshot: None,
            accepted_blocks: 0,
            skipped_rounds: 0,
        }
    }

    fn elapsed_secs(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1_000.0
    }

    /// Handle one event; returns the evaluation when one is due
    pub fn observe(&mut self, event: SimulationEvent) -> Option<Evaluation> {
        match event {
            SimulationEvent::RoundCompleted { round, outcome } => {
                self.accepted_blocks += outcome.blocks_accepted();
                if let RoundOutcome::Skipped(reason) = outcome {
                    self.skipped_rounds += 1;
                    debug!(round, ?reason, "round skipped");
                }
                None
            }
            SimulationEvent::ForkResolved { round, report } => {
                match report {
                    ResolutionReport::Adopted {
                        chain_len,
                        punished: Some(offender),
                        ..
                    } => warn!(round, chain_len, offender = %offender.short(), "fork resolved, proposer punished"),
                    ResolutionReport::Adopted { chain_len, .. } => {
                        info!(round, chain_len, "certified chain updated")
                    }
                    ResolutionReport::Deferred { longest, runner_up } => {
                        info!(round, longest, runner_up, "fork resolution deferred")
                    }
                    ResolutionReport::Skipped => {}
                }
                None
            }
            SimulationEvent::DelegatesElected { round, delegates } => {
                debug!(round, count = delegates.len(), "delegates elected");
                None
            }
            SimulationEvent::Snapshot(snapshot) => {
                let due = snapshot.round % self.report_interval == 0;
                let evaluation = due.then(|| snapshot.evaluate(self.elapsed_secs()));
                if let Some(eval) = &evaluation {
                    log_evaluation(eval, &snapshot);
                }
                self.last_snapshot = Some(*snapshot);
                evaluation
            }
        }
    }

    /// Drain events until the driver hangs up, then write the final report
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SimulationEvent>) -> anyhow::Result<()> {
        while let Some(event) = events.recv().await {
            self.observe(event);
        }
        self.finish()
    }

    fn finish(&self) -> anyhow::Result<()> {
        let Some(snapshot) = &self.last_snapshot else {
            info!("simulation ended before the first round");
            return Ok(());
        };
        let evaluation = snapshot.evaluate(self.elapsed_secs());
        info!(
            rounds = snapshot.round,
            accepted_blocks = self.accepted_blocks,
            skipped_rounds = self.skipped_rounds,
            "simulation finished"
        );
        log_evaluation(&evaluation, snapshot);

        if let Some(path) = &self.output {
            let body = serde_json::json!({
                "evaluation": evaluation,
                "snapshot": snapshot,
            });
            std::fs::write(path, serde_json::to_string_pretty(&body)?)?;
            info!(path = %path.display(), "report written");
        }
        Ok(())
    }
}

fn log_evaluation(eval: &Evaluation, snapshot: &SimulationSnapshot) {
    info!(
        round = eval.round,
        total_blocks = eval.total_blocks,
        malicious_blocks = eval.malicious_blocks,
        malicious_share = %format!("{:.2}", eval.malicious_share()),
        transactions = eval.transactions,
        elapsed_secs = eval.elapsed_secs,
        forked = snapshot.forked,
        "evaluation"
    );
    for v in &snapshot.validators {
        debug!(
            validator = %v.address.short(),
            malicious = v.malicious,
            chain_len = v.chain_len,
            stake = %format!("{:.2}", v.stake),
            reputation = %format!("{:.2}", v.reputation),
            committee = v.committee_count,
            proposed = v.proposer_count,
            added = v.blocks_added,
            "validator"
        );
    }
}
