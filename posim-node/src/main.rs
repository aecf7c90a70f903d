//! Proof-of-stake security simulator

mod logging;
mod population;
mod reporter;
mod settings;

use clap::Parser;
use logging::LogFormat;
use posim_consensus::{AttackMode, ConsensusVariant, RoundDriver, SimulationContext};
use reporter::Reporter;
use settings::Overrides;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "posim", version, about = "Simulate proof-of-stake consensus under attack")]
struct Cli {
    /// Path to a TOML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "POSIM_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value = "human")]
    log_format: LogFormat,

    /// Write the final evaluation and snapshot as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    #[arg(long)]
    validators: Option<usize>,

    #[arg(long)]
    users: Option<usize>,

    /// Number of malicious validators, taken from the front of the roster
    #[arg(long)]
    malicious: Option<usize>,

    #[arg(long)]
    committee_size: Option<usize>,

    #[arg(long)]
    delegate_size: Option<usize>,

    /// pos | slashing | reputation
    #[arg(long)]
    variant: Option<ConsensusVariant>,

    /// none | network_partition | balance
    #[arg(long)]
    attack: Option<AttackMode>,

    /// Slot duration in milliseconds
    #[arg(long)]
    slot_ms: Option<u64>,

    /// Stop after this many rounds
    #[arg(long)]
    rounds: Option<u64>,

    /// Seed for the selection RNG
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            validators: self.validators,
            users: self.users,
            malicious: self.malicious,
            committee_size: self.committee_size,
            delegate_size: self.delegate_size,
            variant: self.variant,
            attack: self.attack,
            slot_ms: self.slot_ms,
            rounds: self.rounds,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format, &cli.log_level)?;

    let config = settings::load(cli.config.as_deref(), cli.overrides())?;
    info!(
        variant = ?config.variant,
        attack = ?config.attack,
        validators = config.validator_count,
        malicious = config.malicious_count,
        committee_size = config.committee_size,
        slot_ms = config.slot_duration_ms,
        "starting simulation"
    );

    let report_interval = config.report_interval;
    let ctx = SimulationContext::new(config)?;
    population::populate(&ctx)?;

    let cancel = CancellationToken::new();
    let traffic = population::start_traffic(&ctx, &cancel);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(Reporter::new(report_interval, cli.report.clone()).run(event_rx));

    let mut driver = RoundDriver::new(ctx, cancel.clone());
    driver.set_event_sender(event_tx);

    let signals = tokio::spawn(wait_for_signal(cancel.clone()));
    let rounds = driver.run().await;

    cancel.cancel();
    signals.abort();
    for task in traffic {
        if let Err(e) = task.await {
            warn!(error = %e, "traffic task ended abnormally");
        }
    }

    reporter.await??;
    info!(rounds, "shutdown complete");
    Ok(())
}

/// Cancel the simulation on SIGINT or SIGTERM
async fn wait_for_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}
