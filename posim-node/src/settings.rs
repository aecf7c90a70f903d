//! Layered configuration: defaults, then file, then `POSIM_*` environment,
//! then command-line flags

use anyhow::Context;
use config::{Config, Environment, File};
use posim_consensus::{AttackMode, ConsensusVariant, SimulationConfig};
use std::path::Path;

/// Values given explicitly on the command line
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub validators: Option<usize>,
    pub users: Option<usize>,
    pub malicious: Option<usize>,
    pub committee_size: Option<usize>,
    pub delegate_size: Option<usize>,
    pub variant: Option<ConsensusVariant>,
    pub attack: Option<AttackMode>,
    pub slot_ms: Option<u64>,
    pub rounds: Option<u64>,
    pub seed: Option<u64>,
}

impl Overrides {
    fn apply(self, config: &mut SimulationConfig) {
        if let Some(v) = self.validators {
            config.validator_count = v;
        }
        if let Some(v) = self.users {
            config.user_count = v;
        }
        if let Some(v) = self.malicious {
            config.malicious_count = v;
        }
        if let Some(v) = self.committee_size {
            config.committee_size = v;
        }
        if let Some(v) = self.delegate_size {
            config.delegate_size = v;
        }
        if let Some(v) = self.variant {
            config.variant = v;
        }
        if let Some(v) = self.attack {
            config.attack = v;
        }
        if let Some(v) = self.slot_ms {
            config.slot_duration_ms = v;
        }
        if let Some(v) = self.rounds {
            config.max_rounds = Some(v);
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
    }
}

/// Build the effective configuration
pub fn load(file: Option<&Path>, overrides: Overrides) -> anyhow::Result<SimulationConfig> {
    let mut builder = Config::builder().add_source(
        Config::try_from(&SimulationConfig::default()).context("encoding default configuration")?,
    );
    if let Some(path) = file {
        builder = builder.add_source(File::from(path));
    }
    builder = builder.add_source(
        Environment::with_prefix("POSIM")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: SimulationConfig = builder
        .build()
        .context("reading configuration sources")?
        .try_deserialize()
        .context("decoding configuration")?;

    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}
