use super::split::Partition;
use crate::core::forcefield::parameters::{DEFAULT_MAX_PERIODICITY, ExtractionOptions};
use crate::core::io::codec::KeyCodec;
use crate::core::tuples::indexer::IndexerConfig;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

pub const DEFAULT_NONBONDED_FF_NAME: &str = "reference_ff";

/// How a [`MolData`](super::moldata::MolData) is derived from a classical system.
#[derive(Debug, Clone, PartialEq)]
pub struct MolDataOptions {
    pub max_periodicity: usize,
    /// Fall back to nan-filled parameters when extraction fails.
    pub allow_nan_params: bool,
    pub allow_skip_improper: bool,
    pub indexer: IndexerConfig,
    /// Name under which the nonbonded baseline is stored.
    pub nonbonded_ff_name: String,
    pub charge_model: Option<String>,
    pub compute_improper_reference: bool,
}

impl MolDataOptions {
    pub fn extraction(&self) -> ExtractionOptions {
        ExtractionOptions {
            max_periodicity: self.max_periodicity,
            allow_skip_improper: self.allow_skip_improper,
        }
    }
}

impl Default for MolDataOptions {
    fn default() -> Self {
        Self {
            max_periodicity: DEFAULT_MAX_PERIODICITY,
            allow_nan_params: false,
            allow_skip_improper: false,
            indexer: IndexerConfig::default(),
            nonbonded_ff_name: DEFAULT_NONBONDED_FF_NAME.to_string(),
            charge_model: None,
            compute_improper_reference: false,
        }
    }
}

#[derive(Default)]
pub struct MolDataOptionsBuilder {
    max_periodicity: Option<usize>,
    allow_nan_params: Option<bool>,
    allow_skip_improper: Option<bool>,
    indexer: Option<IndexerConfig>,
    nonbonded_ff_name: Option<String>,
    charge_model: Option<String>,
    compute_improper_reference: Option<bool>,
}

impl MolDataOptionsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_periodicity(mut self, max: usize) -> Self {
        self.max_periodicity = Some(max);
        self
    }
    pub fn allow_nan_params(mut self, allow: bool) -> Self {
        self.allow_nan_params = Some(allow);
        self
    }
    pub fn allow_skip_improper(mut self, allow: bool) -> Self {
        self.allow_skip_improper = Some(allow);
        self
    }
    pub fn indexer(mut self, config: IndexerConfig) -> Self {
        self.indexer = Some(config);
        self
    }
    pub fn nonbonded_ff_name(mut self, name: impl Into<String>) -> Self {
        self.nonbonded_ff_name = Some(name.into());
        self
    }
    pub fn charge_model(mut self, tag: impl Into<String>) -> Self {
        self.charge_model = Some(tag.into());
        self
    }
    pub fn compute_improper_reference(mut self, compute: bool) -> Self {
        self.compute_improper_reference = Some(compute);
        self
    }

    pub fn build(self) -> Result<MolDataOptions, ConfigError> {
        let defaults = MolDataOptions::default();
        let max_periodicity = self.max_periodicity.unwrap_or(defaults.max_periodicity);
        if max_periodicity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_periodicity",
                reason: "must be at least 1".to_string(),
            });
        }
        let nonbonded_ff_name = self.nonbonded_ff_name.unwrap_or(defaults.nonbonded_ff_name);
        KeyCodec::validate_ff_name(&nonbonded_ff_name).map_err(|e| ConfigError::InvalidValue {
            field: "nonbonded_ff_name",
            reason: e.to_string(),
        })?;
        Ok(MolDataOptions {
            max_periodicity,
            allow_nan_params: self.allow_nan_params.unwrap_or(defaults.allow_nan_params),
            allow_skip_improper: self.allow_skip_improper.unwrap_or(defaults.allow_skip_improper),
            indexer: self.indexer.unwrap_or(defaults.indexer),
            nonbonded_ff_name,
            charge_model: self.charge_model,
            compute_improper_reference: self
                .compute_improper_reference
                .unwrap_or(defaults.compute_improper_reference),
        })
    }
}

/// Partition of molecule identities into train, validation and test sets.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitConfig {
    pub partition: Partition,
    pub seed: u64,
}

#[derive(Default)]
pub struct SplitConfigBuilder {
    partition: Option<Partition>,
    seed: Option<u64>,
}

impl SplitConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SplitConfig, ConfigError> {
        let partition = self
            .partition
            .ok_or(ConfigError::MissingParameter("partition"))?;
        partition.validate().map_err(|e| ConfigError::InvalidValue {
            field: "partition",
            reason: e.to_string(),
        })?;
        Ok(SplitConfig {
            partition,
            seed: self.seed.unwrap_or(0),
        })
    }
}

/// Subdataset weighting and size balancing for sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingConfig {
    /// Relative weight per subdataset; unlisted subdatasets weigh 1.
    pub weights: HashMap<String, f64>,
    /// 0 samples uniformly over entries, 1 samples uniformly over subdatasets.
    pub balance_factor: f64,
}

impl SamplingConfig {
    pub fn weight_of(&self, subdataset: &str) -> f64 {
        self.weights.get(subdataset).copied().unwrap_or(1.0)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            weights: HashMap::new(),
            balance_factor: 0.0,
        }
    }
}

#[derive(Default)]
pub struct SamplingConfigBuilder {
    weights: HashMap<String, f64>,
    balance_factor: Option<f64>,
}

impl SamplingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight(mut self, subdataset: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(subdataset.into(), weight);
        self
    }
    pub fn weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights.extend(weights);
        self
    }
    pub fn balance_factor(mut self, factor: f64) -> Self {
        self.balance_factor = Some(factor);
        self
    }

    pub fn build(self) -> Result<SamplingConfig, ConfigError> {
        let balance_factor = self.balance_factor.unwrap_or(0.0);
        if !(0.0..=1.0).contains(&balance_factor) {
            return Err(ConfigError::InvalidValue {
                field: "balance_factor",
                reason: format!("{} is outside [0, 1]", balance_factor),
            });
        }
        if let Some((name, w)) = self.weights.iter().find(|(_, w)| !(**w >= 0.0)) {
            return Err(ConfigError::InvalidValue {
                field: "weights",
                reason: format!("weight {} of '{}' is negative or NaN", w, name),
            });
        }
        Ok(SamplingConfig {
            weights: self.weights,
            balance_factor,
        })
    }
}
