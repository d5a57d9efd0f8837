use crate::cli::SplitArgs;
use crate::error::{CliError, Result};
use molparam::data::config::{SamplingConfig, SamplingConfigBuilder, SplitConfig, SplitConfigBuilder};
use molparam::data::split::{Partition, SplitFractions};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Split configuration as written in a TOML file. Every value is optional; missing fractions
/// fall back to 0.8/0.1/0.1 and the seed to 0.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialSplitConfig {
    pub seed: Option<u64>,
    pub partition: Option<PartialPartition>,
    pub sampling: Option<PartialSampling>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialPartition {
    pub train: Option<f64>,
    pub val: Option<f64>,
    pub test: Option<f64>,
    /// Fractions for individual subdatasets, keyed by directory name.
    #[serde(default)]
    pub overrides: BTreeMap<String, SplitFractions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PartialSampling {
    pub balance_factor: Option<f64>,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
}

impl PartialSplitConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
        Self::from_toml_str(&content)
            .map_err(|e| CliError::Config(format!("Failed to parse '{}': {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolves file values against command-line overrides. Command-line values win.
    pub fn merge_with_cli(self, args: &SplitArgs) -> Result<(SplitConfig, SamplingConfig)> {
        let partition = self.partition.unwrap_or_default();
        let defaults = SplitFractions::default();
        let global = SplitFractions::new(
            args.train.or(partition.train).unwrap_or(defaults.train),
            args.val.or(partition.val).unwrap_or(defaults.val),
            args.test.or(partition.test).unwrap_or(defaults.test),
        );
        let partition = if partition.overrides.is_empty() {
            Partition::Global(global)
        } else {
            Partition::PerSubdataset {
                default: global,
                overrides: partition.overrides,
            }
        };

        let split = SplitConfigBuilder::new()
            .partition(partition)
            .seed(args.seed.or(self.seed).unwrap_or(0))
            .build()?;

        let sampling = self.sampling.unwrap_or_default();
        let mut builder = SamplingConfigBuilder::new().weights(sampling.weights);
        if let Some(b) = args.balance_factor.or(sampling.balance_factor) {
            builder = builder.balance_factor(b);
        }
        Ok((split, builder.build()?))
    }
}
