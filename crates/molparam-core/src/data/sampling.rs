use super::config::SamplingConfig;
use super::error::DatasetError;
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use std::collections::HashMap;

/// Sampling probability of each entry, given the subdataset of every entry.
///
/// With balance factor `b`, `N` entries and `n_sub` subdatasets, an entry of a subdataset of
/// size `s` gets `(1 - b) / N + b / (n_sub * s)`, scaled by its subdataset weight. The result
/// sums to one.
pub fn sampling_weights<S: AsRef<str>>(
    subdatasets: &[S],
    config: &SamplingConfig,
) -> Result<Vec<f64>, DatasetError> {
    let b = config.balance_factor;
    if !(0.0..=1.0).contains(&b) {
        return Err(DatasetError::Sampling {
            reason: format!("balance factor {} is outside [0, 1]", b),
        });
    }
    if subdatasets.is_empty() {
        return Ok(Vec::new());
    }
    let mut sizes: HashMap<&str, usize> = HashMap::new();
    for sub in subdatasets {
        *sizes.entry(sub.as_ref()).or_default() += 1;
    }
    let n = subdatasets.len() as f64;
    let n_sub = sizes.len() as f64;
    let raw: Vec<f64> = subdatasets
        .iter()
        .map(|sub| {
            let sub = sub.as_ref();
            let size = sizes[sub] as f64;
            ((1.0 - b) / n + b / (n_sub * size)) * config.weight_of(sub)
        })
        .collect();
    let total: f64 = raw.iter().sum();
    if !(total > 0.0) || !total.is_finite() {
        return Err(DatasetError::Sampling {
            reason: "all sampling weights are zero".to_string(),
        });
    }
    Ok(raw.into_iter().map(|p| p / total).collect())
}

/// Draws entry indices with replacement according to fixed weights.
pub struct WeightedSampler {
    index: WeightedIndex<f64>,
    rng: StdRng,
}

impl WeightedSampler {
    pub fn new(weights: &[f64], seed: u64) -> Result<Self, DatasetError> {
        let index = WeightedIndex::new(weights).map_err(|e| DatasetError::Sampling {
            reason: e.to_string(),
        })?;
        Ok(Self {
            index,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn draw(&mut self) -> usize {
        self.index.sample(&mut self.rng)
    }

    pub fn draw_n(&mut self, n: usize) -> Vec<usize> {
        (0..n).map(|_| self.draw()).collect()
    }
}

impl Iterator for WeightedSampler {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        Some(self.draw())
    }
}
