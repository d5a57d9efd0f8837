use super::error::DatasetError;
use itertools::Itertools;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

const FRACTION_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitFractions {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitFractions {
    pub const fn new(train: f64, val: f64, test: f64) -> Self {
        Self { train, val, test }
    }

    fn as_array(&self) -> [f64; 3] {
        [self.train, self.val, self.test]
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        let values = self.as_array();
        if values.iter().any(|f| !f.is_finite() || *f < 0.0) {
            return Err(DatasetError::InvalidPartition {
                reason: format!("fractions {:?} must be finite and non-negative", values),
            });
        }
        let sum: f64 = values.iter().sum();
        if (sum - 1.0).abs() > FRACTION_TOLERANCE {
            return Err(DatasetError::InvalidPartition {
                reason: format!("fractions {:?} sum to {}, not 1", values, sum),
            });
        }
        Ok(())
    }
}

impl Default for SplitFractions {
    fn default() -> Self {
        Self::new(0.8, 0.1, 0.1)
    }
}

/// Train/validation/test fractions, either for all subdatasets or per subdataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Partition {
    Global(SplitFractions),
    PerSubdataset {
        default: SplitFractions,
        overrides: BTreeMap<String, SplitFractions>,
    },
}

impl Partition {
    pub fn validate(&self) -> Result<(), DatasetError> {
        match self {
            Self::Global(fractions) => fractions.validate(),
            Self::PerSubdataset { default, overrides } => {
                default.validate()?;
                overrides.values().try_for_each(SplitFractions::validate)
            }
        }
    }

    pub fn fractions_for(&self, subdataset: &str) -> SplitFractions {
        match self {
            Self::Global(fractions) => *fractions,
            Self::PerSubdataset { default, overrides } => {
                overrides.get(subdataset).copied().unwrap_or(*default)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ORDER: [Self; 3] = [Self::Train, Self::Val, Self::Test];

    pub const fn index(self) -> usize {
        match self {
            Self::Train => 0,
            Self::Val => 1,
            Self::Test => 2,
        }
    }
}

/// Molecule identities per split.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIds {
    pub train: Vec<String>,
    pub val: Vec<String>,
    pub test: Vec<String>,
}

impl SplitIds {
    pub fn get(&self, split: Split) -> &[String] {
        match split {
            Split::Train => &self.train,
            Split::Val => &self.val,
            Split::Test => &self.test,
        }
    }

    fn get_mut(&mut self, split: Split) -> &mut Vec<String> {
        match split {
            Split::Train => &mut self.train,
            Split::Val => &mut self.val,
            Split::Test => &mut self.test,
        }
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails on the first id listed in more than one split.
    pub fn check_disjoint(&self) -> Result<(), DatasetError> {
        let mut seen = HashSet::new();
        for id in self.train.iter().chain(&self.val).chain(&self.test) {
            if !seen.insert(id.as_str()) {
                return Err(DatasetError::Overlap { mol_id: id.clone() });
            }
        }
        Ok(())
    }

    /// Split of every listed id. For overlapping lists the first split wins.
    pub fn assignment(&self) -> HashMap<&str, Split> {
        let mut map = HashMap::new();
        for split in Split::ORDER {
            for id in self.get(split) {
                map.entry(id.as_str()).or_insert(split);
            }
        }
        map
    }
}

/// Distinct ids per subdataset in first-seen order.
fn group_ids<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> BTreeMap<&'a str, Vec<&'a str>> {
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut seen = HashSet::new();
    for (mol_id, subdataset) in entries {
        if seen.insert(mol_id) {
            groups.entry(subdataset).or_default().push(mol_id);
        }
    }
    groups
}

fn shuffled<'a>(mut ids: Vec<&'a str>, rng: &mut StdRng) -> Vec<&'a str> {
    ids.sort_unstable();
    ids.shuffle(rng);
    ids
}

/// Largest-remainder apportionment of `n` ids, with at least one id per positive fraction.
fn apportion(subdataset: &str, n: usize, fractions: [f64; 3]) -> Result<[usize; 3], DatasetError> {
    let required = fractions.iter().filter(|f| **f > 0.0).count();
    if n < required {
        return Err(DatasetError::PartitionInfeasible {
            subdataset: subdataset.to_string(),
            n_ids: n,
            required,
        });
    }
    let quotas = fractions.map(|f| f * n as f64);
    let mut counts = quotas.map(|q| q.floor() as usize);
    let remainder = n.saturating_sub(counts.iter().sum());
    let by_remainder = (0..3)
        .sorted_by(|&a, &b| {
            let ra = quotas[a] - quotas[a].floor();
            let rb = quotas[b] - quotas[b].floor();
            rb.total_cmp(&ra).then(a.cmp(&b))
        })
        .collect_vec();
    for &i in by_remainder.iter().take(remainder) {
        counts[i] += 1;
    }
    for i in 0..3 {
        if fractions[i] > 0.0 && counts[i] == 0 {
            // n >= required guarantees a donor holding at least two ids.
            if let Some(donor) = (0..3).filter(|&j| counts[j] > 1).max_by_key(|&j| counts[j]) {
                counts[donor] -= 1;
                counts[i] += 1;
            }
        }
    }
    Ok(counts)
}

/// Assigns every molecule identity of `entries` (`(mol_id, subdataset)` pairs) to a split.
///
/// Per subdataset the distinct ids are sorted and shuffled with a generator seeded by `seed`,
/// and apportioned by the subdataset's fractions. Ids already in `existing` keep their
/// assignment and count towards the targets; new ids fill the remaining deficits in the order
/// train, val, test. Ids beyond all targets go to the split with the largest fraction.
pub fn calc_split_ids<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    partition: &Partition,
    seed: u64,
    existing: Option<&SplitIds>,
) -> Result<SplitIds, DatasetError> {
    partition.validate()?;
    if let Some(existing) = existing {
        existing.check_disjoint()?;
    }
    let mut result = existing.cloned().unwrap_or_default();
    let mut assigned: HashMap<String, Split> = result
        .assignment()
        .into_iter()
        .map(|(id, split)| (id.to_string(), split))
        .collect();

    let mut rng = StdRng::seed_from_u64(seed);
    for (subdataset, ids) in group_ids(entries) {
        let fractions = partition.fractions_for(subdataset).as_array();
        let targets = apportion(subdataset, ids.len(), fractions)?;
        let mut counts = [0usize; 3];
        let mut fresh = Vec::new();
        for id in shuffled(ids, &mut rng) {
            match assigned.get(id) {
                Some(split) => counts[split.index()] += 1,
                None => fresh.push(id),
            }
        }
        let n_fresh = fresh.len();
        let mut fresh = fresh.into_iter();
        for split in Split::ORDER {
            let deficit = targets[split.index()].saturating_sub(counts[split.index()]);
            for id in fresh.by_ref().take(deficit) {
                result.get_mut(split).push(id.to_string());
                assigned.insert(id.to_string(), split);
            }
        }
        let overflow: Vec<&str> = fresh.collect();
        if !overflow.is_empty() {
            let largest = Split::ORDER
                .into_iter()
                .max_by(|a, b| {
                    fractions[a.index()]
                        .total_cmp(&fractions[b.index()])
                        .then(b.index().cmp(&a.index()))
                })
                .unwrap_or(Split::Train);
            warn!(
                subdataset,
                count = overflow.len(),
                split = ?largest,
                "Existing assignments exceed targets, placing remaining ids in the largest split"
            );
            for id in overflow {
                result.get_mut(largest).push(id.to_string());
                assigned.insert(id.to_string(), largest);
            }
        }
        debug!(subdataset, new = n_fresh, ?targets, "Assigned subdataset ids");
    }
    Ok(result)
}

/// `k` folds over the molecule identities of `entries`, chunked per subdataset.
///
/// Fold `i` tests chunk `i`, validates on chunk `(i + 1) mod k` and trains on the rest.
pub fn k_fold_split_ids<'a>(
    entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    k: usize,
    seed: u64,
) -> Result<Vec<SplitIds>, DatasetError> {
    if k < 3 {
        return Err(DatasetError::FoldCount { k });
    }
    let mut folds = vec![SplitIds::default(); k];
    let mut rng = StdRng::seed_from_u64(seed);
    for (_, ids) in group_ids(entries) {
        let ids = shuffled(ids, &mut rng);
        let n = ids.len();
        let chunks: Vec<&[&str]> = (0..k).map(|c| &ids[c * n / k..(c + 1) * n / k]).collect();
        for (i, fold) in folds.iter_mut().enumerate() {
            let val = (i + 1) % k;
            for (c, chunk) in chunks.iter().enumerate() {
                let target = if c == i {
                    &mut fold.test
                } else if c == val {
                    &mut fold.val
                } else {
                    &mut fold.train
                };
                target.extend(chunk.iter().map(|id| id.to_string()));
            }
        }
    }
    Ok(folds)
}
