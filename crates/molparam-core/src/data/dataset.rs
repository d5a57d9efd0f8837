use super::config::{SamplingConfig, SplitConfig};
use super::error::{DatasetError, MolDataError};
use super::manifest::{Manifest, ManifestRow};
use super::moldata::MolData;
use super::progress::{Progress, ProgressReporter};
use super::sampling::{self, WeightedSampler};
use super::split::{self, Split, SplitIds};
use crate::core::io::archive;
use crate::core::io::traits::ArrayArchive;
use crate::core::models::features::{CHARGE_MODEL, IS_RADICAL, MAX_NUM_CHARGE_MODELS};
use crate::core::models::graph::MolecularGraph;
use ndarray::{Array2, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Name of the index written by [`Dataset::save`] next to the entry archives.
pub const INDEX_FILE: &str = "dataset.toml";

#[derive(Debug, Serialize, Deserialize)]
struct DatasetIndex {
    entries: Vec<IndexRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRow {
    file: String,
    mol_id: String,
    subdataset: String,
    digest: String,
}

/// A molecule in training form, tagged with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetEntry {
    pub graph: MolecularGraph,
    pub mol_id: String,
    pub subdataset: String,
    pub digest: String,
}

impl DatasetEntry {
    pub fn from_moldata(data: &MolData, subdataset: impl Into<String>) -> Result<Self, MolDataError> {
        Ok(Self {
            graph: data.to_graph()?,
            mol_id: data.mol_id().to_string(),
            subdataset: subdataset.into(),
            digest: data.content_digest()?,
        })
    }
}

/// An ordered collection of molecule graphs with split, selection and sampling operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    entries: Vec<DatasetEntry>,
}

impl Dataset {
    pub fn new(entries: Vec<DatasetEntry>) -> Self {
        Self { entries }
    }

    pub fn from_moldata(data: &[MolData], subdataset: &str) -> Result<Self, DatasetError> {
        let entries = data
            .iter()
            .map(|d| DatasetEntry::from_moldata(d, subdataset))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Loads every `.npz` file directly inside `dir` as one subdataset named after the
    /// directory. Files are read in parallel; entries keep the sorted file order.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load_dir(dir: &Path, reporter: &ProgressReporter) -> Result<Self, DatasetError> {
        let io_error = |source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut files = Vec::new();
        for item in std::fs::read_dir(dir).map_err(io_error)? {
            let path = item.map_err(io_error)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "npz") {
                files.push(path);
            }
        }
        files.sort();

        let subdataset = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "default".to_string());
        reporter.report(Progress::LoadStart {
            subdataset: subdataset.clone(),
            total_files: files.len() as u64,
        });

        let load = |path: &PathBuf| -> Result<DatasetEntry, DatasetError> {
            let failed = |e: MolDataError| DatasetError::Load {
                path: path.clone(),
                source: Box::new(e),
            };
            let data = MolData::load(path).map_err(failed)?;
            let entry = DatasetEntry::from_moldata(&data, subdataset.as_str()).map_err(failed)?;
            reporter.report(Progress::FileLoaded { path: path.clone() });
            Ok(entry)
        };
        let entries = files
            .par_iter()
            .map(load)
            .collect::<Result<Vec<_>, _>>()?;

        reporter.report(Progress::LoadFinish {
            loaded: entries.len(),
        });
        info!(%subdataset, entries = entries.len(), "Loaded dataset directory");
        Ok(Self { entries })
    }

    /// Writes one graph archive per entry into `dir` plus an [`INDEX_FILE`] holding the
    /// entry order, mol ids, subdataset labels and digests.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn save(&self, dir: &Path) -> Result<(), DatasetError> {
        std::fs::create_dir_all(dir).map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let rows: Vec<IndexRow> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| IndexRow {
                file: format!("{:06}.npz", i),
                mol_id: e.mol_id.clone(),
                subdataset: e.subdataset.clone(),
                digest: e.digest.clone(),
            })
            .collect();
        self.entries
            .par_iter()
            .zip(rows.par_iter())
            .try_for_each(|(entry, row)| -> Result<(), DatasetError> {
                archive::write_npz(&dir.join(&row.file), &entry.graph.to_dict()?)?;
                Ok(())
            })?;

        let path = dir.join(INDEX_FILE);
        let index_error = |reason: String| DatasetError::Index {
            path: path.clone(),
            reason,
        };
        let io_error = |source| DatasetError::Io {
            path: path.clone(),
            source,
        };
        let content = toml::to_string(&DatasetIndex { entries: rows })
            .map_err(|e| index_error(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
        tmp.write_all(content.as_bytes()).map_err(io_error)?;
        tmp.persist(&path).map_err(|e| io_error(e.error))?;
        info!(entries = self.len(), "Saved dataset");
        Ok(())
    }

    /// Reads a dataset written by [`Dataset::save`]. Archives not listed in the index are
    /// ignored.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self, DatasetError> {
        let path = dir.join(INDEX_FILE);
        let content = std::fs::read_to_string(&path).map_err(|source| DatasetError::Io {
            path: path.clone(),
            source,
        })?;
        let index: DatasetIndex = toml::from_str(&content).map_err(|e| DatasetError::Index {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let entries = index
            .entries
            .into_par_iter()
            .map(|row| -> Result<DatasetEntry, DatasetError> {
                let dict = archive::read_npz(&dir.join(&row.file))?;
                Ok(DatasetEntry {
                    graph: MolecularGraph::from_dict(dict)?,
                    mol_id: row.mol_id,
                    subdataset: row.subdataset,
                    digest: row.digest,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(entries = entries.len(), "Loaded dataset");
        Ok(Self { entries })
    }

    pub fn concatenate(datasets: impl IntoIterator<Item = Dataset>) -> Self {
        Self {
            entries: datasets.into_iter().flat_map(|d| d.entries).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DatasetEntry> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DatasetEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[DatasetEntry] {
        &self.entries
    }

    pub fn subdatasets(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.subdataset.as_str()).collect()
    }

    fn id_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.mol_id.as_str(), e.subdataset.as_str()))
    }

    /// Split ids for this dataset's molecules, see [`split::calc_split_ids`].
    pub fn calc_split_ids(
        &self,
        config: &SplitConfig,
        existing: Option<&SplitIds>,
    ) -> Result<SplitIds, DatasetError> {
        split::calc_split_ids(self.id_pairs(), &config.partition, config.seed, existing)
    }

    pub fn k_fold_split_ids(&self, k: usize, seed: u64) -> Result<Vec<SplitIds>, DatasetError> {
        split::k_fold_split_ids(self.id_pairs(), k, seed)
    }

    /// Train, validation and test datasets. Entries whose mol_id is in neither the train
    /// nor the validation list go to the test set.
    pub fn split(
        &self,
        ids: &SplitIds,
        check_overlap: bool,
    ) -> Result<(Dataset, Dataset, Dataset), DatasetError> {
        if check_overlap {
            ids.check_disjoint()?;
        }
        let assignment = ids.assignment();
        let (mut train, mut val, mut test) = (Vec::new(), Vec::new(), Vec::new());
        for entry in &self.entries {
            match assignment.get(entry.mol_id.as_str()) {
                Some(Split::Train) => train.push(entry.clone()),
                Some(Split::Val) => val.push(entry.clone()),
                _ => test.push(entry.clone()),
            }
        }
        debug!(
            train = train.len(),
            val = val.len(),
            test = test.len(),
            "Split dataset"
        );
        Ok((Self::new(train), Self::new(val), Self::new(test)))
    }

    pub fn slice(&self, start: usize, stop: usize) -> Result<Self, DatasetError> {
        if start > stop || stop > self.len() {
            return Err(DatasetError::SliceRange {
                start,
                stop,
                len: self.len(),
            });
        }
        Ok(Self::new(self.entries[start..stop].to_vec()))
    }

    pub fn where_mask(&self, mask: &[bool]) -> Result<Self, DatasetError> {
        if mask.len() != self.len() {
            return Err(DatasetError::MaskLength {
                expected: self.len(),
                found: mask.len(),
            });
        }
        Ok(Self::new(
            self.entries
                .iter()
                .zip(mask)
                .filter(|(_, keep)| **keep)
                .map(|(entry, _)| entry.clone())
                .collect(),
        ))
    }

    pub fn shuffle(&mut self, seed: u64) {
        self.entries.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    /// A random `floor(factor * len)` of the entries, in their original order.
    pub fn subsampled(&self, factor: f64, seed: u64) -> Result<Self, DatasetError> {
        if !(0.0..=1.0).contains(&factor) {
            return Err(DatasetError::SubsampleFactor { factor });
        }
        let amount = ((self.len() as f64) * factor).floor() as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = index::sample(&mut rng, self.len(), amount.min(self.len())).into_vec();
        picked.sort_unstable();
        Ok(Self::new(
            picked.into_iter().map(|i| self.entries[i].clone()).collect(),
        ))
    }

    /// Aligns the atom features of all entries and returns the names of removed features.
    ///
    /// With `create_feats`, missing default features are created first (`is_radical` as
    /// zeros). Charge-model encodings are zero-padded to [`MAX_NUM_CHARGE_MODELS`] columns.
    /// Then every feature that is missing in some entry, or whose width differs between
    /// entries, is removed everywhere.
    pub fn remove_uncommon_features(&mut self, create_feats: bool) -> BTreeSet<String> {
        for entry in &mut self.entries {
            let n = entry.graph.n_atoms();
            let features = &mut entry.graph.atom_features;
            if create_feats {
                features
                    .entry(IS_RADICAL.to_string())
                    .or_insert_with(|| Array2::zeros((n, 1)));
            }
            if let Some(onehot) = features.get_mut(CHARGE_MODEL) {
                if onehot.ncols() < MAX_NUM_CHARGE_MODELS {
                    let mut padded = Array2::zeros((n, MAX_NUM_CHARGE_MODELS));
                    padded.slice_mut(s![.., ..onehot.ncols()]).assign(&*onehot);
                    *onehot = padded;
                }
            }
        }

        // name -> (entries carrying it, widths seen)
        let mut seen: BTreeMap<&str, (usize, BTreeSet<usize>)> = BTreeMap::new();
        for entry in &self.entries {
            for (name, values) in &entry.graph.atom_features {
                let slot = seen.entry(name.as_str()).or_default();
                slot.0 += 1;
                slot.1.insert(values.ncols());
            }
        }
        let removed: BTreeSet<String> = seen
            .into_iter()
            .filter(|(_, (count, widths))| *count != self.entries.len() || widths.len() > 1)
            .map(|(name, _)| name.to_string())
            .collect();
        if !removed.is_empty() {
            for entry in &mut self.entries {
                entry
                    .graph
                    .atom_features
                    .retain(|name, _| !removed.contains(name));
            }
            info!(removed = ?removed, "Removed features not shared by all entries");
        }
        removed
    }

    pub fn sampling_weights(&self, config: &SamplingConfig) -> Result<Vec<f64>, DatasetError> {
        let subdatasets: Vec<&str> = self.entries.iter().map(|e| e.subdataset.as_str()).collect();
        sampling::sampling_weights(&subdatasets, config)
    }

    pub fn sampler(&self, config: &SamplingConfig, seed: u64) -> Result<WeightedSampler, DatasetError> {
        WeightedSampler::new(&self.sampling_weights(config)?, seed)
    }

    pub fn manifest(&self) -> Manifest {
        Manifest::new(
            self.entries
                .iter()
                .map(|e| ManifestRow {
                    mol_id: e.mol_id.clone(),
                    subdataset: e.subdataset.clone(),
                    n_atoms: e.graph.n_atoms(),
                    n_confs: e.graph.n_confs(),
                    digest: e.digest.clone(),
                })
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a DatasetEntry;
    type IntoIter = std::slice::Iter<'a, DatasetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
