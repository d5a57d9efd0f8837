use super::config::ConfigError;
use crate::core::forcefield::parameters::ParameterError;
use crate::core::io::archive::ArchiveError;
use crate::core::io::codec::CodecError;
use crate::core::models::graph::GraphError;
use crate::core::models::molecule::MoleculeError;
use crate::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MolDataError {
    #[error(transparent)]
    Molecule(#[from] MoleculeError),

    #[error(transparent)]
    Parameters(#[from] ParameterError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Molecule '{mol_id}': '{key}' has shape {found:?}, expected {expected:?}")]
    Shape {
        mol_id: String,
        key: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Invalid mol_id '{value}': must be non-empty and not \"None\"")]
    InvalidMolId { value: String },

    #[error("Input is missing '{key}'")]
    MissingInput { key: &'static str },
}

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("Invalid partition: {reason}")]
    InvalidPartition { reason: String },

    #[error(
        "Subdataset '{subdataset}' has {n_ids} distinct molecules, but its partition needs at least {required}"
    )]
    PartitionInfeasible {
        subdataset: String,
        n_ids: usize,
        required: usize,
    },

    #[error("Molecule '{mol_id}' is assigned to more than one split")]
    Overlap { mol_id: String },

    #[error("Mask has {found} entries, but the dataset has {expected}")]
    MaskLength { expected: usize, found: usize },

    #[error("Subsample factor {factor} is outside [0, 1]")]
    SubsampleFactor { factor: f64 },

    #[error("k-fold splitting needs k >= 3, got {k}")]
    FoldCount { k: usize },

    #[error("Slice {start}..{stop} is out of range for {len} entries")]
    SliceRange {
        start: usize,
        stop: usize,
        len: usize,
    },

    #[error("Invalid sampling configuration: {reason}")]
    Sampling { reason: String },

    #[error("Failed to load '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: Box<MolDataError>,
    },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid dataset index '{path}': {reason}")]
    Index { path: PathBuf, reason: String },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("Failed to write manifest: {source}")]
    Manifest {
        #[from]
        source: csv::Error,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    MolData(#[from] MolDataError),
}
