use molparam::data::config::ConfigError;
use molparam::data::error::{DatasetError, MolDataError};
use molparam::engine::error::EngineError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    MolData(#[from] MolDataError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Options(#[from] ConfigError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
