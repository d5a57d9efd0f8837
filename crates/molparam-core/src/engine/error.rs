use crate::core::forcefield::system::SystemError;
use crate::core::forcefield::template::TemplateError;
use crate::core::tuples::error::TupleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Force field template error: {source}")]
    Template {
        #[from]
        source: TemplateError,
    },

    #[error("Invalid classical system: {source}")]
    System {
        #[from]
        source: SystemError,
    },

    #[error("Invalid topology: {source}")]
    Topology {
        #[from]
        source: TupleError,
    },

    #[error("No topology is known for identifier '{identifier}'")]
    UnresolvedIdentifier { identifier: String },

    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}
