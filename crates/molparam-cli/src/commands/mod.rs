pub mod inspect;
pub mod manifest;
pub mod split;

use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use molparam::data::dataset::Dataset;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

/// Loads each directory as its own subdataset and concatenates them in argument order.
pub(crate) fn load_datasets(inputs: &[PathBuf], progress: &CliProgressHandler) -> Result<Dataset> {
    let mut names = BTreeSet::new();
    for dir in inputs {
        if !dir.is_dir() {
            return Err(CliError::Argument(format!(
                "'{}' is not a directory",
                dir.display()
            )));
        }
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !names.insert(name.clone()) {
            return Err(CliError::Argument(format!(
                "two input directories are both named '{}'",
                name
            )));
        }
    }

    let reporter = progress.reporter();
    let datasets = inputs
        .iter()
        .map(|dir| Dataset::load_dir(dir, &reporter))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let dataset = Dataset::concatenate(datasets);
    info!(
        entries = dataset.len(),
        subdatasets = names.len(),
        "Loaded input directories"
    );
    Ok(dataset)
}


#[cfg(test)]
mod tests {
    use super::*;
    use indicatif::ProgressDrawTarget;
    use tempfile::tempdir;

    fn hidden() -> CliProgressHandler {
        CliProgressHandler::with_draw_target(ProgressDrawTarget::hidden())
    }

    #[test]
    fn directories_become_subdatasets() {
        let root = tempdir().unwrap();
        let spice = root.path().join("spice");
        let gas = root.path().join("gas");
        fixtures::write_subdataset(&spice, &["CC", "CO", "CN"]);
        fixtures::write_subdataset(&gas, &["O"]);

        let dataset = load_datasets(&[spice, gas], &hidden()).unwrap();
        assert_eq!(dataset.len(), 4);
        assert_eq!(
            dataset.subdatasets().into_iter().collect::<Vec<_>>(),
            vec!["gas", "spice"]
        );
        assert_eq!(dataset.get(3).unwrap().subdataset, "gas");
    }

    #[test]
    fn duplicate_directory_names_are_rejected() {
        let root = tempdir().unwrap();
        let a = root.path().join("a").join("spice");
        let b = root.path().join("b").join("spice");
        fixtures::write_subdataset(&a, &["CC"]);
        fixtures::write_subdataset(&b, &["CO"]);
        assert!(matches!(
            load_datasets(&[a, b], &hidden()),
            Err(CliError::Argument(_))
        ));
    }

    #[test]
    fn missing_directory_is_an_argument_error() {
        let root = tempdir().unwrap();
        assert!(matches!(
            load_datasets(&[root.path().join("absent")], &hidden()),
            Err(CliError::Argument(_))
        ));
    }
}
