use super::load_datasets;
use crate::cli::SplitArgs;
use crate::config::PartialSplitConfig;
use crate::error::{CliError, Result};
use crate::utils::progress::CliProgressHandler;
use molparam::data::config::SamplingConfig;
use molparam::data::dataset::Dataset;
use molparam::data::split::{Split, SplitIds};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

pub fn run(args: SplitArgs, progress: &CliProgressHandler) -> Result<()> {
    let partial = match &args.config {
        Some(path) => PartialSplitConfig::from_file(path)?,
        None => PartialSplitConfig::default(),
    };
    let (split_config, sampling) = partial.merge_with_cli(&args)?;

    let dataset = load_datasets(&args.inputs, progress)?;
    if dataset.is_empty() {
        return Err(CliError::Argument(
            "the input directories contain no records".to_string(),
        ));
    }

    if let Some(k) = args.folds {
        let folds = dataset.k_fold_split_ids(k, split_config.seed)?;
        for (i, ids) in folds.iter().enumerate() {
            let path = fold_path(&args.output, i);
            write_ids(&path, ids)?;
            info!(fold = i, path = %path.display(), "Wrote fold");
        }
        println!("Wrote {} folds next to {}", folds.len(), args.output.display());
        return Ok(());
    }

    let existing = args.existing.as_deref().map(read_ids).transpose()?;
    let ids = dataset.calc_split_ids(&split_config, existing.as_ref())?;
    write_ids(&args.output, &ids)?;
    info!(path = %args.output.display(), molecules = ids.len(), "Wrote split ids");

    print!("{}", summary(&dataset, &ids, &sampling)?);
    Ok(())
}

pub fn read_ids(path: &Path) -> Result<SplitIds> {
    let content = std::fs::read_to_string(path).map_err(|e| CliError::io(path, e))?;
    toml::from_str(&content)
        .map_err(|e| CliError::Config(format!("Failed to parse '{}': {}", path.display(), e)))
}

/// Serializes `ids` as TOML and moves it into place in one step.
pub fn write_ids(path: &Path, ids: &SplitIds) -> Result<()> {
    let content = toml::to_string(ids)
        .map_err(|e| CliError::Other(anyhow::anyhow!("Failed to serialize split ids: {}", e)))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| CliError::io(dir, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| CliError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| CliError::io(path, e.error))?;
    Ok(())
}

/// `ids.toml` becomes `ids.fold0.toml`, `ids.fold1.toml`, ...
fn fold_path(output: &Path, fold: usize) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "split".to_string());
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "toml".to_string());
    output.with_file_name(format!("{}.fold{}.{}", stem, fold, ext))
}

/// Entry counts per split and subdataset, and the share of training draws each subdataset
/// receives under `sampling`.
fn summary(dataset: &Dataset, ids: &SplitIds, sampling: &SamplingConfig) -> Result<String> {
    let (train, val, test) = dataset.split(ids, false)?;
    let mut table: BTreeMap<&str, [usize; 3]> = BTreeMap::new();
    for (split, part) in Split::ORDER.iter().zip([&train, &val, &test]) {
        for entry in part {
            table.entry(entry.subdataset.as_str()).or_default()[split.index()] += 1;
        }
    }

    let mut mass: BTreeMap<&str, f64> = BTreeMap::new();
    if !train.is_empty() {
        match train.sampling_weights(sampling) {
            Ok(weights) => {
                for (entry, w) in train.iter().zip(weights) {
                    *mass.entry(entry.subdataset.as_str()).or_default() += w;
                }
            }
            Err(e) => warn!(error = %e, "Training sampling weights are unavailable"),
        }
    }

    let mut out = format!(
        "{:<24}{:>8}{:>8}{:>8}{:>12}\n",
        "subdataset", "train", "val", "test", "draw share"
    );
    for (sub, counts) in &table {
        let share = mass
            .get(sub)
            .map(|m| format!("{:.3}", m))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<24}{:>8}{:>8}{:>8}{:>12}\n",
            sub, counts[0], counts[1], counts[2], share
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::commands::fixtures;
    use clap::Parser;
    use indicatif::ProgressDrawTarget;
    use std::fs;
    use tempfile::tempdir;

    fn hidden() -> CliProgressHandler {
        CliProgressHandler::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn args(argv: &[&str]) -> SplitArgs {
        let mut full = vec!["molparam", "split"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Split(args) => args,
            _ => panic!("expected the split subcommand"),
        }
    }

    fn ten_molecules(root: &Path) -> PathBuf {
        let dir = root.join("spice");
        let ids: Vec<String> = (0..10).map(|i| format!("m{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        fixtures::write_subdataset(&dir, &refs);
        dir
    }

    #[test]
    fn split_ids_are_written_and_reproducible() {
        let root = tempdir().unwrap();
        let dir = ten_molecules(root.path());
        let out_a = root.path().join("a.toml");
        let out_b = root.path().join("b.toml");
        for out in [&out_a, &out_b] {
            let argv = [dir.to_str().unwrap(), "-o", out.to_str().unwrap(), "--seed", "5"];
            run(args(&argv), &hidden()).unwrap();
        }
        let ids = read_ids(&out_a).unwrap();
        assert_eq!(ids, read_ids(&out_b).unwrap());
        assert_eq!(ids.get(Split::Train).len(), 8);
        assert_eq!(ids.get(Split::Val).len(), 1);
        assert_eq!(ids.get(Split::Test).len(), 1);
        ids.check_disjoint().unwrap();
    }

    #[test]
    fn existing_assignments_are_kept() {
        let root = tempdir().unwrap();
        let dir = ten_molecules(root.path());
        let existing = SplitIds {
            train: vec![],
            val: vec!["m0".into(), "m1".into()],
            test: vec![],
        };
        let existing_path = root.path().join("old.toml");
        write_ids(&existing_path, &existing).unwrap();

        let out = root.path().join("new.toml");
        let argv = [
            dir.to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
            "--existing",
            existing_path.to_str().unwrap(),
        ];
        run(args(&argv), &hidden()).unwrap();
        let ids = read_ids(&out).unwrap();
        assert!(ids.get(Split::Val).contains(&"m0".to_string()));
        assert!(ids.get(Split::Val).contains(&"m1".to_string()));
        assert_eq!(ids.len(), 10);
    }

    #[test]
    fn folds_are_written_next_to_the_output() {
        let root = tempdir().unwrap();
        let dir = ten_molecules(root.path());
        let out = root.path().join("ids.toml");
        let argv = [dir.to_str().unwrap(), "-o", out.to_str().unwrap(), "--folds", "5"];
        run(args(&argv), &hidden()).unwrap();
        for i in 0..5 {
            let fold = read_ids(&root.path().join(format!("ids.fold{}.toml", i))).unwrap();
            assert_eq!(fold.len(), 10);
        }
        assert!(!out.exists());
    }

    #[test]
    fn fold_paths_keep_the_directory_and_extension() {
        assert_eq!(
            fold_path(Path::new("out/ids.toml"), 2),
            PathBuf::from("out/ids.fold2.toml")
        );
        assert_eq!(fold_path(Path::new("ids"), 0), PathBuf::from("ids.fold0.toml"));
    }

    #[test]
    fn malformed_existing_file_is_a_config_error() {
        let root = tempdir().unwrap();
        let path = root.path().join("bad.toml");
        fs::write(&path, "train = 3").unwrap();
        assert!(matches!(read_ids(&path), Err(CliError::Config(_))));
    }

    #[test]
    fn invalid_fractions_leave_no_output() {
        let root = tempdir().unwrap();
        let dir = ten_molecules(root.path());
        let out = root.path().join("ids.toml");
        let argv = [dir.to_str().unwrap(), "-o", out.to_str().unwrap(), "--train", "0.95"];
        assert!(run(args(&argv), &hidden()).is_err());
        assert!(!out.exists());
    }
}
