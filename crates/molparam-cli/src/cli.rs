use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "molparam developers",
    version,
    about = "molparam CLI - inspect, split and index conformational datasets of parameterized molecules.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads used to load datasets.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print a summary of a single molecule record (.npz).
    Inspect(InspectArgs),
    /// Assign molecule ids of one or more dataset directories to train/val/test splits.
    Split(SplitArgs),
    /// Write a CSV manifest of every record in one or more dataset directories.
    Manifest(ManifestArgs),
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Path to the record archive.
    #[arg(value_name = "PATH")]
    pub input: PathBuf,

    /// Also list the graph features and their widths.
    #[arg(long)]
    pub features: bool,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    /// Dataset directories; each one is a subdataset named after the directory.
    #[arg(required = true, value_name = "DIR")]
    pub inputs: Vec<PathBuf>,

    /// Split configuration in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Where to write the split ids (TOML).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Previously written split ids; only molecules missing from it are assigned.
    #[arg(long, value_name = "PATH", conflicts_with = "folds")]
    pub existing: Option<PathBuf>,

    /// Override the seed from the config file.
    #[arg(short, long, value_name = "INT")]
    pub seed: Option<u64>,

    /// Override the global training fraction.
    #[arg(long, value_name = "FLOAT")]
    pub train: Option<f64>,

    /// Override the global validation fraction.
    #[arg(long, value_name = "FLOAT")]
    pub val: Option<f64>,

    /// Override the global test fraction.
    #[arg(long, value_name = "FLOAT")]
    pub test: Option<f64>,

    /// Override the sampling balance factor used for the training summary.
    #[arg(long, value_name = "FLOAT")]
    pub balance_factor: Option<f64>,

    /// Write K cross-validation folds instead of a single split.
    /// Fold `i` is written next to the output as `<stem>.fold<i>.toml`.
    #[arg(long, value_name = "K")]
    pub folds: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Dataset directories; each one is a subdataset named after the directory.
    #[arg(required = true, value_name = "DIR")]
    pub inputs: Vec<PathBuf>,

    /// Where to write the manifest (CSV).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_arguments_parse_with_overrides() {
        let cli = Cli::parse_from([
            "molparam", "-vv", "split", "data/spice", "data/gas", "-o", "ids.toml", "--seed", "7",
            "--train", "0.9", "--val", "0.1", "--test", "0.0",
        ]);
        assert_eq!(cli.verbose, 2);
        let Commands::Split(args) = cli.command else {
            panic!("expected the split subcommand");
        };
        assert_eq!(args.inputs.len(), 2);
        assert_eq!(args.seed, Some(7));
        assert_eq!(args.train, Some(0.9));
        assert_eq!(args.test, Some(0.0));
        assert!(args.config.is_none());
    }

    #[test]
    fn existing_ids_conflict_with_folds() {
        let result = Cli::try_parse_from([
            "molparam", "split", "d", "-o", "ids.toml", "--existing", "old.toml", "--folds", "5",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["molparam", "-q", "-v", "inspect", "a.npz"]);
        assert!(result.is_err());
        let cli = Cli::parse_from(["molparam", "-j", "4", "manifest", "d", "-o", "m.csv"]);
        assert_eq!(cli.threads, Some(4));
    }
}
