use super::load_datasets;
use crate::cli::ManifestArgs;
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use tracing::info;

pub fn run(args: ManifestArgs, progress: &CliProgressHandler) -> Result<()> {
    let dataset = load_datasets(&args.inputs, progress)?;
    let manifest = dataset.manifest();
    manifest.save(&args.output)?;
    info!(
        path = %args.output.display(),
        rows = manifest.len(),
        "Wrote manifest"
    );
    println!(
        "{} records, {} conformations -> {}",
        manifest.len(),
        manifest.total_confs(),
        args.output.display()
    );
    Ok(())
}
