use crate::cli::InspectArgs;
use crate::error::Result;
use molparam::core::io::traits::ArrayArchive;
use molparam::data::moldata::MolData;
use std::fmt::Write;
use tracing::info;

pub fn run(args: InspectArgs) -> Result<()> {
    info!(path = %args.input.display(), "Inspecting record");
    let data = MolData::load(&args.input)?;
    print!("{}", render(&data, args.features)?);
    Ok(())
}

/// Human-readable summary of a record.
pub fn render(data: &MolData, with_features: bool) -> Result<String> {
    let molecule = data.molecule();
    let params = data.parameters();
    let mut out = String::new();

    // Writing to a String cannot fail.
    let _ = writeln!(out, "mol_id:          {}", data.mol_id());
    let _ = writeln!(out, "atoms:           {}", data.n_atoms());
    let _ = writeln!(out, "conformations:   {}", data.n_confs());
    let _ = writeln!(
        out,
        "tuples:          {} bonds, {} angles, {} propers, {} impropers",
        molecule.bonds().len(),
        molecule.angles().len(),
        molecule.propers().len(),
        molecule.impropers().len()
    );
    let _ = writeln!(
        out,
        "parameters:      {}",
        if params.is_nan_filled() {
            "unavailable (nan-filled)"
        } else {
            "extracted"
        }
    );
    let _ = writeln!(
        out,
        "charge model:    {}",
        molecule.charge_model().unwrap_or("-")
    );

    let identifiers = data.identifiers();
    for (label, value) in [
        ("mapped_smiles", &identifiers.mapped_smiles),
        ("smiles", &identifiers.smiles),
        ("pdb", &identifiers.pdb),
        ("sequence", &identifiers.sequence),
    ] {
        if let Some(value) = value {
            let _ = writeln!(out, "{:<17}{}", format!("{}:", label), value);
        }
    }

    let names: Vec<&str> = data.ff_names().collect();
    let _ = writeln!(
        out,
        "forcefields:     {}",
        if names.is_empty() {
            "-".to_string()
        } else {
            names.join(", ")
        }
    );
    let _ = writeln!(
        out,
        "improper ref:    {}",
        if data.improper_ref().is_some() { "yes" } else { "no" }
    );
    let energy = data.energy_ref();
    if let (Some(min), Some(max)) = (
        energy.iter().copied().reduce(f64::min),
        energy.iter().copied().reduce(f64::max),
    ) {
        let _ = writeln!(out, "energy_ref range: [{:.6}, {:.6}]", min, max);
    }
    let _ = writeln!(out, "digest:          {}", data.content_digest()?);

    if with_features {
        let graph = data.to_graph()?;
        let _ = writeln!(out, "atom features:");
        for (name, values) in &graph.atom_features {
            let _ = writeln!(out, "  {:<20} {}", name, values.ncols());
        }
    }
    Ok(out)
}
