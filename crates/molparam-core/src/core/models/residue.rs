use phf::{Map, phf_map};

/// Residue names with a dedicated one-hot column; anything else falls into the final
/// "unknown" column.
pub const RESIDUES: [&str; 25] = [
    "ALA", "ARG", "ASN", "ASP", "CYS", "GLN", "GLU", "GLY", "HIS", "ILE", "LEU", "LYS", "MET",
    "PHE", "PRO", "SER", "THR", "TRP", "TYR", "VAL", "HIE", "HID", "HIP", "ACE", "NME",
];

/// Width of the residue one-hot encoding (named residues plus the unknown slot).
pub const RESIDUE_ENCODING_WIDTH: usize = RESIDUES.len() + 1;

static RESIDUE_INDEX: Map<&'static str, usize> = phf_map! {
    "ALA" => 0, "ARG" => 1, "ASN" => 2, "ASP" => 3, "CYS" => 4, "GLN" => 5, "GLU" => 6,
    "GLY" => 7, "HIS" => 8, "ILE" => 9, "LEU" => 10, "LYS" => 11, "MET" => 12, "PHE" => 13,
    "PRO" => 14, "SER" => 15, "THR" => 16, "TRP" => 17, "TYR" => 18, "VAL" => 19,
    "HIE" => 20, "HID" => 21, "HIP" => 22, "ACE" => 23, "NME" => 24,
};

// Keyed by "RESIDUE ATOM".
static STANDARD_CHARGES: Map<&'static str, i32> = phf_map! {
    "GLU OE1" => -1,
    "ASP OD1" => -1,
    "LYS NZ" => 1,
    "ARG NH1" => 1,
    "HIS ND1" => 1,
    "HIE ND1" => 1,
};

/// Column of `residue` in the one-hot encoding.
pub fn residue_index(residue: &str) -> usize {
    RESIDUE_INDEX
        .get(residue.trim().to_ascii_uppercase().as_str())
        .copied()
        .unwrap_or(RESIDUES.len())
}

/// Formal charge assigned to charged side-chain atoms when the structure carries no
/// charge information of its own.
pub fn standard_formal_charge(residue: &str, atom_name: &str) -> i32 {
    let key = format!(
        "{} {}",
        residue.trim().to_ascii_uppercase(),
        atom_name.trim().to_ascii_uppercase()
    );
    STANDARD_CHARGES.get(key.as_str()).copied().unwrap_or(0)
}
