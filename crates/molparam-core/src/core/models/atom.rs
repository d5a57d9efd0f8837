use super::ids::AtomId;
use phf::{Map, phf_map};

static ELEMENT_MASSES: Map<u8, f64> = phf_map! {
    1u8 => 1.008, 3u8 => 6.94, 5u8 => 10.81, 6u8 => 12.011, 7u8 => 14.007, 8u8 => 15.999,
    9u8 => 18.998, 11u8 => 22.990, 12u8 => 24.305, 14u8 => 28.085, 15u8 => 30.974,
    16u8 => 32.06, 17u8 => 35.45, 19u8 => 39.098, 20u8 => 40.078, 26u8 => 55.845,
    29u8 => 63.546, 30u8 => 65.38, 34u8 => 78.971, 35u8 => 79.904, 53u8 => 126.904,
};

static ELEMENT_SYMBOLS: Map<&'static str, u8> = phf_map! {
    "H" => 1, "Li" => 3, "B" => 5, "C" => 6, "N" => 7, "O" => 8, "F" => 9, "Na" => 11,
    "Mg" => 12, "Si" => 14, "P" => 15, "S" => 16, "Cl" => 17, "K" => 19, "Ca" => 20,
    "Fe" => 26, "Cu" => 29, "Zn" => 30, "Se" => 34, "Br" => 35, "I" => 53,
};

/// Standard atomic mass in Daltons, or `None` for elements outside the table.
pub fn element_mass(atomic_number: u8) -> Option<f64> {
    ELEMENT_MASSES.get(&atomic_number).copied()
}

/// Atomic number for an element symbol such as `"C"` or `"Cl"`.
pub fn atomic_number_from_symbol(symbol: &str) -> Option<u8> {
    let symbol = symbol.trim();
    if let Some(z) = ELEMENT_SYMBOLS.get(symbol) {
        return Some(*z);
    }
    let mut chars = symbol.chars();
    let normalized: String = match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => return None,
    };
    ELEMENT_SYMBOLS.get(normalized.as_str()).copied()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub id: AtomId,
    pub atomic_number: u8,
    pub formal_charge: i32,
    pub name: Option<String>,    // Atom name from the source structure (e.g., "CA")
    pub residue: Option<String>, // Residue name (e.g., "ALA")
    pub is_radical: bool,
}

impl Atom {
    pub fn new(id: AtomId, atomic_number: u8) -> Self {
        Self {
            id,
            atomic_number,
            formal_charge: 0,
            name: None,
            residue: None,
            is_radical: false,
        }
    }

    pub fn with_formal_charge(mut self, charge: i32) -> Self {
        self.formal_charge = charge;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_residue(mut self, residue: impl Into<String>) -> Self {
        self.residue = Some(residue.into());
        self
    }

    pub fn with_radical(mut self, is_radical: bool) -> Self {
        self.is_radical = is_radical;
        self
    }

    /// Mass from the element table; unknown elements report 0.
    pub fn mass(&self) -> f64 {
        element_mass(self.atomic_number).unwrap_or(0.0)
    }
}
