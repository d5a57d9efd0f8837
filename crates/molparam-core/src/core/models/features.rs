//! Per-atom feature matrices derived from atoms and connectivity.
//!
//! Every function returns an `(n_atoms, k)` matrix whose rows follow the atom order of the
//! molecule.

use super::atom::Atom;
use super::residue::{RESIDUE_ENCODING_WIDTH, residue_index};
use crate::core::tuples::graph::ConnectivityGraph;
use ndarray::Array2;

pub const RING_ENCODING: &str = "ring_encoding";
pub const DEGREE: &str = "degree";
pub const MASS: &str = "mass";
pub const FORMAL_CHARGE: &str = "formal_charge";
pub const IS_RADICAL: &str = "is_radical";
pub const RESIDUE: &str = "residue";
pub const ATOMIC_NUMBER: &str = "atomic_number";
pub const PARTIAL_CHARGE: &str = "partial_charge";
pub const CHARGE_MODEL: &str = "charge_model";

/// Smallest and largest ring size with a dedicated column.
pub const RING_SIZES: std::ops::RangeInclusive<usize> = 3..=8;
pub const MAX_DEGREE: usize = 6;
/// Elements up to iodine get their own one-hot column.
pub const MAX_ELEMENT: usize = 53;

/// Charge models with a one-hot column, in column order.
pub const CHARGE_MODELS: [&str; 2] = ["amber99", "am1BCC"];
/// Width the charge-model encoding is padded to when graphs of a dataset are aligned.
pub const MAX_NUM_CHARGE_MODELS: usize = 8;

/// Column 0 marks atoms outside any ring; column `s - 2` marks membership in a ring of size `s`.
pub fn ring_encoding(graph: &ConnectivityGraph) -> Array2<f64> {
    let max_size = *RING_SIZES.end();
    let width = RING_SIZES.count() + 1;
    let mut out = Array2::zeros((graph.len(), width));
    for (row, &atom) in graph.atoms().iter().enumerate() {
        let mut in_ring = false;
        for &neighbor in graph.neighbors(atom) {
            if let Some(size) = graph.smallest_ring_through(atom, neighbor, max_size) {
                out[[row, size - 2]] = 1.0;
                in_ring = true;
            }
        }
        if !in_ring {
            out[[row, 0]] = 1.0;
        }
    }
    out
}

/// One-hot of the bond count, clamped to [`MAX_DEGREE`].
pub fn degree_one_hot(graph: &ConnectivityGraph) -> Array2<f64> {
    let mut out = Array2::zeros((graph.len(), MAX_DEGREE + 1));
    for (row, &atom) in graph.atoms().iter().enumerate() {
        out[[row, graph.degree(atom).min(MAX_DEGREE)]] = 1.0;
    }
    out
}

pub fn mass(atoms: &[Atom]) -> Array2<f64> {
    column(atoms.iter().map(Atom::mass))
}

pub fn formal_charge(atoms: &[Atom]) -> Array2<f64> {
    column(atoms.iter().map(|a| f64::from(a.formal_charge)))
}

pub fn is_radical(atoms: &[Atom]) -> Array2<f64> {
    column(atoms.iter().map(|a| if a.is_radical { 1.0 } else { 0.0 }))
}

pub fn residue_one_hot(atoms: &[Atom]) -> Array2<f64> {
    let mut out = Array2::zeros((atoms.len(), RESIDUE_ENCODING_WIDTH));
    for (row, atom) in atoms.iter().enumerate() {
        let col = atom
            .residue
            .as_deref()
            .map(residue_index)
            .unwrap_or(RESIDUE_ENCODING_WIDTH - 1);
        out[[row, col]] = 1.0;
    }
    out
}

/// Element one-hot; column `z - 1` for atomic number `z`, elements beyond the table share
/// the last column.
pub fn atomic_number_one_hot(atoms: &[Atom]) -> Array2<f64> {
    let mut out = Array2::zeros((atoms.len(), MAX_ELEMENT));
    for (row, atom) in atoms.iter().enumerate() {
        let col = usize::from(atom.atomic_number.max(1)).min(MAX_ELEMENT) - 1;
        out[[row, col]] = 1.0;
    }
    out
}

/// Same one-hot row for every atom, or `None` for a model outside [`CHARGE_MODELS`].
pub fn charge_model_one_hot(tag: &str, n_atoms: usize) -> Option<Array2<f64>> {
    let col = CHARGE_MODELS.iter().position(|m| *m == tag)?;
    let mut out = Array2::zeros((n_atoms, CHARGE_MODELS.len()));
    out.column_mut(col).fill(1.0);
    Some(out)
}

fn column(values: impl Iterator<Item = f64>) -> Array2<f64> {
    let values: Vec<f64> = values.collect();
    let n = values.len();
    Array2::from_shape_vec((n, 1), values).unwrap_or_else(|_| Array2::zeros((n, 1)))
}
