//! # Core Models Module
//!
//! Data structures describing a molecule and its derived representations.
//!
//! ## Key Components
//!
//! - [`ids`] - [`AtomId`](ids::AtomId), the stable atom identifier
//! - [`atom`] - Atoms and the element tables
//! - [`residue`] - Residue one-hot layout and standard side-chain charges
//! - [`topology`] - Structure descriptions delivered by topology resolvers
//! - [`molecule`] - [`Molecule`](molecule::Molecule), atoms plus derived interaction tuples
//! - [`features`] - Per-atom feature matrices
//! - [`graph`] - [`MolecularGraph`](graph::MolecularGraph), the position-indexed graph export

pub mod atom;
pub mod features;
pub mod graph;
pub mod ids;
pub mod molecule;
pub mod residue;
pub mod topology;
