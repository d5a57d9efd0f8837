//! # Core Module
//!
//! Stateless data models and numerics shared by the engine and data layers.
//!
//! - **Interaction tuples** ([`tuples`]) - Bond graph and symmetry-reduced tuple enumeration
//! - **Molecular representation** ([`models`]) - Atoms, molecules, topologies and graph views
//! - **Force fields** ([`forcefield`]) - Classical systems, parameters and reference energies
//! - **Persistence** ([`io`]) - Flat array dictionaries and their `.npz` archives

pub mod forcefield;
pub mod io;
pub mod models;
pub mod tuples;
pub(crate) mod utils;
