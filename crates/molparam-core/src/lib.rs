//! # molparam Core Library
//!
//! Bookkeeping for learned molecular mechanics: symmetry-reduced interaction tuples,
//! classical force-field parameters keyed by those tuples, and conformational datasets with
//! nonbonded-corrected reference targets.
//!
//! ## Architecture
//!
//! The library is organized in three layers:
//!
//! - **[`core`]: The Foundation.** Stateless models (`Molecule`, `MolecularGraph`), the tuple
//!   indexer, the parameter container, classical systems and their reference evaluation, and
//!   the flat key codec with its `.npz` archive.
//!
//! - **[`engine`]: The Capability Seam.** The [`engine::ForceFieldEngine`] and
//!   [`engine::TopologyResolver`] traits through which callers inject parameterization and
//!   identifier resolution, plus the bundled template-driven reference engine.
//!
//! - **[`data`]: The Public API.** Per-molecule records and datasets: construction from
//!   systems or input dictionaries, persistence, graph export, splitting and sampling.

pub mod core;
pub mod data;
pub mod engine;
