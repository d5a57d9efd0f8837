//! # Engine Module
//!
//! The classical force-field engine as an injected capability.
//!
//! ## Overview
//!
//! Data-layer code never builds systems or evaluates energies itself: it receives a
//! [`ForceFieldEngine`] and a [`TopologyResolver`] from the composition root (the CLI or a
//! test) and calls through them. [`reference::ReferenceEngine`] is the bundled pure-Rust engine
//! driven by a [`ForcefieldTemplate`](crate::core::forcefield::template::ForcefieldTemplate),
//! and [`library::TopologyLibrary`] resolves identifiers from a TOML file.
//!
//! ## Key Components
//!
//! - [`reference`] - Template-driven system creation and reference evaluation
//! - [`library`] - TOML-backed identifier to topology mapping
//! - [`error`] - Engine-specific error types

pub mod error;
pub mod library;
pub mod reference;

use crate::core::forcefield::system::{ClassicalSystem, ForceFilter};
use crate::core::models::topology::Topology;
use error::EngineError;
use ndarray::{Array1, Array3, ArrayView3};

/// Creates classical systems for topologies and evaluates them.
pub trait ForceFieldEngine: Send + Sync {
    /// Name under which this engine's energies are stored, e.g. `energy_{name}`.
    fn name(&self) -> &str;

    /// Parameterizes `topology`. Particle `i` of the result is `topology.atoms[i]`.
    fn create_system(&self, topology: &Topology) -> Result<ClassicalSystem, EngineError>;

    /// Energies `(n_confs)` and forces `(n_confs, n_atoms, 3)` for positions of shape
    /// `(n_confs, n_atoms, 3)`.
    fn energies_and_forces(
        &self,
        system: &ClassicalSystem,
        xyz: ArrayView3<f64>,
    ) -> Result<(Array1<f64>, Array3<f64>), EngineError>;

    /// Copy of `system` holding only the forces `filter` retains.
    fn remove_forces(&self, system: &ClassicalSystem, filter: &ForceFilter) -> ClassicalSystem {
        let mut stripped = system.clone();
        stripped.retain_forces(filter);
        stripped
    }

    fn set_partial_charges(
        &self,
        system: &mut ClassicalSystem,
        charges: &[f64],
    ) -> Result<(), EngineError> {
        system.set_partial_charges(charges)?;
        Ok(())
    }
}

/// Turns a chemical identifier into a topology.
pub trait TopologyResolver: Send + Sync {
    fn resolve(&self, identifier: &str) -> Result<Topology, EngineError>;
}
