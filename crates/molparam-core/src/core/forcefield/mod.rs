//! # Force Field Module
//!
//! Classical force-field systems and the parameters extracted from them.
//!
//! ## Overview
//!
//! A [`system::ClassicalSystem`] is the engine-side view of a molecule: particles and a list
//! of forces (harmonic bonds and angles, periodic torsions, nonbonded). [`parameters::Parameters`]
//! is the molecule-side view of the same numbers, keyed by interaction tuple instead of
//! particle index, and can be moved in both directions between the two.
//!
//! ## Key Components
//!
//! - [`system`] - Forces, terms and the system container
//! - [`parameters`] - Tuple-keyed parameter extraction and write-back
//! - [`template`] - TOML force-field templates with typed atom, bond, angle and torsion tables
//! - [`energy`] - Reference evaluation of energies and forces of a system
//! - [`potentials`] - Analytic potentials with derivatives
//! - [`term`] - Energy decomposition by contribution
//! - [`units`] - Unit conversion into kcal/mol, Å and radians
//!
//! ```ignore
//! use molparam::core::forcefield::parameters::{ExtractionOptions, Parameters};
//!
//! let params = Parameters::from_system(&system, &molecule, &ExtractionOptions::default())?;
//! params.write_to_system(&mut system, &molecule)?;
//! ```

pub mod energy;
pub mod parameters;
pub mod potentials;
pub mod system;
pub mod template;
pub mod term;
pub mod units;
