use super::ForceFieldEngine;
use super::error::EngineError;
use crate::core::forcefield::energy;
use crate::core::forcefield::system::{
    ClassicalSystem, Force, HarmonicAngleTerm, HarmonicBondTerm, NonbondedException,
    NonbondedForce, NonbondedParticle, SystemError, TorsionTerm,
};
use crate::core::forcefield::template::{AtomTypeParam, ForcefieldTemplate, TorsionParam};
use crate::core::models::ids::AtomId;
use crate::core::models::topology::Topology;
use crate::core::tuples::class::ImproperConvention;
use crate::core::tuples::graph::ConnectivityGraph;
use crate::core::tuples::indexer::{IndexerConfig, TupleIndexer};
use ndarray::{Array1, Array3, ArrayView3, Axis};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, instrument};

/// Pure-Rust classical engine parameterizing topologies from a [`ForcefieldTemplate`].
///
/// Bonds and angles without a template entry are errors; torsions without one carry no
/// energy. Nonbonded pairs separated by one or two bonds are excluded and pairs separated
/// by three bonds are scaled by the template's 1-4 factors.
#[derive(Debug, Clone)]
pub struct ReferenceEngine {
    name: String,
    template: ForcefieldTemplate,
}

impl ReferenceEngine {
    pub fn new(name: impl Into<String>, template: ForcefieldTemplate) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }

    /// Loads the template at `path`; the engine is named after the file stem.
    pub fn from_path(path: &Path) -> Result<Self, EngineError> {
        let template = ForcefieldTemplate::load(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "reference".to_string());
        Ok(Self::new(name, template))
    }

    pub fn template(&self) -> &ForcefieldTemplate {
        &self.template
    }

    fn assign_types<'a>(
        &'a self,
        topology: &Topology,
        graph: &ConnectivityGraph,
    ) -> Result<Vec<&'a AtomTypeParam>, EngineError> {
        topology
            .atoms
            .iter()
            .map(|a| {
                self.template
                    .atom_type(a.id, a.atomic_number, graph.degree(a.id))
                    .map_err(EngineError::from)
            })
            .collect()
    }
}

fn torsion_terms(param: Option<&TorsionParam>, particles: [usize; 4], out: &mut Vec<TorsionTerm>) {
    if let Some(param) = param {
        out.extend(param.terms.iter().map(|t| TorsionTerm {
            particles,
            periodicity: t.periodicity,
            phase: t.phase,
            k: t.k,
        }));
    }
}

fn pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

impl ForceFieldEngine for ReferenceEngine {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip_all, fields(engine = %self.name, atoms = topology.len()))]
    fn create_system(&self, topology: &Topology) -> Result<ClassicalSystem, EngineError> {
        let graph = ConnectivityGraph::new(topology.atom_ids(), topology.bond_pairs())?;
        // One improper per trivalent center.
        let sets = TupleIndexer::new(IndexerConfig {
            reduce_symmetry: true,
            improper_convention: ImproperConvention::SignedWings,
        })
        .index(&graph);
        let types = self.assign_types(topology, &graph)?;
        let position = |id: AtomId| graph.position(id).unwrap_or_default();
        let type_of = |id: AtomId| types[position(id)].name.as_str();

        let mut bonds = Vec::with_capacity(graph.edges().len());
        for &[a, b] in graph.edges() {
            let p = self.template.bond([type_of(a), type_of(b)])?;
            bonds.push(HarmonicBondTerm {
                particles: [position(a), position(b)],
                length: p.length,
                k: p.k,
            });
        }

        let mut angles = Vec::with_capacity(sets.angles.len());
        for t in sets.angles.iter() {
            let p = self.template.angle(t.map(type_of))?;
            angles.push(HarmonicAngleTerm {
                particles: t.map(position),
                angle: p.angle,
                k: p.k,
            });
        }

        let mut torsions = Vec::new();
        for t in sets.propers.iter() {
            torsion_terms(self.template.proper(t.map(type_of)), t.map(position), &mut torsions);
        }
        let n_proper_terms = torsions.len();
        for t in sets.impropers.iter() {
            torsion_terms(self.template.improper(t.map(type_of)), t.map(position), &mut torsions);
        }

        let globals = self.template.globals;
        let mut exceptions: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
        for t in sets.propers.iter() {
            exceptions.insert(
                pair(position(t[0]), position(t[3])),
                (globals.coulomb14_scale, globals.lj14_scale),
            );
        }
        // Exclusions win over 1-4 scaling for pairs that are both, as in small rings.
        for t in sets.angles.iter() {
            exceptions.insert(pair(position(t[0]), position(t[2])), (0.0, 0.0));
        }
        for &[a, b] in graph.edges() {
            exceptions.insert(pair(position(a), position(b)), (0.0, 0.0));
        }
        let nonbonded = NonbondedForce {
            particles: types
                .iter()
                .map(|t| NonbondedParticle {
                    charge: t.charge,
                    sigma: t.sigma,
                    epsilon: t.epsilon,
                })
                .collect(),
            exceptions: exceptions
                .into_iter()
                .map(|((a, b), (charge_scale, lj_scale))| NonbondedException {
                    particles: [a, b],
                    charge_scale,
                    lj_scale,
                })
                .collect(),
        };

        let mut system = ClassicalSystem::new(topology.len());
        system.add_force(Force::HarmonicBond(bonds))?;
        system.add_force(Force::HarmonicAngle(angles))?;
        system.add_force(Force::PeriodicTorsion(torsions))?;
        system.add_force(Force::Nonbonded(nonbonded))?;
        debug!(
            angles = sets.angles.len(),
            proper_terms = n_proper_terms,
            impropers = sets.impropers.len(),
            "Created classical system"
        );
        Ok(system)
    }

    fn energies_and_forces(
        &self,
        system: &ClassicalSystem,
        xyz: ArrayView3<f64>,
    ) -> Result<(Array1<f64>, Array3<f64>), EngineError> {
        let shape = xyz.shape();
        if shape[1] != system.n_particles() || shape[2] != 3 {
            return Err(SystemError::PositionShape {
                expected: system.n_particles(),
                found: shape.to_vec(),
            }
            .into());
        }
        let mut energies = Array1::zeros(shape[0]);
        let mut forces = Array3::zeros(xyz.raw_dim());
        for (c, conformation) in xyz.axis_iter(Axis(0)).enumerate() {
            let (terms, f) = energy::evaluate(system, conformation)?;
            energies[c] = terms.total();
            forces.index_axis_mut(Axis(0), c).assign(&f);
        }
        Ok((energies, forces))
    }
}
