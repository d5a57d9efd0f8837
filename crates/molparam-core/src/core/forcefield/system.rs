use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicBondTerm {
    pub particles: [usize; 2],
    /// Equilibrium length (Å).
    pub length: f64,
    /// Force constant in `0.5 k (r - r0)^2` (kcal/mol/Å²).
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HarmonicAngleTerm {
    pub particles: [usize; 3],
    /// Equilibrium angle (rad).
    pub angle: f64,
    /// Force constant in `0.5 k (θ - θ0)^2` (kcal/mol/rad²).
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TorsionTerm {
    pub particles: [usize; 4],
    pub periodicity: u32,
    /// Phase (rad).
    pub phase: f64,
    /// Amplitude in `k (1 + cos(nφ - phase))` (kcal/mol).
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedParticle {
    pub charge: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

/// Pair whose interaction deviates from the plain combination rule. A scale of zero excludes
/// the pair, the 1-4 scales come from the force field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedException {
    pub particles: [usize; 2],
    pub charge_scale: f64,
    pub lj_scale: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NonbondedForce {
    pub particles: Vec<NonbondedParticle>,
    pub exceptions: Vec<NonbondedException>,
}

impl NonbondedForce {
    pub fn charges(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.charge).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Force {
    HarmonicBond(Vec<HarmonicBondTerm>),
    HarmonicAngle(Vec<HarmonicAngleTerm>),
    PeriodicTorsion(Vec<TorsionTerm>),
    Nonbonded(NonbondedForce),
}

impl Force {
    pub const HARMONIC_BOND: &'static str = "HarmonicBondForce";
    pub const HARMONIC_ANGLE: &'static str = "HarmonicAngleForce";
    pub const PERIODIC_TORSION: &'static str = "PeriodicTorsionForce";
    pub const NONBONDED: &'static str = "NonbondedForce";

    pub const fn class_name(&self) -> &'static str {
        match self {
            Self::HarmonicBond(_) => Self::HARMONIC_BOND,
            Self::HarmonicAngle(_) => Self::HARMONIC_ANGLE,
            Self::PeriodicTorsion(_) => Self::PERIODIC_TORSION,
            Self::Nonbonded(_) => Self::NONBONDED,
        }
    }

    fn max_particle(&self) -> Option<usize> {
        match self {
            Self::HarmonicBond(terms) => terms.iter().flat_map(|t| t.particles).max(),
            Self::HarmonicAngle(terms) => terms.iter().flat_map(|t| t.particles).max(),
            Self::PeriodicTorsion(terms) => terms.iter().flat_map(|t| t.particles).max(),
            Self::Nonbonded(nb) => nb.exceptions.iter().flat_map(|e| e.particles).max(),
        }
    }
}

/// Selects force classes by case-insensitive substring of their class name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceFilter {
    Keep(Vec<String>),
    Remove(Vec<String>),
}

impl ForceFilter {
    pub fn keep(patterns: &[&str]) -> Self {
        Self::Keep(patterns.iter().map(|p| p.to_string()).collect())
    }

    pub fn remove(patterns: &[&str]) -> Self {
        Self::Remove(patterns.iter().map(|p| p.to_string()).collect())
    }

    /// Whether a force of class `name` survives the filter.
    pub fn retains(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let hit = |patterns: &[String]| {
            patterns
                .iter()
                .any(|p| name.contains(&p.to_ascii_lowercase()))
        };
        match self {
            Self::Keep(patterns) => hit(patterns),
            Self::Remove(patterns) => !hit(patterns),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SystemError {
    #[error("{force} references particle {index}, but the system has {n_particles} particles")]
    ParticleOutOfRange {
        force: &'static str,
        index: usize,
        n_particles: usize,
    },

    #[error("Expected {expected} partial charges, got {found}")]
    ChargeCount { expected: usize, found: usize },

    #[error("The system has no {}", Force::NONBONDED)]
    MissingNonbonded,

    #[error("Positions have shape {found:?}, expected ({expected}, 3)")]
    PositionShape { expected: usize, found: Vec<usize> },
}

/// An engine-side classical force-field system: particles plus a list of forces over
/// particle indices.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClassicalSystem {
    n_particles: usize,
    forces: Vec<Force>,
}

impl ClassicalSystem {
    pub fn new(n_particles: usize) -> Self {
        Self {
            n_particles,
            forces: Vec::new(),
        }
    }

    pub fn n_particles(&self) -> usize {
        self.n_particles
    }

    pub fn forces(&self) -> &[Force] {
        &self.forces
    }

    pub fn forces_mut(&mut self) -> &mut [Force] {
        &mut self.forces
    }

    /// Appends a force after checking its particle indices. Returns the force index.
    pub fn add_force(&mut self, force: Force) -> Result<usize, SystemError> {
        self.check_force(&force)?;
        self.forces.push(force);
        Ok(self.forces.len() - 1)
    }

    fn check_force(&self, force: &Force) -> Result<(), SystemError> {
        if let Force::Nonbonded(nb) = force {
            if nb.particles.len() != self.n_particles {
                return Err(SystemError::ChargeCount {
                    expected: self.n_particles,
                    found: nb.particles.len(),
                });
            }
        }
        match force.max_particle() {
            Some(index) if index >= self.n_particles => Err(SystemError::ParticleOutOfRange {
                force: force.class_name(),
                index,
                n_particles: self.n_particles,
            }),
            _ => Ok(()),
        }
    }

    /// Checks every force, for systems whose forces were edited in place.
    pub fn validate(&self) -> Result<(), SystemError> {
        self.forces.iter().try_for_each(|f| self.check_force(f))
    }

    pub fn has_force(&self, class_name: &str) -> bool {
        self.forces.iter().any(|f| f.class_name() == class_name)
    }

    pub fn nonbonded(&self) -> Option<&NonbondedForce> {
        self.forces.iter().find_map(|f| match f {
            Force::Nonbonded(nb) => Some(nb),
            _ => None,
        })
    }

    pub fn nonbonded_mut(&mut self) -> Option<&mut NonbondedForce> {
        self.forces.iter_mut().find_map(|f| match f {
            Force::Nonbonded(nb) => Some(nb),
            _ => None,
        })
    }

    pub fn partial_charges(&self) -> Option<Vec<f64>> {
        self.nonbonded().map(NonbondedForce::charges)
    }

    pub fn retain_forces(&mut self, filter: &ForceFilter) {
        self.forces.retain(|f| filter.retains(f.class_name()));
    }

    /// Replaces the particle charges. Sigma, epsilon and the exception scales are kept, so
    /// 1-4 charge products follow the new charges.
    pub fn set_partial_charges(&mut self, charges: &[f64]) -> Result<(), SystemError> {
        let n = self.n_particles;
        let nb = self.nonbonded_mut().ok_or(SystemError::MissingNonbonded)?;
        if charges.len() != n {
            return Err(SystemError::ChargeCount {
                expected: n,
                found: charges.len(),
            });
        }
        for (particle, &q) in nb.particles.iter_mut().zip(charges) {
            particle.charge = q;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonbonded(n: usize) -> Force {
        Force::Nonbonded(NonbondedForce {
            particles: vec![
                NonbondedParticle {
                    charge: 0.1,
                    sigma: 3.0,
                    epsilon: 0.1,
                };
                n
            ],
            exceptions: vec![NonbondedException {
                particles: [0, 1],
                charge_scale: 0.0,
                lj_scale: 0.0,
            }],
        })
    }

    fn sample_system() -> ClassicalSystem {
        let mut system = ClassicalSystem::new(2);
        system
            .add_force(Force::HarmonicBond(vec![HarmonicBondTerm {
                particles: [0, 1],
                length: 1.0,
                k: 100.0,
            }]))
            .unwrap();
        system.add_force(nonbonded(2)).unwrap();
        system
    }

    #[test]
    fn add_force_rejects_out_of_range_particles() {
        let mut system = ClassicalSystem::new(2);
        let result = system.add_force(Force::HarmonicBond(vec![HarmonicBondTerm {
            particles: [0, 2],
            length: 1.0,
            k: 1.0,
        }]));
        assert!(matches!(
            result,
            Err(SystemError::ParticleOutOfRange { index: 2, .. })
        ));
        assert!(matches!(
            system.add_force(nonbonded(3)),
            Err(SystemError::ChargeCount { .. })
        ));
    }

    #[test]
    fn filters_match_case_insensitive_substrings() {
        assert!(ForceFilter::keep(&["torsion"]).retains(Force::PERIODIC_TORSION));
        assert!(!ForceFilter::keep(&["torsion"]).retains(Force::NONBONDED));
        assert!(!ForceFilter::remove(&["Nonbonded"]).retains(Force::NONBONDED));
        assert!(ForceFilter::remove(&["Nonbonded"]).retains(Force::HARMONIC_BOND));
    }

    #[test]
    fn retain_forces_drops_filtered_classes() {
        let mut system = sample_system();
        system.retain_forces(&ForceFilter::keep(&["nonbonded"]));
        assert_eq!(system.forces().len(), 1);
        assert!(system.has_force(Force::NONBONDED));
    }

    #[test]
    fn set_partial_charges_keeps_lennard_jones_parameters() {
        let mut system = sample_system();
        system.set_partial_charges(&[0.5, -0.5]).unwrap();
        let nb = system.nonbonded().unwrap();
        assert_eq!(nb.charges(), vec![0.5, -0.5]);
        assert_eq!(nb.particles[0].sigma, 3.0);
        assert_eq!(nb.exceptions.len(), 1);
        assert!(matches!(
            system.set_partial_charges(&[0.0]),
            Err(SystemError::ChargeCount { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn set_partial_charges_requires_nonbonded_force() {
        let mut system = ClassicalSystem::new(1);
        assert_eq!(
            system.set_partial_charges(&[0.0]),
            Err(SystemError::MissingNonbonded)
        );
    }
}
