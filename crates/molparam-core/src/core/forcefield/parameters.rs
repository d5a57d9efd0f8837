use super::system::{
    ClassicalSystem, Force, HarmonicAngleTerm, HarmonicBondTerm, SystemError, TorsionTerm,
};
use crate::core::io::codec::{
    ArrayDict, CodecError, KeyCodec, array_to_ids, array_to_tuples, ids_to_array, take_float,
    take_int, tuples_to_array,
};
use crate::core::models::ids::AtomId;
use crate::core::models::molecule::Molecule;
use crate::core::tuples::class::{InteractionClass, sorted_key};
use crate::core::tuples::set::TupleSet;
use ndarray::{Array1, Array2, Ix1, Ix2};
use std::collections::{HashMap, HashSet};
use std::f64::consts::{PI, TAU};
use thiserror::Error;
use tracing::{debug, instrument, warn};

pub const DEFAULT_MAX_PERIODICITY: usize = 6;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    System(#[from] SystemError),

    #[error("'{field}' has length {found}, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        found: usize,
    },

    #[error("'{field}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        field: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("{class} {tuple:?} is not part of the molecule")]
    UnknownTuple {
        class: InteractionClass,
        tuple: Vec<AtomId>,
    },

    #[error("Atom {atom} is not part of the molecule")]
    UnknownAtom { atom: AtomId },

    #[error("Torsion {tuple:?} is neither a proper nor an improper torsion of the molecule")]
    UnclassifiedTorsion { tuple: Vec<AtomId> },

    #[error("Improper torsion {tuple:?} does not match any improper of the molecule")]
    ImproperMismatch { tuple: Vec<AtomId> },

    #[error("The system has no {class_name}, but the molecule has tuples for it")]
    MissingForce { class_name: &'static str },

    #[error("Torsion {tuple:?} has periodicity {periodicity}, allowed range is 1..={max}")]
    PeriodicityOutOfRange {
        tuple: Vec<AtomId>,
        periodicity: u32,
        max: usize,
    },

    #[error("{class} {tuple:?} has invalid force constant {value}")]
    InvalidK {
        class: InteractionClass,
        tuple: Vec<AtomId>,
        value: f64,
    },

    #[error("The system has {found} particles but the molecule has {expected} atoms")]
    ParticleCount { expected: usize, found: usize },

    #[error("Maximum periodicity must be at least 1")]
    InvalidMaxPeriodicity,

    #[error("Key '{key}' is not a parameter field")]
    UnknownKey { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub max_periodicity: usize,
    /// Drop improper extraction with a warning instead of failing on unmatched impropers.
    pub allow_skip_improper: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            max_periodicity: DEFAULT_MAX_PERIODICITY,
            allow_skip_improper: false,
        }
    }
}

/// Per-atom nonbonded parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomParameters {
    pub atoms: Vec<AtomId>,
    pub charge: Array1<f64>,
    pub sigma: Array1<f64>,
    pub epsilon: Array1<f64>,
}

/// Harmonic parameters of bonds (`N = 2`) or angles (`N = 3`).
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonicParameters<const N: usize> {
    pub ids: Vec<[AtomId; N]>,
    pub k: Array1<f64>,
    pub eq: Array1<f64>,
}

/// Periodic torsion parameters, column `c` holding periodicity `c + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct TorsionParameters {
    pub ids: Vec<[AtomId; 4]>,
    pub ks: Array2<f64>,
    pub ns: Array2<f64>,
    pub phases: Array2<f64>,
}

impl<const N: usize> HarmonicParameters<N> {
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            k: Array1::zeros(0),
            eq: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// `(k, eq)` with one row per stored tuple of `set`; tuples without parameters are NaN.
    pub fn aligned_to(&self, set: &TupleSet<N>) -> (Array1<f64>, Array1<f64>) {
        let rows = row_lookup(&self.ids);
        let mut k = Array1::from_elem(set.len(), f64::NAN);
        let mut eq = Array1::from_elem(set.len(), f64::NAN);
        for (i, tuple) in set.iter().enumerate() {
            if let Some(&row) = rows.get(tuple) {
                k[i] = self.k[row];
                eq[i] = self.eq[row];
            }
        }
        (k, eq)
    }

    fn validate(&self, name: &str) -> Result<(), ParameterError> {
        check_len(&format!("{}_k", name), self.ids.len(), self.k.len())?;
        check_len(&format!("{}_eq", name), self.ids.len(), self.eq.len())
    }
}

impl TorsionParameters {
    pub fn empty(max_periodicity: usize) -> Self {
        Self {
            ids: Vec::new(),
            ks: Array2::zeros((0, max_periodicity)),
            ns: Array2::zeros((0, max_periodicity)),
            phases: Array2::zeros((0, max_periodicity)),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn max_periodicity(&self) -> usize {
        self.ks.ncols()
    }

    /// `(ks, phases)` with one row per stored tuple of `set`; tuples without parameters are NaN.
    pub fn aligned_to(&self, set: &TupleSet<4>) -> (Array2<f64>, Array2<f64>) {
        let rows = row_lookup(&self.ids);
        let width = self.max_periodicity();
        let mut ks = Array2::from_elem((set.len(), width), f64::NAN);
        let mut phases = Array2::from_elem((set.len(), width), f64::NAN);
        for (i, tuple) in set.iter().enumerate() {
            if let Some(&row) = rows.get(tuple) {
                ks.row_mut(i).assign(&self.ks.row(row));
                phases.row_mut(i).assign(&self.phases.row(row));
            }
        }
        (ks, phases)
    }

    fn validate(&self, name: &str) -> Result<(), ParameterError> {
        let expected = vec![self.ids.len(), self.ks.ncols()];
        for (suffix, array) in [("ks", &self.ks), ("ns", &self.ns), ("phases", &self.phases)] {
            if array.shape() != expected.as_slice() {
                return Err(ParameterError::ShapeMismatch {
                    field: format!("{}_{}", name, suffix),
                    expected: expected.clone(),
                    found: array.shape().to_vec(),
                });
            }
        }
        Ok(())
    }

    fn periodicity_columns(n_rows: usize, width: usize) -> Array2<f64> {
        Array2::from_shape_fn((n_rows, width), |(_, c)| (c + 1) as f64)
    }
}

/// Classical parameters of one molecule, keyed by interaction tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    atoms: AtomParameters,
    bonds: HarmonicParameters<2>,
    angles: HarmonicParameters<3>,
    propers: TorsionParameters,
    impropers: TorsionParameters,
}

const ATOMS: &str = "atoms";
const ATOM_Q: &str = "atom_q";
const ATOM_SIGMA: &str = "atom_sigma";
const ATOM_EPSILON: &str = "atom_epsilon";

fn check_len(field: &str, expected: usize, found: usize) -> Result<(), ParameterError> {
    if expected == found {
        Ok(())
    } else {
        Err(ParameterError::LengthMismatch {
            field: field.to_string(),
            expected,
            found,
        })
    }
}

fn row_lookup<const N: usize>(ids: &[[AtomId; N]]) -> HashMap<[AtomId; N], usize> {
    ids.iter().enumerate().map(|(i, t)| (*t, i)).collect()
}

fn wrap_phase(phase: f64) -> f64 {
    let p = phase.rem_euclid(TAU);
    if p >= TAU { 0.0 } else { p }
}

// Accumulated torsion terms of one tuple, as phasors per periodicity.
#[derive(Debug, Clone)]
struct PhasorRow(Vec<(f64, f64)>);

impl PhasorRow {
    fn new(width: usize) -> Self {
        Self(vec![(0.0, 0.0); width])
    }

    fn add(&mut self, periodicity: u32, k: f64, phase: f64) {
        let slot = &mut self.0[periodicity as usize - 1];
        slot.0 += k * phase.cos();
        slot.1 += k * phase.sin();
    }

    fn into_ks_phases(self) -> (Vec<f64>, Vec<f64>) {
        self.0
            .into_iter()
            .map(|(re, im)| {
                let k = re.hypot(im);
                if k < 1e-12 {
                    (0.0, 0.0)
                } else {
                    (k, wrap_phase(im.atan2(re)))
                }
            })
            .unzip()
    }
}

struct TorsionAccumulator {
    width: usize,
    rows: HashMap<usize, PhasorRow>,
}

impl TorsionAccumulator {
    fn new(width: usize) -> Self {
        Self {
            width,
            rows: HashMap::new(),
        }
    }

    fn add(&mut self, slot: usize, periodicity: u32, k: f64, phase: f64) {
        self.rows
            .entry(slot)
            .or_insert_with(|| PhasorRow::new(self.width))
            .add(periodicity, k, phase);
    }

    fn finish(mut self, set: &TupleSet<4>) -> TorsionParameters {
        let mut ids = Vec::new();
        let mut ks = Vec::new();
        let mut phases = Vec::new();
        for (slot, tuple) in set.iter().enumerate() {
            if let Some(row) = self.rows.remove(&slot) {
                let (k, p) = row.into_ks_phases();
                ids.push(*tuple);
                ks.extend(k);
                phases.extend(p);
            }
        }
        let n = ids.len();
        let shape = (n, self.width);
        TorsionParameters {
            ids,
            ks: Array2::from_shape_vec(shape, ks).unwrap_or_else(|_| Array2::zeros(shape)),
            ns: TorsionParameters::periodicity_columns(n, self.width),
            phases: Array2::from_shape_vec(shape, phases).unwrap_or_else(|_| Array2::zeros(shape)),
        }
    }
}

fn harmonic_from_slots<const N: usize>(
    set: &TupleSet<N>,
    slots: &[Option<(f64, f64)>],
) -> HarmonicParameters<N> {
    let mut params = HarmonicParameters::empty();
    let (mut k, mut eq) = (Vec::new(), Vec::new());
    for (tuple, slot) in set.iter().zip(slots) {
        if let Some((kv, eqv)) = slot {
            params.ids.push(*tuple);
            k.push(*kv);
            eq.push(*eqv);
        }
    }
    params.k = Array1::from(k);
    params.eq = Array1::from(eq);
    params
}

/// Slots of every stored ordering equivalent to `tuple`, with the sign relating them.
fn equivalent_slots<const N: usize>(
    set: &TupleSet<N>,
    rows: &HashMap<[AtomId; N], usize>,
    tuple: &[AtomId; N],
) -> Vec<(usize, i8)> {
    set.class()
        .variants(set.convention(), tuple)
        .filter_map(|(variant, sign)| rows.get(&variant).map(|&slot| (slot, sign)))
        .collect()
}

impl Parameters {
    pub fn new(
        atoms: AtomParameters,
        bonds: HarmonicParameters<2>,
        angles: HarmonicParameters<3>,
        propers: TorsionParameters,
        impropers: TorsionParameters,
    ) -> Result<Self, ParameterError> {
        let n = atoms.atoms.len();
        check_len(ATOM_Q, n, atoms.charge.len())?;
        check_len(ATOM_SIGMA, n, atoms.sigma.len())?;
        check_len(ATOM_EPSILON, n, atoms.epsilon.len())?;
        bonds.validate("bond")?;
        angles.validate("angle")?;
        propers.validate("proper")?;
        impropers.validate("improper")?;
        Ok(Self {
            atoms,
            bonds,
            angles,
            propers,
            impropers,
        })
    }

    pub fn atoms(&self) -> &AtomParameters {
        &self.atoms
    }

    pub fn bonds(&self) -> &HarmonicParameters<2> {
        &self.bonds
    }

    pub fn angles(&self) -> &HarmonicParameters<3> {
        &self.angles
    }

    pub fn propers(&self) -> &TorsionParameters {
        &self.propers
    }

    pub fn impropers(&self) -> &TorsionParameters {
        &self.impropers
    }

    /// Parameters covering every tuple of `molecule`, all values NaN.
    pub fn nan_filled(molecule: &Molecule, max_periodicity: usize) -> Result<Self, ParameterError> {
        if max_periodicity == 0 {
            return Err(ParameterError::InvalidMaxPeriodicity);
        }
        let n = molecule.n_atoms();
        let nan1 = |len: usize| Array1::from_elem(len, f64::NAN);
        let nan2 = |len: usize| Array2::from_elem((len, max_periodicity), f64::NAN);
        let torsions = |set: &TupleSet<4>| TorsionParameters {
            ids: set.as_slice().to_vec(),
            ks: nan2(set.len()),
            ns: nan2(set.len()),
            phases: nan2(set.len()),
        };
        Self::new(
            AtomParameters {
                atoms: molecule.atom_ids(),
                charge: nan1(n),
                sigma: nan1(n),
                epsilon: nan1(n),
            },
            HarmonicParameters {
                ids: molecule.bonds().as_slice().to_vec(),
                k: nan1(molecule.bonds().len()),
                eq: nan1(molecule.bonds().len()),
            },
            HarmonicParameters {
                ids: molecule.angles().as_slice().to_vec(),
                k: nan1(molecule.angles().len()),
                eq: nan1(molecule.angles().len()),
            },
            torsions(molecule.propers()),
            torsions(molecule.impropers()),
        )
    }

    /// Whether every parameter value is NaN.
    pub fn is_nan_filled(&self) -> bool {
        let nan = |v: &f64| v.is_nan();
        let a = &self.atoms;
        a.charge.iter().chain(&a.sigma).chain(&a.epsilon).all(nan)
            && self.bonds.k.iter().chain(&self.bonds.eq).all(nan)
            && self.angles.k.iter().chain(&self.angles.eq).all(nan)
            && self.propers.ks.iter().chain(&self.propers.phases).all(nan)
            && self.impropers.ks.iter().chain(&self.impropers.phases).all(nan)
    }

    /// Extracts parameters from a classical system whose particle `i` is atom `i` of
    /// `molecule`.
    ///
    /// Several torsion terms on one tuple and periodicity are combined into a single term by
    /// adding them as phasors `k·e^(i·phase)`. This keeps the angular dependence exact and
    /// shifts the energy by a constant.
    #[instrument(level = "debug", skip_all, fields(atoms = molecule.n_atoms()))]
    pub fn from_system(
        system: &ClassicalSystem,
        molecule: &Molecule,
        options: &ExtractionOptions,
    ) -> Result<Self, ParameterError> {
        if options.max_periodicity == 0 {
            return Err(ParameterError::InvalidMaxPeriodicity);
        }
        if system.n_particles() != molecule.n_atoms() {
            return Err(ParameterError::ParticleCount {
                expected: molecule.n_atoms(),
                found: system.n_particles(),
            });
        }
        system.validate()?;
        let ids = molecule.atom_ids();

        let require = |present: bool, needed: bool, class_name| {
            if needed && !present {
                Err(ParameterError::MissingForce { class_name })
            } else {
                Ok(())
            }
        };
        require(system.has_force(Force::NONBONDED), !ids.is_empty(), Force::NONBONDED)?;
        require(
            system.has_force(Force::HARMONIC_BOND),
            !molecule.bonds().is_empty(),
            Force::HARMONIC_BOND,
        )?;
        require(
            system.has_force(Force::HARMONIC_ANGLE),
            !molecule.angles().is_empty(),
            Force::HARMONIC_ANGLE,
        )?;
        require(
            system.has_force(Force::PERIODIC_TORSION),
            !(molecule.propers().is_empty() && molecule.impropers().is_empty()),
            Force::PERIODIC_TORSION,
        )?;

        let bond_rows = row_lookup(molecule.bonds().as_slice());
        let angle_rows = row_lookup(molecule.angles().as_slice());
        let proper_rows = row_lookup(molecule.propers().as_slice());
        let improper_rows = row_lookup(molecule.impropers().as_slice());
        let improper_sets = molecule.impropers().by_atom_set();

        let mut bond_slots = vec![None; molecule.bonds().len()];
        let mut angle_slots = vec![None; molecule.angles().len()];
        let mut propers = TorsionAccumulator::new(options.max_periodicity);
        let mut impropers = TorsionAccumulator::new(options.max_periodicity);
        let mut skip_impropers = false;
        let mut atoms = AtomParameters {
            atoms: ids.clone(),
            charge: Array1::zeros(0),
            sigma: Array1::zeros(0),
            epsilon: Array1::zeros(0),
        };

        for force in system.forces() {
            match force {
                Force::Nonbonded(nb) => {
                    atoms.charge = nb.particles.iter().map(|p| p.charge).collect();
                    atoms.sigma = nb.particles.iter().map(|p| p.sigma).collect();
                    atoms.epsilon = nb.particles.iter().map(|p| p.epsilon).collect();
                }
                Force::HarmonicBond(terms) => {
                    for t in terms {
                        let tuple = [ids[t.particles[0]], ids[t.particles[1]]];
                        let slots = equivalent_slots(molecule.bonds(), &bond_rows, &tuple);
                        if slots.is_empty() {
                            return Err(ParameterError::UnknownTuple {
                                class: InteractionClass::Bond,
                                tuple: tuple.to_vec(),
                            });
                        }
                        for (slot, _) in slots {
                            bond_slots[slot] = Some((t.k, t.length));
                        }
                    }
                }
                Force::HarmonicAngle(terms) => {
                    for t in terms {
                        let tuple = t.particles.map(|p| ids[p]);
                        let slots = equivalent_slots(molecule.angles(), &angle_rows, &tuple);
                        if slots.is_empty() {
                            return Err(ParameterError::UnknownTuple {
                                class: InteractionClass::Angle,
                                tuple: tuple.to_vec(),
                            });
                        }
                        for (slot, _) in slots {
                            angle_slots[slot] = Some((t.k, t.angle));
                        }
                    }
                }
                Force::PeriodicTorsion(terms) => {
                    for t in terms {
                        if t.k == 0.0 {
                            continue;
                        }
                        let tuple = t.particles.map(|p| ids[p]);
                        if t.periodicity == 0 || t.periodicity as usize > options.max_periodicity {
                            return Err(ParameterError::PeriodicityOutOfRange {
                                tuple: tuple.to_vec(),
                                periodicity: t.periodicity,
                                max: options.max_periodicity,
                            });
                        }
                        let (k, phase) = if t.k < 0.0 {
                            (-t.k, wrap_phase(t.phase + PI))
                        } else {
                            (t.k, t.phase)
                        };

                        if let Some(group) = improper_sets.get(&sorted_key(&tuple)) {
                            let mut slots =
                                equivalent_slots(molecule.impropers(), &improper_rows, &tuple);
                            if slots.is_empty() {
                                slots.push((group[0], 1));
                            }
                            for (slot, sign) in slots {
                                impropers.add(slot, t.periodicity, k, f64::from(sign) * phase);
                            }
                            continue;
                        }
                        let slots = equivalent_slots(molecule.propers(), &proper_rows, &tuple);
                        if !slots.is_empty() {
                            for (slot, _) in slots {
                                propers.add(slot, t.periodicity, k, phase);
                            }
                            continue;
                        }
                        if is_star(molecule, &tuple) {
                            if options.allow_skip_improper {
                                skip_impropers = true;
                                continue;
                            }
                            return Err(ParameterError::ImproperMismatch {
                                tuple: tuple.to_vec(),
                            });
                        }
                        return Err(ParameterError::UnclassifiedTorsion {
                            tuple: tuple.to_vec(),
                        });
                    }
                }
            }
        }

        let impropers = if skip_impropers {
            warn!("Improper torsions of the system do not match the molecule, skipping improper parameters");
            TorsionParameters::empty(options.max_periodicity)
        } else {
            impropers.finish(molecule.impropers())
        };

        let params = Self::new(
            atoms,
            harmonic_from_slots(molecule.bonds(), &bond_slots),
            harmonic_from_slots(molecule.angles(), &angle_slots),
            propers.finish(molecule.propers()),
            impropers,
        )?;
        debug!(
            bonds = params.bonds.len(),
            angles = params.angles.len(),
            propers = params.propers.len(),
            impropers = params.impropers.len(),
            "Extracted parameters"
        );
        Ok(params)
    }

    /// Checks that every id array is a subset of the molecule's corresponding tuple set.
    pub fn validate_against(&self, molecule: &Molecule) -> Result<(), ParameterError> {
        let known: HashSet<AtomId> = molecule.atom_ids().into_iter().collect();
        if let Some(&atom) = self.atoms.atoms.iter().find(|id| !known.contains(id)) {
            return Err(ParameterError::UnknownAtom { atom });
        }
        fn subset<const N: usize>(
            ids: &[[AtomId; N]],
            set: &TupleSet<N>,
        ) -> Result<(), ParameterError> {
            match ids.iter().find(|t| !set.contains(t)) {
                Some(t) => Err(ParameterError::UnknownTuple {
                    class: set.class(),
                    tuple: t.to_vec(),
                }),
                None => Ok(()),
            }
        }
        subset(&self.bonds.ids, molecule.bonds())?;
        subset(&self.angles.ids, molecule.angles())?;
        subset(&self.propers.ids, molecule.propers())?;
        subset(&self.impropers.ids, molecule.impropers())
    }

    /// Writes the bonded parameters into `system`.
    ///
    /// Harmonic terms are overwritten in place or appended. Existing torsion terms on any of
    /// this molecule's proper or improper atom sets are zeroed, then one torsion force for
    /// the propers and one for the impropers are appended with the nonzero terms.
    pub fn write_to_system(
        &self,
        system: &mut ClassicalSystem,
        molecule: &Molecule,
    ) -> Result<(), ParameterError> {
        if system.n_particles() != molecule.n_atoms() {
            return Err(ParameterError::ParticleCount {
                expected: molecule.n_atoms(),
                found: system.n_particles(),
            });
        }
        let particle = |id: AtomId| {
            molecule
                .position(id)
                .ok_or(ParameterError::UnknownAtom { atom: id })
        };

        let mut bond_terms = Vec::with_capacity(self.bonds.len());
        for (i, tuple) in self.bonds.ids.iter().enumerate() {
            check_value(InteractionClass::Bond, tuple, self.bonds.k[i], false)?;
            check_value(InteractionClass::Bond, tuple, self.bonds.eq[i], false)?;
            bond_terms.push(HarmonicBondTerm {
                particles: [particle(tuple[0])?, particle(tuple[1])?],
                length: self.bonds.eq[i],
                k: self.bonds.k[i],
            });
        }
        let mut angle_terms = Vec::with_capacity(self.angles.len());
        for (i, tuple) in self.angles.ids.iter().enumerate() {
            check_value(InteractionClass::Angle, tuple, self.angles.k[i], false)?;
            check_value(InteractionClass::Angle, tuple, self.angles.eq[i], false)?;
            angle_terms.push(HarmonicAngleTerm {
                particles: [particle(tuple[0])?, particle(tuple[1])?, particle(tuple[2])?],
                angle: self.angles.eq[i],
                k: self.angles.k[i],
            });
        }

        let mut replaced = HashSet::new();
        let mut torsion_terms = |params: &TorsionParameters,
                                 class: InteractionClass|
         -> Result<Vec<TorsionTerm>, ParameterError> {
            let mut terms = Vec::new();
            for (row, tuple) in params.ids.iter().enumerate() {
                let particles = [
                    particle(tuple[0])?,
                    particle(tuple[1])?,
                    particle(tuple[2])?,
                    particle(tuple[3])?,
                ];
                replaced.insert(sorted_key(&particles));
                for col in 0..params.max_periodicity() {
                    let k = params.ks[[row, col]];
                    check_value(class, tuple, k, false)?;
                    if k == 0.0 {
                        continue;
                    }
                    let phase = params.phases[[row, col]];
                    check_value(class, tuple, phase, true)?;
                    terms.push(TorsionTerm {
                        particles,
                        periodicity: (col + 1) as u32,
                        phase,
                        k,
                    });
                }
            }
            Ok(terms)
        };
        let proper_terms = torsion_terms(&self.propers, InteractionClass::Proper)?;
        let improper_terms = torsion_terms(&self.impropers, InteractionClass::Improper)?;

        merge_harmonic(
            system,
            bond_terms,
            |t| sorted_key(&t.particles),
            |f| match f {
                Force::HarmonicBond(terms) => Some(terms),
                _ => None,
            },
            Force::HarmonicBond,
        )?;
        merge_harmonic(
            system,
            angle_terms,
            |t| {
                let [a, b, c] = t.particles;
                if a <= c { [a, b, c] } else { [c, b, a] }
            },
            |f| match f {
                Force::HarmonicAngle(terms) => Some(terms),
                _ => None,
            },
            Force::HarmonicAngle,
        )?;

        let mut zeroed = 0usize;
        for force in system.forces_mut() {
            if let Force::PeriodicTorsion(terms) = force {
                for t in terms.iter_mut() {
                    if t.k != 0.0 && replaced.contains(&sorted_key(&t.particles)) {
                        t.k = 0.0;
                        zeroed += 1;
                    }
                }
            }
        }
        debug!(zeroed, "Zeroed replaced torsion terms");
        system.add_force(Force::PeriodicTorsion(proper_terms))?;
        system.add_force(Force::PeriodicTorsion(improper_terms))?;
        Ok(())
    }

    pub fn to_dict(&self) -> ArrayDict {
        let key = KeyCodec::parameter_key;
        let mut dict = ArrayDict::new();
        dict.insert(key(ATOMS), ids_to_array(&self.atoms.atoms).into());
        dict.insert(key(ATOM_Q), self.atoms.charge.clone().into());
        dict.insert(key(ATOM_SIGMA), self.atoms.sigma.clone().into());
        dict.insert(key(ATOM_EPSILON), self.atoms.epsilon.clone().into());
        for (name, ids, k, eq) in [
            ("bond", tuples_to_array(&self.bonds.ids), &self.bonds.k, &self.bonds.eq),
            ("angle", tuples_to_array(&self.angles.ids), &self.angles.k, &self.angles.eq),
        ] {
            dict.insert(key(&format!("{}s", name)), ids.into());
            dict.insert(key(&format!("{}_k", name)), k.clone().into());
            dict.insert(key(&format!("{}_eq", name)), eq.clone().into());
        }
        for (name, t) in [("proper", &self.propers), ("improper", &self.impropers)] {
            dict.insert(key(&format!("{}s", name)), tuples_to_array(&t.ids).into());
            dict.insert(key(&format!("{}_ks", name)), t.ks.clone().into());
            dict.insert(key(&format!("{}_ns", name)), t.ns.clone().into());
            dict.insert(key(&format!("{}_phases", name)), t.phases.clone().into());
        }
        dict
    }

    /// Restores parameters from their `param_` entries. Every entry of `dict` must be consumed.
    pub fn from_dict(mut dict: ArrayDict) -> Result<Self, ParameterError> {
        let key = KeyCodec::parameter_key;
        let atoms_key = key(ATOMS);
        let atoms = AtomParameters {
            atoms: array_to_ids(&atoms_key, &take_int::<Ix1>(&mut dict, &atoms_key)?)?,
            charge: take_float::<Ix1>(&mut dict, &key(ATOM_Q))?,
            sigma: take_float::<Ix1>(&mut dict, &key(ATOM_SIGMA))?,
            epsilon: take_float::<Ix1>(&mut dict, &key(ATOM_EPSILON))?,
        };
        fn harmonic<const N: usize>(
            dict: &mut ArrayDict,
            name: &str,
        ) -> Result<HarmonicParameters<N>, ParameterError> {
            let key = KeyCodec::parameter_key;
            let ids_key = key(&format!("{}s", name));
            Ok(HarmonicParameters {
                ids: array_to_tuples::<N>(&ids_key, &take_int::<Ix2>(dict, &ids_key)?)?,
                k: take_float::<Ix1>(dict, &key(&format!("{}_k", name)))?,
                eq: take_float::<Ix1>(dict, &key(&format!("{}_eq", name)))?,
            })
        }
        fn torsion(dict: &mut ArrayDict, name: &str) -> Result<TorsionParameters, ParameterError> {
            let key = KeyCodec::parameter_key;
            let ids_key = key(&format!("{}s", name));
            Ok(TorsionParameters {
                ids: array_to_tuples::<4>(&ids_key, &take_int::<Ix2>(dict, &ids_key)?)?,
                ks: take_float::<Ix2>(dict, &key(&format!("{}_ks", name)))?,
                ns: take_float::<Ix2>(dict, &key(&format!("{}_ns", name)))?,
                phases: take_float::<Ix2>(dict, &key(&format!("{}_phases", name)))?,
            })
        }
        let bonds = harmonic::<2>(&mut dict, "bond")?;
        let angles = harmonic::<3>(&mut dict, "angle")?;
        let propers = torsion(&mut dict, "proper")?;
        let impropers = torsion(&mut dict, "improper")?;
        if let Some(k) = dict.into_keys().next() {
            return Err(ParameterError::UnknownKey { key: k });
        }
        Self::new(atoms, bonds, angles, propers, impropers)
    }
}

fn check_value<const N: usize>(
    class: InteractionClass,
    tuple: &[AtomId; N],
    value: f64,
    allow_negative: bool,
) -> Result<(), ParameterError> {
    if value.is_nan() || (!allow_negative && value < 0.0) {
        Err(ParameterError::InvalidK {
            class,
            tuple: tuple.to_vec(),
            value,
        })
    } else {
        Ok(())
    }
}

/// Whether one atom of `tuple` is bonded to the three others.
fn is_star(molecule: &Molecule, tuple: &[AtomId; 4]) -> bool {
    tuple.iter().any(|&center| {
        tuple
            .iter()
            .filter(|&&other| other != center)
            .all(|&other| molecule.graph().are_bonded(center, other))
    })
}

fn merge_harmonic<T, const N: usize>(
    system: &mut ClassicalSystem,
    new_terms: Vec<T>,
    key_of: impl Fn(&T) -> [usize; N],
    terms_of: impl Fn(&mut Force) -> Option<&mut Vec<T>>,
    make: impl Fn(Vec<T>) -> Force,
) -> Result<(), ParameterError> {
    if new_terms.is_empty() {
        return Ok(());
    }
    let target = system.forces_mut().iter_mut().find_map(|f| terms_of(f));
    match target {
        Some(existing) => {
            let positions: HashMap<[usize; N], usize> = existing
                .iter()
                .enumerate()
                .map(|(i, t)| (key_of(t), i))
                .collect();
            for term in new_terms {
                match positions.get(&key_of(&term)) {
                    Some(&i) => existing[i] = term,
                    None => existing.push(term),
                }
            }
            system.validate()?;
        }
        None => {
            system.add_force(make(new_terms))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::system::{NonbondedForce, NonbondedParticle};
    use crate::core::io::codec::dicts_same_bits;
    use crate::core::models::atom::Atom;
    use crate::core::tuples::class::ImproperConvention;
    use crate::core::tuples::indexer::IndexerConfig;
    use ndarray::array;

    fn ids<const N: usize>(raw: [u32; N]) -> [AtomId; N] {
        raw.map(AtomId)
    }

    /// Formaldehyde-like center: C0 bonded to O1, H2, H3; plus H4 on O1 for a proper.
    fn molecule(convention: ImproperConvention) -> Molecule {
        let atoms = vec![
            Atom::new(AtomId(0), 6),
            Atom::new(AtomId(1), 8),
            Atom::new(AtomId(2), 1),
            Atom::new(AtomId(3), 1),
            Atom::new(AtomId(4), 1),
        ];
        let bonds = [(0, 1), (0, 2), (0, 3), (1, 4)].map(|(a, b)| (AtomId(a), AtomId(b)));
        Molecule::new(
            atoms,
            bonds,
            IndexerConfig {
                reduce_symmetry: true,
                improper_convention: convention,
            },
        )
        .unwrap()
    }

    fn nonbonded(n: usize) -> Force {
        Force::Nonbonded(NonbondedForce {
            particles: (0..n)
                .map(|i| NonbondedParticle {
                    charge: 0.1 * i as f64,
                    sigma: 3.0,
                    epsilon: 0.1,
                })
                .collect(),
            exceptions: vec![],
        })
    }

    fn system(torsions: Vec<TorsionTerm>) -> ClassicalSystem {
        let mut system = ClassicalSystem::new(5);
        system.add_force(nonbonded(5)).unwrap();
        system
            .add_force(Force::HarmonicBond(vec![
                HarmonicBondTerm { particles: [1, 0], length: 1.2, k: 900.0 },
                HarmonicBondTerm { particles: [0, 2], length: 1.1, k: 700.0 },
                HarmonicBondTerm { particles: [0, 3], length: 1.1, k: 700.0 },
                HarmonicBondTerm { particles: [4, 1], length: 0.97, k: 1000.0 },
            ]))
            .unwrap();
        system
            .add_force(Force::HarmonicAngle(vec![
                HarmonicAngleTerm { particles: [1, 0, 2], angle: 2.1, k: 80.0 },
                HarmonicAngleTerm { particles: [2, 0, 3], angle: 2.0, k: 70.0 },
                HarmonicAngleTerm { particles: [3, 0, 1], angle: 2.1, k: 80.0 },
                HarmonicAngleTerm { particles: [0, 1, 4], angle: 1.9, k: 90.0 },
            ]))
            .unwrap();
        system.add_force(Force::PeriodicTorsion(torsions)).unwrap();
        system
    }

    fn torsion(particles: [usize; 4], periodicity: u32, phase: f64, k: f64) -> TorsionTerm {
        TorsionTerm { particles, periodicity, phase, k }
    }

    fn default_torsions() -> Vec<TorsionTerm> {
        vec![
            torsion([2, 0, 1, 4], 2, PI, 1.5),
            torsion([4, 1, 0, 3], 2, PI, 1.5),
            torsion([2, 3, 0, 1], 2, PI, 10.5),
        ]
    }

    #[test]
    fn new_rejects_mismatched_lengths() {
        let result = Parameters::new(
            AtomParameters {
                atoms: vec![],
                charge: Array1::zeros(0),
                sigma: Array1::zeros(0),
                epsilon: Array1::zeros(0),
            },
            HarmonicParameters {
                ids: vec![ids([0, 1]), ids([1, 2]), ids([2, 3])],
                k: Array1::zeros(2),
                eq: Array1::zeros(3),
            },
            HarmonicParameters::empty(),
            TorsionParameters::empty(6),
            TorsionParameters::empty(6),
        );
        assert!(matches!(
            result,
            Err(ParameterError::LengthMismatch { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn new_rejects_torsion_shape_mismatch() {
        let mut propers = TorsionParameters::empty(6);
        propers.ids.push(ids([0, 1, 2, 3]));
        propers.ks = Array2::zeros((1, 6));
        propers.ns = Array2::zeros((1, 5));
        propers.phases = Array2::zeros((1, 6));
        let atoms = AtomParameters {
            atoms: vec![],
            charge: Array1::zeros(0),
            sigma: Array1::zeros(0),
            epsilon: Array1::zeros(0),
        };
        let result = Parameters::new(
            atoms,
            HarmonicParameters::empty(),
            HarmonicParameters::empty(),
            propers,
            TorsionParameters::empty(6),
        );
        assert!(matches!(result, Err(ParameterError::ShapeMismatch { .. })));
    }

    #[test]
    fn nan_filled_covers_every_tuple() {
        let mol = molecule(ImproperConvention::Cyclic);
        let params = Parameters::nan_filled(&mol, 6).unwrap();
        assert_eq!(params.bonds().len(), mol.bonds().len());
        assert_eq!(params.angles().len(), mol.angles().len());
        assert_eq!(params.propers().ks.shape(), &[mol.propers().len(), 6]);
        assert_eq!(params.impropers().len(), mol.impropers().len());
        assert!(params.is_nan_filled());
        assert!(params.validate_against(&mol).is_ok());
    }

    #[test]
    fn from_system_follows_molecule_order() {
        let mol = molecule(ImproperConvention::Cyclic);
        let params =
            Parameters::from_system(&system(default_torsions()), &mol, &ExtractionOptions::default())
                .unwrap();
        assert_eq!(params.bonds().ids, mol.bonds().as_slice());
        // Bond [1, 0] in the system maps onto the molecule's [0, 1].
        assert_eq!(params.bonds().k[0], 900.0);
        assert_eq!(params.angles().len(), 4);
        assert_eq!(params.atoms().charge.len(), 5);
        assert!(!params.is_nan_filled());
        assert!(params.validate_against(&mol).is_ok());
    }

    #[test]
    fn torsions_are_classified_by_atom_set() {
        let mol = molecule(ImproperConvention::Cyclic);
        let params =
            Parameters::from_system(&system(default_torsions()), &mol, &ExtractionOptions::default())
                .unwrap();
        assert_eq!(params.propers().len(), 2);
        assert_eq!(params.impropers().len(), 1);
        assert!((params.impropers().ks[[0, 1]] - 10.5).abs() < 1e-12);
        assert!((params.impropers().phases[[0, 1]] - PI).abs() < 1e-12);
        assert_eq!(params.propers().ns.row(0).to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn negative_k_folds_into_phase() {
        let mol = molecule(ImproperConvention::Cyclic);
        let torsions = vec![torsion([2, 0, 1, 4], 3, 0.0, -2.0)];
        let params =
            Parameters::from_system(&system(torsions), &mol, &ExtractionOptions::default()).unwrap();
        assert!((params.propers().ks[[0, 2]] - 2.0).abs() < 1e-12);
        assert!((params.propers().phases[[0, 2]] - PI).abs() < 1e-12);
    }

    #[test]
    fn repeated_terms_are_added_as_phasors() {
        let mol = molecule(ImproperConvention::Cyclic);
        let torsions = vec![
            torsion([2, 0, 1, 4], 1, 0.0, 1.0),
            torsion([4, 1, 0, 2], 1, PI / 2.0, 1.0),
        ];
        let params =
            Parameters::from_system(&system(torsions), &mol, &ExtractionOptions::default()).unwrap();
        assert_eq!(params.propers().len(), 1);
        assert!((params.propers().ks[[0, 0]] - 2f64.sqrt()).abs() < 1e-12);
        assert!((params.propers().phases[[0, 0]] - PI / 4.0).abs() < 1e-12);
    }

    #[test]
    fn periodicity_above_maximum_fails() {
        let mol = molecule(ImproperConvention::Cyclic);
        let torsions = vec![torsion([2, 0, 1, 4], 7, 0.0, 1.0)];
        let result = Parameters::from_system(&system(torsions), &mol, &ExtractionOptions::default());
        assert!(matches!(
            result,
            Err(ParameterError::PeriodicityOutOfRange { periodicity: 7, max: 6, .. })
        ));
    }

    #[test]
    fn unclassifiable_torsions_fail() {
        let mol = molecule(ImproperConvention::Cyclic);
        // 2-0-3-4 is not a path of the molecule and no atom is bonded to all others.
        let torsions = vec![torsion([2, 0, 3, 4], 1, 0.0, 1.0)];
        let result = Parameters::from_system(&system(torsions), &mol, &ExtractionOptions::default());
        assert!(matches!(result, Err(ParameterError::UnclassifiedTorsion { .. })));
    }

    #[test]
    fn missing_force_class_fails() {
        let mol = molecule(ImproperConvention::Cyclic);
        let mut sys = system(default_torsions());
        sys.retain_forces(&crate::core::forcefield::system::ForceFilter::remove(&["angle"]));
        let result = Parameters::from_system(&sys, &mol, &ExtractionOptions::default());
        assert!(matches!(
            result,
            Err(ParameterError::MissingForce { class_name }) if class_name == Force::HARMONIC_ANGLE
        ));
    }

    #[test]
    fn signed_wings_flip_phase_of_odd_orderings() {
        let mol = molecule(ImproperConvention::SignedWings);
        assert_eq!(mol.impropers().len(), 1);
        let stored = mol.impropers().as_slice()[0];
        // Swap the first two wings: an odd permutation of the stored tuple.
        let odd = [stored[1], stored[0], stored[2], stored[3]];
        let particles = odd.map(|id| mol.position(id).unwrap());
        let torsions = vec![torsion(particles, 2, 0.5, 3.0)];
        let params =
            Parameters::from_system(&system(torsions), &mol, &ExtractionOptions::default()).unwrap();
        assert!((params.impropers().phases[[0, 1]] - (TAU - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn dict_round_trip_is_bit_exact_including_nan() {
        let mol = molecule(ImproperConvention::Cyclic);
        let params = Parameters::nan_filled(&mol, 6).unwrap();
        let dict = params.to_dict();
        assert!(dict.keys().all(|k| k.starts_with("param_")));
        let restored = Parameters::from_dict(dict.clone()).unwrap();
        assert!(dicts_same_bits(&restored.to_dict(), &dict));
    }

    #[test]
    fn from_dict_rejects_unknown_keys() {
        let mol = molecule(ImproperConvention::Cyclic);
        let mut dict = Parameters::nan_filled(&mol, 6).unwrap().to_dict();
        dict.insert("param_extra".into(), array![1.0].into());
        assert!(matches!(
            Parameters::from_dict(dict),
            Err(ParameterError::UnknownKey { .. })
        ));
    }

    #[test]
    fn write_then_extract_reproduces_parameters() {
        let mol = molecule(ImproperConvention::Cyclic);
        let mut sys = system(default_torsions());
        let original = Parameters::from_system(&sys, &mol, &ExtractionOptions::default()).unwrap();

        let mut modified = original.clone();
        modified.bonds.k[0] = 1234.0;
        modified.propers.ks[[0, 2]] = 0.75;
        modified.impropers.ks[[0, 1]] = 4.0;
        modified.write_to_system(&mut sys, &mol).unwrap();

        let extracted = Parameters::from_system(&sys, &mol, &ExtractionOptions::default()).unwrap();
        assert_eq!(extracted.bonds().k[0], 1234.0);
        assert!((extracted.propers().ks[[0, 2]] - 0.75).abs() < 1e-12);
        assert!((extracted.propers().ks[[0, 1]] - original.propers().ks[[0, 1]]).abs() < 1e-12);
        assert!((extracted.impropers().ks[[0, 1]] - 4.0).abs() < 1e-12);
        assert_eq!(extracted.propers().ids, original.propers().ids);
    }

    #[test]
    fn write_rejects_nan_and_negative_k() {
        let mol = molecule(ImproperConvention::Cyclic);
        let mut sys = system(default_torsions());
        let nan = Parameters::nan_filled(&mol, 6).unwrap();
        assert!(matches!(
            nan.write_to_system(&mut sys, &mol),
            Err(ParameterError::InvalidK { .. })
        ));
        let mut negative =
            Parameters::from_system(&sys, &mol, &ExtractionOptions::default()).unwrap();
        negative.propers.ks[[0, 1]] = -1.0;
        assert!(matches!(
            negative.write_to_system(&mut sys, &mol),
            Err(ParameterError::InvalidK { value, .. }) if value == -1.0
        ));
    }

    #[test]
    fn aligned_features_pad_missing_rows_with_nan() {
        let mol = molecule(ImproperConvention::Cyclic);
        let params =
            Parameters::from_system(&system(default_torsions()), &mol, &ExtractionOptions::default())
                .unwrap();
        let (ks, _) = params.impropers().aligned_to(mol.impropers());
        assert_eq!(ks.nrows(), mol.impropers().len());
        let parameterized = ks.rows().into_iter().filter(|r| !r[0].is_nan()).count();
        assert_eq!(parameterized, 1);
    }
}
