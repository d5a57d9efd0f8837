use super::atom::Atom;
use super::features;
use super::graph::{InteractionNodes, MolecularGraph};
use super::ids::AtomId;
use super::residue::standard_formal_charge;
use super::topology::Topology;
use crate::core::forcefield::system::ClassicalSystem;
use crate::core::io::codec::{
    ArrayDict, ArrayValue, CodecError, KeyCodec, array_to_ids, array_to_tuples, ids_to_array,
    take_float, take_int, take_optional_float, take_optional_text, take_text, tuples_to_array,
};
use crate::core::tuples::class::{ImproperConvention, InteractionClass};
use crate::core::tuples::error::TupleError;
use crate::core::tuples::graph::ConnectivityGraph;
use crate::core::tuples::indexer::{IndexerConfig, TupleIndexer, TupleSets};
use crate::core::tuples::set::TupleSet;
use ndarray::{Array1, Array2, Ix1, Ix2};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, instrument};

const ATOMS: &str = "atoms";
const ATOMIC_NUMBERS: &str = "atomic_numbers";
const FORMAL_CHARGES: &str = "formal_charges";
const RADICALS: &str = "radicals";
const ATOM_NAMES: &str = "atom_names";
const RESIDUES: &str = "residues";
const BONDS: &str = "bonds";
const ANGLES: &str = "angles";
const PROPERS: &str = "propers";
const IMPROPERS: &str = "impropers";
const PARTIAL_CHARGES: &str = "partial_charges";
const CHARGE_MODEL: &str = "charge_model";
const IMPROPER_CONVENTION: &str = "improper_convention";
const REDUCE_SYMMETRY: &str = "reduce_symmetry";
const FEATURE_PREFIX: &str = "feat_";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MoleculeError {
    #[error(transparent)]
    Tuple(#[from] TupleError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Feature '{name}' has {found} rows, expected one per atom ({expected})")]
    FeatureRows {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Expected {expected} partial charges, got {found}")]
    ChargeCount { expected: usize, found: usize },

    #[error("The system has {found} particles but the topology has {expected} atoms")]
    ParticleCount { expected: usize, found: usize },

    #[error("Key '{key}' has {found} entries, expected {expected}")]
    Length {
        key: String,
        expected: usize,
        found: usize,
    },

    #[error("Key '{key}' holds an invalid value: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Key '{key}' is not a molecule field")]
    UnknownKey { key: String },
}

/// A molecule: atoms, bonds and the interaction tuples derived from them.
///
/// Tuples are derived once at construction and never edited. Only features, charges and
/// the charge-model tag can be attached afterwards.
#[derive(Debug, Clone)]
pub struct Molecule {
    atoms: Vec<Atom>,
    graph: ConnectivityGraph,
    tuples: TupleSets,
    config: IndexerConfig,
    partial_charges: Option<Array1<f64>>,
    charge_model: Option<String>,
    features: BTreeMap<String, Array2<f64>>,
}

impl Molecule {
    pub fn new(
        atoms: Vec<Atom>,
        bonds: impl IntoIterator<Item = (AtomId, AtomId)>,
        config: IndexerConfig,
    ) -> Result<Self, MoleculeError> {
        let graph = ConnectivityGraph::new(atoms.iter().map(|a| a.id), bonds)?;
        let tuples = TupleIndexer::new(config).index(&graph);
        Ok(Self {
            atoms,
            graph,
            tuples,
            config,
            partial_charges: None,
            charge_model: None,
            features: BTreeMap::new(),
        })
    }

    /// Builds a molecule from the topology a classical system was created for. Particle `i` of
    /// the system is atom `i` of the topology. Charges default to the system's nonbonded force.
    pub fn from_system(
        system: &ClassicalSystem,
        topology: &Topology,
        charges: Option<&[f64]>,
        charge_model: Option<String>,
        config: IndexerConfig,
    ) -> Result<Self, MoleculeError> {
        if system.n_particles() != topology.len() {
            return Err(MoleculeError::ParticleCount {
                expected: topology.len(),
                found: system.n_particles(),
            });
        }
        let atoms = topology.atoms.iter().map(|a| a.to_atom()).collect();
        let mut molecule = Self::new(atoms, topology.bond_pairs(), config)?;
        let charges = match charges {
            Some(c) => Some(c.to_vec()),
            None => system.partial_charges(),
        };
        if let Some(charges) = charges {
            molecule.set_partial_charges(Array1::from(charges))?;
        }
        molecule.charge_model = charge_model;
        Ok(molecule)
    }

    /// Builds a molecule from a structure description with atom and residue names.
    ///
    /// When no atom carries a formal charge, charged side-chain atoms of standard residues
    /// get their textbook charge. Adds the `residue` and `is_radical` features.
    #[instrument(level = "debug", skip_all, fields(atoms = topology.len()))]
    pub fn from_structure(topology: &Topology, config: IndexerConfig) -> Result<Self, MoleculeError> {
        let guess_charges = !topology.has_formal_charges();
        let atoms: Vec<Atom> = topology
            .atoms
            .iter()
            .map(|a| {
                let mut atom = a.to_atom();
                if guess_charges {
                    if let (Some(res), Some(name)) = (&a.residue, &a.name) {
                        atom.formal_charge = standard_formal_charge(res, name);
                    }
                }
                atom
            })
            .collect();
        if guess_charges {
            debug!("Structure carries no formal charges, using standard residue charges");
        }
        let mut molecule = Self::new(atoms, topology.bond_pairs(), config)?;
        molecule.add_feature(features::RESIDUE, features::residue_one_hot(&molecule.atoms))?;
        molecule.add_feature(features::IS_RADICAL, features::is_radical(&molecule.atoms))?;
        Ok(molecule)
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn n_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn atom_ids(&self) -> Vec<AtomId> {
        self.graph.atoms().to_vec()
    }

    pub fn graph(&self) -> &ConnectivityGraph {
        &self.graph
    }

    pub fn tuples(&self) -> &TupleSets {
        &self.tuples
    }

    pub fn bonds(&self) -> &TupleSet<2> {
        &self.tuples.bonds
    }

    pub fn angles(&self) -> &TupleSet<3> {
        &self.tuples.angles
    }

    pub fn propers(&self) -> &TupleSet<4> {
        &self.tuples.propers
    }

    pub fn impropers(&self) -> &TupleSet<4> {
        &self.tuples.impropers
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        self.config
    }

    pub fn improper_convention(&self) -> ImproperConvention {
        self.config.improper_convention
    }

    /// Position of `id` in the atom order.
    pub fn position(&self, id: AtomId) -> Option<usize> {
        self.graph.position(id)
    }

    pub fn partial_charges(&self) -> Option<&Array1<f64>> {
        self.partial_charges.as_ref()
    }

    pub fn set_partial_charges(&mut self, charges: Array1<f64>) -> Result<(), MoleculeError> {
        if charges.len() != self.n_atoms() {
            return Err(MoleculeError::ChargeCount {
                expected: self.n_atoms(),
                found: charges.len(),
            });
        }
        self.partial_charges = Some(charges);
        Ok(())
    }

    pub fn charge_model(&self) -> Option<&str> {
        self.charge_model.as_deref()
    }

    pub fn set_charge_model(&mut self, tag: Option<String>) {
        self.charge_model = tag;
    }

    pub fn features(&self) -> &BTreeMap<String, Array2<f64>> {
        &self.features
    }

    pub fn feature(&self, name: &str) -> Option<&Array2<f64>> {
        self.features.get(name)
    }

    /// Attaches a per-atom feature matrix, replacing any feature of the same name.
    pub fn add_feature(
        &mut self,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> Result<(), MoleculeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(MoleculeError::InvalidValue {
                key: KeyCodec::molecule_key(FEATURE_PREFIX),
                reason: "feature name is empty".to_string(),
            });
        }
        if values.nrows() != self.n_atoms() {
            return Err(MoleculeError::FeatureRows {
                name,
                expected: self.n_atoms(),
                found: values.nrows(),
            });
        }
        if self.features.insert(name.clone(), values).is_some() {
            debug!(feature = %name, "Replaced existing feature");
        }
        Ok(())
    }

    /// Attaches the features computed from atoms and connectivity alone.
    pub fn add_standard_features(&mut self) -> Result<(), MoleculeError> {
        self.add_feature(features::RING_ENCODING, features::ring_encoding(&self.graph))?;
        self.add_feature(features::DEGREE, features::degree_one_hot(&self.graph))?;
        self.add_feature(features::MASS, features::mass(&self.atoms))?;
        self.add_feature(features::FORMAL_CHARGE, features::formal_charge(&self.atoms))?;
        self.add_feature(features::IS_RADICAL, features::is_radical(&self.atoms))?;
        Ok(())
    }

    fn positions_of<const N: usize>(&self, tuples: &[[AtomId; N]]) -> Array2<usize> {
        let mut idxs = Array2::zeros((tuples.len(), N));
        for (row, tuple) in tuples.iter().enumerate() {
            for (col, id) in tuple.iter().enumerate() {
                // Tuples are derived from the graph, so every id has a position.
                idxs[[row, col]] = self.graph.position(*id).unwrap_or_default();
            }
        }
        idxs
    }

    /// Graph representation: atom features on `n1`, atom positions on the interaction levels.
    pub fn to_graph(&self) -> MolecularGraph {
        let n = self.n_atoms();
        let mut atom_features = self.features.clone();
        atom_features.insert(
            features::ATOMIC_NUMBER.to_string(),
            features::atomic_number_one_hot(&self.atoms),
        );
        if let Some(q) = &self.partial_charges {
            atom_features.insert(
                features::PARTIAL_CHARGE.to_string(),
                q.clone().into_shape_with_order((n, 1)).unwrap_or_else(|_| Array2::zeros((n, 1))),
            );
        }
        if let Some(onehot) = self
            .charge_model
            .as_deref()
            .and_then(|tag| features::charge_model_one_hot(tag, n))
        {
            atom_features.insert(features::CHARGE_MODEL.to_string(), onehot);
        }

        MolecularGraph {
            atom_ids: self.atom_ids(),
            atom_features,
            bonds: InteractionNodes::new(self.positions_of(self.tuples.bonds.as_slice())),
            angles: InteractionNodes::new(self.positions_of(self.tuples.angles.as_slice())),
            propers: InteractionNodes::new(self.positions_of(self.tuples.propers.as_slice())),
            impropers: InteractionNodes::new(self.positions_of(self.tuples.impropers.as_slice())),
            global: BTreeMap::new(),
            conformations: None,
        }
    }

    pub fn to_dict(&self) -> ArrayDict {
        let key = KeyCodec::molecule_key;
        let mut dict = ArrayDict::new();
        dict.insert(key(ATOMS), ids_to_array(&self.atom_ids()).into());
        dict.insert(
            key(ATOMIC_NUMBERS),
            self.atoms
                .iter()
                .map(|a| i64::from(a.atomic_number))
                .collect::<Array1<i64>>()
                .into(),
        );
        dict.insert(
            key(FORMAL_CHARGES),
            self.atoms
                .iter()
                .map(|a| i64::from(a.formal_charge))
                .collect::<Array1<i64>>()
                .into(),
        );
        dict.insert(
            key(RADICALS),
            self.atoms
                .iter()
                .map(|a| i64::from(a.is_radical))
                .collect::<Array1<i64>>()
                .into(),
        );
        if self.atoms.iter().any(|a| a.name.is_some()) {
            dict.insert(key(ATOM_NAMES), join_lines(self.atoms.iter().map(|a| &a.name)).into());
        }
        if self.atoms.iter().any(|a| a.residue.is_some()) {
            dict.insert(key(RESIDUES), join_lines(self.atoms.iter().map(|a| &a.residue)).into());
        }
        dict.insert(key(BONDS), tuples_to_array(self.tuples.bonds.as_slice()).into());
        dict.insert(key(ANGLES), tuples_to_array(self.tuples.angles.as_slice()).into());
        dict.insert(key(PROPERS), tuples_to_array(self.tuples.propers.as_slice()).into());
        dict.insert(key(IMPROPERS), tuples_to_array(self.tuples.impropers.as_slice()).into());
        if let Some(q) = &self.partial_charges {
            dict.insert(key(PARTIAL_CHARGES), q.clone().into());
        }
        if let Some(tag) = &self.charge_model {
            dict.insert(key(CHARGE_MODEL), ArrayValue::Text(tag.clone()));
        }
        dict.insert(
            key(IMPROPER_CONVENTION),
            ArrayValue::Text(self.config.improper_convention.tag().to_string()),
        );
        dict.insert(
            key(REDUCE_SYMMETRY),
            Array1::from(vec![i64::from(self.config.reduce_symmetry)]).into(),
        );
        for (name, values) in &self.features {
            dict.insert(key(&format!("{}{}", FEATURE_PREFIX, name)), values.clone().into());
        }
        dict
    }

    /// Restores a molecule from its `mol_` entries. Every entry of `dict` must be consumed.
    pub fn from_dict(mut dict: ArrayDict) -> Result<Self, MoleculeError> {
        let key = KeyCodec::molecule_key;

        let atoms_key = key(ATOMS);
        let ids = array_to_ids(&atoms_key, &take_int::<Ix1>(&mut dict, &atoms_key)?)?;
        let n = ids.len();
        let numbers = take_column(&mut dict, &key(ATOMIC_NUMBERS), n)?;
        let charges = take_column(&mut dict, &key(FORMAL_CHARGES), n)?;
        let radicals = take_column(&mut dict, &key(RADICALS), n)?;
        let names = take_optional_lines(&mut dict, &key(ATOM_NAMES), n)?;
        let residues = take_optional_lines(&mut dict, &key(RESIDUES), n)?;

        let mut atoms = Vec::with_capacity(n);
        for i in 0..n {
            let atomic_number =
                u8::try_from(numbers[i]).map_err(|_| MoleculeError::InvalidValue {
                    key: key(ATOMIC_NUMBERS),
                    reason: format!("{} is not an atomic number", numbers[i]),
                })?;
            let formal_charge =
                i32::try_from(charges[i]).map_err(|_| MoleculeError::InvalidValue {
                    key: key(FORMAL_CHARGES),
                    reason: format!("{} is out of range", charges[i]),
                })?;
            atoms.push(Atom {
                id: ids[i],
                atomic_number,
                formal_charge,
                name: names.as_ref().and_then(|v| v[i].clone()),
                residue: residues.as_ref().and_then(|v| v[i].clone()),
                is_radical: radicals[i] != 0,
            });
        }

        let convention_key = key(IMPROPER_CONVENTION);
        let tag = take_text(&mut dict, &convention_key)?;
        let improper_convention =
            ImproperConvention::from_tag(&tag).ok_or_else(|| MoleculeError::InvalidValue {
                key: convention_key.clone(),
                reason: format!("unknown improper convention '{}'", tag),
            })?;
        let reduce_symmetry = take_column(&mut dict, &key(REDUCE_SYMMETRY), 1)?[0] != 0;
        let config = IndexerConfig {
            reduce_symmetry,
            improper_convention,
        };

        let bonds = take_tuples::<2>(&mut dict, &key(BONDS))?;
        let graph = ConnectivityGraph::new(ids.iter().copied(), bonds.iter().map(|&[a, b]| (a, b)))?;
        let mut tuples = TupleSets::empty(improper_convention);
        tuples.bonds = TupleSet::bonds().restore(bonds);
        tuples.angles = TupleSet::angles().restore(take_tuples::<3>(&mut dict, &key(ANGLES))?);
        tuples.propers = TupleSet::propers().restore(take_tuples::<4>(&mut dict, &key(PROPERS))?);
        tuples.impropers = TupleSet::impropers(improper_convention)
            .restore(take_tuples::<4>(&mut dict, &key(IMPROPERS))?);
        check_connected(&graph, &tuples)?;

        let partial_charges = take_optional_float::<Ix1>(&mut dict, &key(PARTIAL_CHARGES))?;
        let charge_model = take_optional_text(&mut dict, &key(CHARGE_MODEL))?;

        let mut molecule = Self {
            atoms,
            graph,
            tuples,
            config,
            partial_charges: None,
            charge_model,
            features: BTreeMap::new(),
        };
        if let Some(q) = partial_charges {
            molecule.set_partial_charges(q)?;
        }

        let feature_prefix = key(FEATURE_PREFIX);
        let remaining: Vec<String> = dict.keys().cloned().collect();
        for k in remaining {
            let Some(name) = k.strip_prefix(&feature_prefix) else {
                return Err(MoleculeError::UnknownKey { key: k });
            };
            let values = take_float::<Ix2>(&mut dict, &k)?;
            molecule.add_feature(name, values)?;
        }
        Ok(molecule)
    }
}

// A restored molecule rebuilds its graph from the stored bond tuples, so neighbor order can
// differ from the saved molecule. Equality is therefore defined on the tuple sets.
impl PartialEq for Molecule {
    fn eq(&self, other: &Self) -> bool {
        self.atoms == other.atoms
            && self.tuples == other.tuples
            && self.config == other.config
            && self.partial_charges == other.partial_charges
            && self.charge_model == other.charge_model
            && self.features == other.features
    }
}

fn join_lines<'a>(values: impl Iterator<Item = &'a Option<String>>) -> String {
    values
        .map(|v| v.as_deref().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
}

fn take_optional_lines(
    dict: &mut ArrayDict,
    key: &str,
    n: usize,
) -> Result<Option<Vec<Option<String>>>, MoleculeError> {
    let Some(text) = take_optional_text(dict, key)? else {
        return Ok(None);
    };
    let lines: Vec<Option<String>> = if n == 0 {
        Vec::new()
    } else {
        text.split('\n')
            .map(|l| (!l.is_empty()).then(|| l.to_string()))
            .collect()
    };
    if lines.len() != n {
        return Err(MoleculeError::Length {
            key: key.to_string(),
            expected: n,
            found: lines.len(),
        });
    }
    Ok(Some(lines))
}

fn take_column(dict: &mut ArrayDict, key: &str, n: usize) -> Result<Array1<i64>, MoleculeError> {
    let values = take_int::<Ix1>(dict, key)?;
    if values.len() != n {
        return Err(MoleculeError::Length {
            key: key.to_string(),
            expected: n,
            found: values.len(),
        });
    }
    Ok(values)
}

fn take_tuples<const N: usize>(
    dict: &mut ArrayDict,
    key: &str,
) -> Result<Vec<[AtomId; N]>, MoleculeError> {
    let array = take_int::<Ix2>(dict, key)?;
    Ok(array_to_tuples::<N>(key, &array)?)
}

fn check_connected(graph: &ConnectivityGraph, tuples: &TupleSets) -> Result<(), MoleculeError> {
    fn check<const N: usize>(
        graph: &ConnectivityGraph,
        class: InteractionClass,
        tuple: &[AtomId; N],
        pairs: &[(usize, usize)],
    ) -> Result<(), TupleError> {
        if pairs.iter().all(|&(i, j)| graph.are_bonded(tuple[i], tuple[j])) {
            Ok(())
        } else {
            Err(TupleError::Disconnected {
                class,
                tuple: tuple.to_vec(),
            })
        }
    }
    const CHAIN3: [(usize, usize); 2] = [(0, 1), (1, 2)];
    const CHAIN4: [(usize, usize); 3] = [(0, 1), (1, 2), (2, 3)];
    const STAR: [(usize, usize); 3] = [(0, 2), (1, 2), (3, 2)];
    for t in tuples.angles.iter() {
        check(graph, InteractionClass::Angle, t, &CHAIN3)?;
    }
    for t in tuples.propers.iter() {
        check(graph, InteractionClass::Proper, t, &CHAIN4)?;
    }
    for t in tuples.impropers.iter() {
        check(graph, InteractionClass::Improper, t, &STAR)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::system::{Force, NonbondedForce, NonbondedParticle};
    use crate::core::io::codec::dicts_same_bits;
    use crate::core::models::topology::TopologyAtom;

    fn ethanol_like() -> Molecule {
        // C0-C1-O2 backbone with hydrogens on C0.
        let atoms = vec![
            Atom::new(AtomId(0), 6),
            Atom::new(AtomId(1), 6),
            Atom::new(AtomId(2), 8),
            Atom::new(AtomId(3), 1),
            Atom::new(AtomId(4), 1),
            Atom::new(AtomId(5), 1),
        ];
        let bonds = [(0, 1), (1, 2), (0, 3), (0, 4), (0, 5)]
            .map(|(a, b)| (AtomId(a), AtomId(b)));
        Molecule::new(atoms, bonds, IndexerConfig::default()).unwrap()
    }

    fn glutamate_fragment() -> Topology {
        let mut cd = TopologyAtom::new(AtomId(10), 6);
        cd.name = Some("CD".into());
        cd.residue = Some("GLU".into());
        let mut oe1 = TopologyAtom::new(AtomId(11), 8);
        oe1.name = Some("OE1".into());
        oe1.residue = Some("GLU".into());
        let mut oe2 = TopologyAtom::new(AtomId(12), 8);
        oe2.name = Some("OE2".into());
        oe2.residue = Some("GLU".into());
        oe2.is_radical = true;
        Topology::new(
            vec![cd, oe1, oe2],
            vec![[AtomId(10), AtomId(11)], [AtomId(10), AtomId(12)]],
        )
    }

    #[test]
    fn new_derives_tuples() {
        let mol = ethanol_like();
        assert_eq!(mol.bonds().len(), 5);
        assert_eq!(mol.angles().len(), 7);
        assert_eq!(mol.propers().len(), 3);
        assert_eq!(mol.impropers().len(), 8);
    }

    #[test]
    fn add_feature_validates_row_count() {
        let mut mol = ethanol_like();
        let result = mol.add_feature("bad", Array2::zeros((2, 1)));
        assert!(matches!(
            result,
            Err(MoleculeError::FeatureRows {
                expected: 6,
                found: 2,
                ..
            })
        ));
        mol.add_feature("good", Array2::ones((6, 2))).unwrap();
        assert_eq!(mol.feature("good").map(|f| f.ncols()), Some(2));
    }

    #[test]
    fn standard_features_have_one_row_per_atom() {
        let mut mol = ethanol_like();
        mol.add_standard_features().unwrap();
        for name in [
            features::RING_ENCODING,
            features::DEGREE,
            features::MASS,
            features::FORMAL_CHARGE,
            features::IS_RADICAL,
        ] {
            assert_eq!(mol.feature(name).map(|f| f.nrows()), Some(6), "{}", name);
        }
    }

    #[test]
    fn from_structure_applies_standard_charges_and_features() {
        let mol = Molecule::from_structure(&glutamate_fragment(), IndexerConfig::default()).unwrap();
        let charges: Vec<i32> = mol.atoms().iter().map(|a| a.formal_charge).collect();
        assert_eq!(charges, vec![0, -1, 0]);
        let residue = mol.feature(features::RESIDUE).unwrap();
        assert_eq!(residue[[1, 6]], 1.0);
        let radical = mol.feature(features::IS_RADICAL).unwrap();
        assert_eq!(radical.column(0).to_vec(), vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn from_structure_keeps_explicit_charges() {
        let mut topology = glutamate_fragment();
        topology.atoms[2].formal_charge = Some(-1);
        let mol = Molecule::from_structure(&topology, IndexerConfig::default()).unwrap();
        let charges: Vec<i32> = mol.atoms().iter().map(|a| a.formal_charge).collect();
        assert_eq!(charges, vec![0, 0, -1]);
    }

    #[test]
    fn from_system_reads_charges_from_nonbonded_force() {
        let topology = glutamate_fragment();
        let mut system = ClassicalSystem::new(3);
        system
            .add_force(Force::Nonbonded(NonbondedForce {
                particles: [0.7, -0.8, -0.9]
                    .iter()
                    .map(|&charge| NonbondedParticle {
                        charge,
                        sigma: 3.0,
                        epsilon: 0.2,
                    })
                    .collect(),
                exceptions: vec![],
            }))
            .unwrap();
        let mol = Molecule::from_system(
            &system,
            &topology,
            None,
            Some("amber99".into()),
            IndexerConfig::default(),
        )
        .unwrap();
        assert_eq!(mol.partial_charges().unwrap().to_vec(), vec![0.7, -0.8, -0.9]);
        assert_eq!(mol.charge_model(), Some("amber99"));

        let wrong = ClassicalSystem::new(2);
        assert!(matches!(
            Molecule::from_system(&wrong, &topology, None, None, IndexerConfig::default()),
            Err(MoleculeError::ParticleCount { .. })
        ));
    }

    #[test]
    fn dict_round_trip_is_lossless() {
        let mut mol = Molecule::from_structure(&glutamate_fragment(), IndexerConfig::default()).unwrap();
        mol.add_standard_features().unwrap();
        mol.set_partial_charges(Array1::from(vec![0.1, f64::NAN, -0.3])).unwrap();
        mol.set_charge_model(Some("am1BCC".into()));
        let dict = mol.to_dict();
        let restored = Molecule::from_dict(dict.clone()).unwrap();
        assert!(dicts_same_bits(&restored.to_dict(), &dict));
        assert_eq!(restored.atoms(), mol.atoms());
        assert_eq!(restored.tuples(), mol.tuples());
    }

    #[test]
    fn from_dict_rejects_unknown_and_disconnected_entries() {
        let mol = ethanol_like();
        let mut dict = mol.to_dict();
        dict.insert("mol_extra".into(), ArrayValue::Text("x".into()));
        assert!(matches!(
            Molecule::from_dict(dict),
            Err(MoleculeError::UnknownKey { .. })
        ));

        let mut dict = mol.to_dict();
        dict.insert(
            KeyCodec::molecule_key(PROPERS),
            ndarray::array![[3_i64, 2, 1, 0]].into(),
        );
        assert!(matches!(
            Molecule::from_dict(dict),
            Err(MoleculeError::Tuple(TupleError::Disconnected { .. }))
        ));
    }

    #[test]
    fn graph_uses_positions_not_ids() {
        let atoms = vec![Atom::new(AtomId(7), 6), Atom::new(AtomId(3), 6)];
        let mol = Molecule::new(atoms, [(AtomId(7), AtomId(3))], IndexerConfig::default()).unwrap();
        let graph = mol.to_graph();
        assert_eq!(graph.bonds.idxs, ndarray::array![[0_usize, 1]]);
        assert_eq!(graph.ids_for(&graph.bonds.idxs).unwrap(), vec![vec![AtomId(7), AtomId(3)]]);
        assert!(graph.atom_features.contains_key(features::ATOMIC_NUMBER));
    }

    #[test]
    fn empty_molecule_round_trips() {
        let mol = Molecule::new(vec![], [], IndexerConfig::default()).unwrap();
        let restored = Molecule::from_dict(mol.to_dict()).unwrap();
        assert_eq!(restored, mol);
    }
}
