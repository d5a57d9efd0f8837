use super::config::MolDataOptions;
use super::error::MolDataError;
use crate::core::forcefield::parameters::Parameters;
use crate::core::forcefield::system::{ClassicalSystem, Force, ForceFilter};
use crate::core::io::codec::{
    ArrayDict, ArrayValue, CodecError, FfField, KeyClass, KeyCodec, insert_unique,
    merge_disjoint, take_float, take_optional_float, take_optional_text, take_text,
};
use crate::core::io::traits::ArrayArchive;
use crate::core::models::graph::{ConformationTargets, MolecularGraph};
use crate::core::models::molecule::Molecule;
use crate::core::models::topology::Topology;
use crate::core::tuples::class::{InteractionClass, sorted_key};
use crate::engine::{ForceFieldEngine, TopologyResolver};
use ndarray::{Array1, Array3, ArrayView3, Axis, Ix1, Ix3};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, instrument, warn};

const XYZ: &str = "xyz";
const ENERGY: &str = "energy";
const GRADIENT: &str = "gradient";
const ENERGY_REF: &str = "energy_ref";
const GRADIENT_REF: &str = "gradient_ref";
const MOL_ID: &str = "mol_id";
const MAPPED_SMILES: &str = "mapped_smiles";
const SMILES: &str = "smiles";
const PDB: &str = "pdb";
const SEQUENCE: &str = "sequence";
const IMPROPER_ENERGY_REF: &str = "improper_energy_ref";
const IMPROPER_GRADIENT_REF: &str = "improper_gradient_ref";

// Keys of input dictionaries accepted by `MolData::from_data_dict`.
const INPUT_ENERGY: &str = "energy_qm";
const INPUT_GRADIENT: &str = "gradient_qm";
const INPUT_CHARGES: &str = "partial_charges";

/// Where the reference energy and gradient come from.
#[derive(Debug, Clone)]
pub enum Reference {
    /// Already baseline-corrected. The energy is still mean-centered.
    Explicit {
        energy: Array1<f64>,
        gradient: Array3<f64>,
    },
    /// A nonbonded baseline to subtract from the QM data, stored under `ff_name`.
    Nonbonded {
        ff_name: String,
        energy: Array1<f64>,
        gradient: Array3<f64>,
    },
}

/// Optional chemical identifiers carried alongside the mol_id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identifiers {
    pub mapped_smiles: Option<String>,
    pub smiles: Option<String>,
    pub pdb: Option<String>,
    pub sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImproperReference {
    pub energy: Array1<f64>,
    pub gradient: Array3<f64>,
}

/// Unprocessed inputs of [`MolData::new`].
#[derive(Debug, Clone)]
pub struct RawMolData {
    pub molecule: Molecule,
    pub parameters: Parameters,
    /// `(n_confs, n_atoms, 3)`
    pub xyz: Array3<f64>,
    pub energy: Array1<f64>,
    pub gradient: Array3<f64>,
    pub reference: Reference,
    pub mol_id: String,
    pub identifiers: Identifiers,
    pub improper_reference: Option<ImproperReference>,
}

/// Conformations with QM targets, as delivered by a data source.
#[derive(Debug, Clone)]
pub struct Conformations {
    pub xyz: Array3<f64>,
    pub energy: Array1<f64>,
    pub gradient: Array3<f64>,
    /// Replaces the charges of the classical system before anything is evaluated.
    pub partial_charges: Option<Vec<f64>>,
}

/// One molecule with its conformations, QM targets, reference targets and parameters.
///
/// Every constructor and mutator validates the record: all per-conformation arrays agree on
/// `n_confs`, all gradients have the shape of `xyz`, the parameters cover only tuples of the
/// molecule, and the mol_id is usable for partitioning.
#[derive(Debug, Clone)]
pub struct MolData {
    molecule: Molecule,
    parameters: Parameters,
    xyz: Array3<f64>,
    energy: Array1<f64>,
    gradient: Array3<f64>,
    energy_ref: Array1<f64>,
    gradient_ref: Array3<f64>,
    improper_ref: Option<ImproperReference>,
    mol_id: String,
    identifiers: Identifiers,
    ff_energy: BTreeMap<String, Array1<f64>>,
    ff_gradient: BTreeMap<String, Array3<f64>>,
    ff_nonbonded_energy: BTreeMap<String, Array1<f64>>,
    ff_nonbonded_gradient: BTreeMap<String, Array3<f64>>,
}

fn center(energy: &mut Array1<f64>) {
    if let Some(mean) = energy.mean() {
        *energy -= mean;
    }
}

fn check_shape(mol_id: &str, key: &str, expected: &[usize], found: &[usize]) -> Result<(), MolDataError> {
    if expected == found {
        Ok(())
    } else {
        Err(MolDataError::Shape {
            mol_id: mol_id.to_string(),
            key: key.to_string(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        })
    }
}

fn check_mol_id(mol_id: &str) -> Result<(), MolDataError> {
    if mol_id.is_empty() || mol_id == "None" {
        return Err(MolDataError::InvalidMolId {
            value: mol_id.to_string(),
        });
    }
    Ok(())
}

impl MolData {
    /// Builds a record from raw arrays.
    ///
    /// With a [`Reference::Nonbonded`] baseline, `energy_ref = energy - E_nb` and
    /// `gradient_ref = gradient - G_nb`, and the baseline is kept as nonbonded data of its
    /// force field. The reference energy is mean-centered in both cases.
    pub fn new(raw: RawMolData) -> Result<Self, MolDataError> {
        let RawMolData {
            molecule,
            parameters,
            xyz,
            energy,
            gradient,
            reference,
            mol_id,
            identifiers,
            improper_reference,
        } = raw;
        check_mol_id(&mol_id)?;
        let n_confs = xyz.shape()[0];
        check_shape(&mol_id, ENERGY, &[n_confs], energy.shape())?;
        check_shape(&mol_id, GRADIENT, xyz.shape(), gradient.shape())?;

        let mut ff_nonbonded_energy = BTreeMap::new();
        let mut ff_nonbonded_gradient = BTreeMap::new();
        let (mut energy_ref, gradient_ref) = match reference {
            Reference::Explicit {
                energy: e_ref,
                gradient: g_ref,
            } => (e_ref, g_ref),
            Reference::Nonbonded {
                ff_name,
                energy: e_nb,
                gradient: g_nb,
            } => {
                let energy_key = KeyCodec::ff_key(FfField::NonbondedEnergy, &ff_name)?;
                let gradient_key = KeyCodec::ff_key(FfField::NonbondedGradient, &ff_name)?;
                check_shape(&mol_id, &energy_key, energy.shape(), e_nb.shape())?;
                check_shape(&mol_id, &gradient_key, gradient.shape(), g_nb.shape())?;
                let refs = (&energy - &e_nb, &gradient - &g_nb);
                ff_nonbonded_energy.insert(ff_name.clone(), e_nb);
                ff_nonbonded_gradient.insert(ff_name, g_nb);
                refs
            }
        };
        center(&mut energy_ref);

        let data = Self {
            molecule,
            parameters,
            xyz,
            energy,
            gradient,
            energy_ref,
            gradient_ref,
            improper_ref: improper_reference,
            mol_id,
            identifiers,
            ff_energy: BTreeMap::new(),
            ff_gradient: BTreeMap::new(),
            ff_nonbonded_energy,
            ff_nonbonded_gradient,
        };
        data.validate()?;
        Ok(data)
    }

    /// Derives a record from a classical system created for `topology`.
    ///
    /// The nonbonded forces of the system form the baseline subtracted from the QM data. When
    /// parameter extraction fails and `allow_nan_params` is set, the record carries NaN
    /// parameters instead.
    pub fn from_system(
        system: &ClassicalSystem,
        topology: &Topology,
        engine: &dyn ForceFieldEngine,
        conformations: Conformations,
        mol_id: impl Into<String>,
        identifiers: Identifiers,
        options: &MolDataOptions,
    ) -> Result<Self, MolDataError> {
        Self::from_system_with(
            system,
            topology,
            engine,
            conformations,
            mol_id.into(),
            identifiers,
            options,
            None,
        )
    }

    /// `from_system` with an optional explicit reference. Given one, the nonbonded baseline is
    /// not evaluated.
    #[instrument(skip_all, fields(mol_id = tracing::field::Empty))]
    fn from_system_with(
        system: &ClassicalSystem,
        topology: &Topology,
        engine: &dyn ForceFieldEngine,
        conformations: Conformations,
        mol_id: String,
        identifiers: Identifiers,
        options: &MolDataOptions,
        explicit: Option<(Array1<f64>, Array3<f64>)>,
    ) -> Result<Self, MolDataError> {
        tracing::Span::current().record("mol_id", mol_id.as_str());
        check_mol_id(&mol_id)?;

        let mut system = system.clone();
        if let Some(charges) = &conformations.partial_charges {
            engine.set_partial_charges(&mut system, charges)?;
        }
        let mut molecule = Molecule::from_system(
            &system,
            topology,
            conformations.partial_charges.as_deref(),
            options.charge_model.clone(),
            options.indexer,
        )?;
        molecule.add_standard_features()?;

        let parameters = match Parameters::from_system(&system, &molecule, &options.extraction()) {
            Ok(params) => params,
            Err(error) if options.allow_nan_params => {
                warn!(%mol_id, %error, "Parameter extraction failed, using NaN parameters");
                Parameters::nan_filled(&molecule, options.max_periodicity)?
            }
            Err(error) => return Err(error.into()),
        };

        let xyz = conformations.xyz.view();
        let reference = match explicit {
            Some((energy, gradient)) => Reference::Explicit { energy, gradient },
            None => {
                let nonbonded = engine.remove_forces(&system, &ForceFilter::keep(&["nonbonded"]));
                let (e_nb, f_nb) = engine.energies_and_forces(&nonbonded, xyz)?;
                Reference::Nonbonded {
                    ff_name: options.nonbonded_ff_name.clone(),
                    energy: e_nb,
                    gradient: -f_nb,
                }
            }
        };

        let improper_reference = if options.compute_improper_reference {
            Some(improper_reference(engine, &system, &molecule, xyz)?)
        } else {
            None
        };

        let data = Self::new(RawMolData {
            molecule,
            parameters,
            xyz: conformations.xyz,
            energy: conformations.energy,
            gradient: conformations.gradient,
            reference,
            mol_id,
            identifiers,
            improper_reference,
        })?;
        info!(
            atoms = data.n_atoms(),
            confs = data.n_confs(),
            "Created molecule data"
        );
        Ok(data)
    }

    /// Resolves `identifier`, parameterizes it with `engine` and derives a record whose mol_id
    /// and mapped SMILES are the identifier.
    pub fn from_identifier(
        identifier: &str,
        resolver: &dyn TopologyResolver,
        engine: &dyn ForceFieldEngine,
        conformations: Conformations,
        options: &MolDataOptions,
    ) -> Result<Self, MolDataError> {
        let topology = resolver.resolve(identifier)?;
        let system = engine.create_system(&topology)?;
        let identifiers = Identifiers {
            mapped_smiles: Some(identifier.to_string()),
            ..Identifiers::default()
        };
        Self::from_system(
            &system,
            &topology,
            engine,
            conformations,
            identifier,
            identifiers,
            options,
        )
    }

    /// Builds a record from an input dictionary.
    ///
    /// Required: `mapped_smiles` or `smiles`, `xyz`, `energy_qm` and `gradient_qm`. Optional:
    /// `partial_charges`, `pdb`, `sequence`, and energies and gradients of other force fields
    /// under their usual keys. Any other key is an error.
    ///
    /// `energy_ref` and `gradient_ref` come as a pair and replace the nonbonded baseline. Without
    /// them the baseline of `options.nonbonded_ff_name` is computed, and supplying nonbonded data
    /// under that name is a collision.
    pub fn from_data_dict(
        mut dict: ArrayDict,
        resolver: &dyn TopologyResolver,
        engine: &dyn ForceFieldEngine,
        options: &MolDataOptions,
    ) -> Result<Self, MolDataError> {
        let mapped_smiles = take_optional_text(&mut dict, MAPPED_SMILES)?;
        let smiles = take_optional_text(&mut dict, SMILES)?;
        let identifier = mapped_smiles
            .clone()
            .or_else(|| smiles.clone())
            .ok_or(MolDataError::MissingInput { key: MAPPED_SMILES })?;
        let conformations = Conformations {
            xyz: take_float::<Ix3>(&mut dict, XYZ)?,
            energy: take_float::<Ix1>(&mut dict, INPUT_ENERGY)?,
            gradient: take_float::<Ix3>(&mut dict, INPUT_GRADIENT)?,
            partial_charges: take_optional_float::<Ix1>(&mut dict, INPUT_CHARGES)?
                .map(|q| q.to_vec()),
        };
        let identifiers = Identifiers {
            mapped_smiles,
            smiles,
            pdb: take_optional_text(&mut dict, PDB)?,
            sequence: take_optional_text(&mut dict, SEQUENCE)?,
        };
        let explicit = match (
            take_optional_float::<Ix1>(&mut dict, ENERGY_REF)?,
            take_optional_float::<Ix3>(&mut dict, GRADIENT_REF)?,
        ) {
            (Some(energy), Some(gradient)) => {
                check_shape(&identifier, ENERGY_REF, conformations.energy.shape(), energy.shape())?;
                check_shape(
                    &identifier,
                    GRADIENT_REF,
                    conformations.gradient.shape(),
                    gradient.shape(),
                )?;
                Some((energy, gradient))
            }
            (None, None) => None,
            (Some(_), None) => return Err(missing(GRADIENT_REF)),
            (None, Some(_)) => return Err(missing(ENERGY_REF)),
        };
        let extras = FfEntries::collect(dict)?;
        if explicit.is_none() && extras.nonbonded.contains_key(&options.nonbonded_ff_name) {
            return Err(CodecError::Collision {
                key: KeyCodec::ff_key(FfField::NonbondedEnergy, &options.nonbonded_ff_name)?,
            }
            .into());
        }

        let topology = resolver.resolve(&identifier)?;
        let system = engine.create_system(&topology)?;
        let mut data = Self::from_system_with(
            &system,
            &topology,
            engine,
            conformations,
            identifier,
            identifiers,
            options,
            explicit,
        )?;
        extras.apply(&mut data)?;
        Ok(data)
    }

    pub fn molecule(&self) -> &Molecule {
        &self.molecule
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn xyz(&self) -> &Array3<f64> {
        &self.xyz
    }

    pub fn energy(&self) -> &Array1<f64> {
        &self.energy
    }

    pub fn gradient(&self) -> &Array3<f64> {
        &self.gradient
    }

    pub fn energy_ref(&self) -> &Array1<f64> {
        &self.energy_ref
    }

    pub fn gradient_ref(&self) -> &Array3<f64> {
        &self.gradient_ref
    }

    pub fn improper_ref(&self) -> Option<&ImproperReference> {
        self.improper_ref.as_ref()
    }

    pub fn mol_id(&self) -> &str {
        &self.mol_id
    }

    pub fn identifiers(&self) -> &Identifiers {
        &self.identifiers
    }

    pub fn n_confs(&self) -> usize {
        self.xyz.shape()[0]
    }

    pub fn n_atoms(&self) -> usize {
        self.molecule.n_atoms()
    }

    pub fn ff_energy(&self, name: &str) -> Option<&Array1<f64>> {
        self.ff_energy.get(name)
    }

    pub fn ff_gradient(&self, name: &str) -> Option<&Array3<f64>> {
        self.ff_gradient.get(name)
    }

    pub fn ff_nonbonded_energy(&self, name: &str) -> Option<&Array1<f64>> {
        self.ff_nonbonded_energy.get(name)
    }

    pub fn ff_nonbonded_gradient(&self, name: &str) -> Option<&Array3<f64>> {
        self.ff_nonbonded_gradient.get(name)
    }

    /// Names of all force fields with stored total energies.
    pub fn ff_names(&self) -> impl Iterator<Item = &str> {
        self.ff_energy.keys().map(String::as_str)
    }

    /// Stores the total energy and gradient of force field `name`, replacing earlier data.
    pub fn add_ff_data(
        &mut self,
        name: &str,
        energy: Array1<f64>,
        gradient: Array3<f64>,
    ) -> Result<(), MolDataError> {
        KeyCodec::validate_ff_name(name)?;
        let mut updated = self.clone();
        updated.ff_energy.insert(name.to_string(), energy);
        updated.ff_gradient.insert(name.to_string(), gradient);
        updated.validate()?;
        *self = updated;
        debug!(mol_id = %self.mol_id, ff = name, "Added force-field data");
        Ok(())
    }

    pub fn add_nonbonded_ff_data(
        &mut self,
        name: &str,
        energy: Array1<f64>,
        gradient: Array3<f64>,
    ) -> Result<(), MolDataError> {
        KeyCodec::validate_ff_name(name)?;
        let mut updated = self.clone();
        updated.ff_nonbonded_energy.insert(name.to_string(), energy);
        updated.ff_nonbonded_gradient.insert(name.to_string(), gradient);
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// Evaluates `system` on the stored conformations and stores the result under the
    /// engine's name.
    pub fn add_engine_ff_data(
        &mut self,
        engine: &dyn ForceFieldEngine,
        system: &ClassicalSystem,
    ) -> Result<(), MolDataError> {
        let (energy, forces) = engine.energies_and_forces(system, self.xyz.view())?;
        self.add_ff_data(engine.name(), energy, -forces)
    }

    pub fn validate(&self) -> Result<(), MolDataError> {
        let id = self.mol_id.as_str();
        check_mol_id(id)?;
        let n_confs = self.n_confs();
        let conf_shape = [n_confs, self.n_atoms(), 3];
        check_shape(id, XYZ, &conf_shape, self.xyz.shape())?;
        check_shape(id, ENERGY, &[n_confs], self.energy.shape())?;
        check_shape(id, GRADIENT, &conf_shape, self.gradient.shape())?;
        check_shape(id, ENERGY_REF, &[n_confs], self.energy_ref.shape())?;
        check_shape(id, GRADIENT_REF, &conf_shape, self.gradient_ref.shape())?;
        if let Some(imp) = &self.improper_ref {
            check_shape(id, IMPROPER_ENERGY_REF, &[n_confs], imp.energy.shape())?;
            check_shape(id, IMPROPER_GRADIENT_REF, &conf_shape, imp.gradient.shape())?;
        }
        let ff_key = |field: FfField, name: &str| format!("{}{}", field.prefix(), name);
        for (maps, (e_field, g_field)) in [
            (
                (&self.ff_energy, &self.ff_gradient),
                (FfField::Energy, FfField::Gradient),
            ),
            (
                (&self.ff_nonbonded_energy, &self.ff_nonbonded_gradient),
                (FfField::NonbondedEnergy, FfField::NonbondedGradient),
            ),
        ] {
            for (name, energy) in maps.0 {
                check_shape(id, &ff_key(e_field, name), &[n_confs], energy.shape())?;
            }
            for (name, gradient) in maps.1 {
                check_shape(id, &ff_key(g_field, name), &conf_shape, gradient.shape())?;
            }
        }
        self.parameters.validate_against(&self.molecule)?;
        Ok(())
    }

    pub fn to_dict(&self) -> Result<ArrayDict, MolDataError> {
        let mut dict = ArrayDict::new();
        insert_unique(&mut dict, XYZ, self.xyz.clone())?;
        insert_unique(&mut dict, ENERGY, self.energy.clone())?;
        insert_unique(&mut dict, GRADIENT, self.gradient.clone())?;
        insert_unique(&mut dict, ENERGY_REF, self.energy_ref.clone())?;
        insert_unique(&mut dict, GRADIENT_REF, self.gradient_ref.clone())?;
        insert_unique(&mut dict, MOL_ID, self.mol_id.as_str())?;
        let ids = &self.identifiers;
        for (key, value) in [
            (MAPPED_SMILES, &ids.mapped_smiles),
            (SMILES, &ids.smiles),
            (PDB, &ids.pdb),
            (SEQUENCE, &ids.sequence),
        ] {
            if let Some(text) = value {
                insert_unique(&mut dict, key, text.as_str())?;
            }
        }
        if let Some(imp) = &self.improper_ref {
            insert_unique(&mut dict, IMPROPER_ENERGY_REF, imp.energy.clone())?;
            insert_unique(&mut dict, IMPROPER_GRADIENT_REF, imp.gradient.clone())?;
        }
        merge_disjoint(&mut dict, self.molecule.to_dict())?;
        merge_disjoint(&mut dict, self.parameters.to_dict())?;
        for (field, map) in [
            (FfField::Energy, &self.ff_energy),
            (FfField::NonbondedEnergy, &self.ff_nonbonded_energy),
        ] {
            for (name, energy) in map {
                insert_unique(&mut dict, KeyCodec::ff_key(field, name)?, energy.clone())?;
            }
        }
        for (field, map) in [
            (FfField::Gradient, &self.ff_gradient),
            (FfField::NonbondedGradient, &self.ff_nonbonded_gradient),
        ] {
            for (name, gradient) in map {
                insert_unique(&mut dict, KeyCodec::ff_key(field, name)?, gradient.clone())?;
            }
        }
        Ok(dict)
    }

    /// Restores a record from [`MolData::to_dict`] output. Values are taken as stored, so
    /// nothing is re-centered.
    pub fn from_dict(dict: ArrayDict) -> Result<Self, MolDataError> {
        let mut record = ArrayDict::new();
        let mut molecule = ArrayDict::new();
        let mut parameters = ArrayDict::new();
        let mut ff = ArrayDict::new();
        let mut ff_keys = Vec::new();
        for (key, value) in dict {
            let class = KeyCodec::classify(&key)?;
            let target = match class {
                KeyClass::Record(_) => &mut record,
                KeyClass::Molecule(_) => &mut molecule,
                KeyClass::Parameters(_) => &mut parameters,
                KeyClass::ForceField { field, name } => {
                    ff_keys.push((field, name.to_string(), key.clone()));
                    &mut ff
                }
            };
            target.insert(key, value);
        }

        let improper_energy = take_optional_float::<Ix1>(&mut record, IMPROPER_ENERGY_REF)?;
        let improper_gradient = take_optional_float::<Ix3>(&mut record, IMPROPER_GRADIENT_REF)?;
        let improper_ref = match (improper_energy, improper_gradient) {
            (Some(energy), Some(gradient)) => Some(ImproperReference { energy, gradient }),
            (None, None) => None,
            (Some(_), None) => return Err(missing(IMPROPER_GRADIENT_REF)),
            (None, Some(_)) => return Err(missing(IMPROPER_ENERGY_REF)),
        };

        let mut data = Self {
            xyz: take_float::<Ix3>(&mut record, XYZ)?,
            energy: take_float::<Ix1>(&mut record, ENERGY)?,
            gradient: take_float::<Ix3>(&mut record, GRADIENT)?,
            energy_ref: take_float::<Ix1>(&mut record, ENERGY_REF)?,
            gradient_ref: take_float::<Ix3>(&mut record, GRADIENT_REF)?,
            mol_id: take_text(&mut record, MOL_ID)?,
            identifiers: Identifiers {
                mapped_smiles: take_optional_text(&mut record, MAPPED_SMILES)?,
                smiles: take_optional_text(&mut record, SMILES)?,
                pdb: take_optional_text(&mut record, PDB)?,
                sequence: take_optional_text(&mut record, SEQUENCE)?,
            },
            improper_ref,
            molecule: Molecule::from_dict(molecule)?,
            parameters: Parameters::from_dict(parameters)?,
            ff_energy: BTreeMap::new(),
            ff_gradient: BTreeMap::new(),
            ff_nonbonded_energy: BTreeMap::new(),
            ff_nonbonded_gradient: BTreeMap::new(),
        };
        for (field, name, key) in ff_keys {
            match field {
                FfField::Energy => {
                    data.ff_energy.insert(name, take_float::<Ix1>(&mut ff, &key)?);
                }
                FfField::NonbondedEnergy => {
                    data.ff_nonbonded_energy
                        .insert(name, take_float::<Ix1>(&mut ff, &key)?);
                }
                FfField::Gradient => {
                    data.ff_gradient.insert(name, take_float::<Ix3>(&mut ff, &key)?);
                }
                FfField::NonbondedGradient => {
                    data.ff_nonbonded_gradient
                        .insert(name, take_float::<Ix3>(&mut ff, &key)?);
                }
            }
        }
        data.validate()?;
        Ok(data)
    }

    /// Graph representation with reference parameters and conformational targets attached.
    ///
    /// Interaction levels get `k_ref`/`eq_ref` (bonds, angles) or `ks_ref`/`phases_ref`
    /// (torsions), NaN where the parameters do not cover a tuple of the molecule.
    pub fn to_graph(&self) -> Result<MolecularGraph, MolDataError> {
        let mut graph = self.molecule.to_graph();
        let params = &self.parameters;

        let (k, eq) = params.bonds().aligned_to(self.molecule.bonds());
        graph.add_interaction_feature(InteractionClass::Bond, "k_ref", k.insert_axis(Axis(1)))?;
        graph.add_interaction_feature(InteractionClass::Bond, "eq_ref", eq.insert_axis(Axis(1)))?;
        let (k, eq) = params.angles().aligned_to(self.molecule.angles());
        graph.add_interaction_feature(InteractionClass::Angle, "k_ref", k.insert_axis(Axis(1)))?;
        graph.add_interaction_feature(InteractionClass::Angle, "eq_ref", eq.insert_axis(Axis(1)))?;
        let (ks, phases) = params.propers().aligned_to(self.molecule.propers());
        graph.add_interaction_feature(InteractionClass::Proper, "ks_ref", ks)?;
        graph.add_interaction_feature(InteractionClass::Proper, "phases_ref", phases)?;
        let (ks, phases) = params.impropers().aligned_to(self.molecule.impropers());
        graph.add_interaction_feature(InteractionClass::Improper, "ks_ref", ks)?;
        graph.add_interaction_feature(InteractionClass::Improper, "phases_ref", phases)?;

        let atoms_first = |array: &Array3<f64>| {
            array
                .view()
                .permuted_axes([1, 0, 2])
                .as_standard_layout()
                .into_owned()
        };
        graph.conformations = Some(ConformationTargets {
            xyz: atoms_first(&self.xyz),
            energy_ref: self.energy_ref.clone(),
            gradient_ref: atoms_first(&self.gradient_ref),
        });
        Ok(graph)
    }

    /// Hex BLAKE3 hash of the serialized record.
    pub fn content_digest(&self) -> Result<String, MolDataError> {
        Ok(digest_dict(&self.to_dict()?))
    }
}

impl ArrayArchive for MolData {
    type Error = MolDataError;

    fn to_array_dict(&self) -> Result<ArrayDict, MolDataError> {
        self.to_dict()
    }

    fn from_array_dict(dict: ArrayDict) -> Result<Self, MolDataError> {
        Self::from_dict(dict)
    }
}

fn missing(key: &str) -> MolDataError {
    CodecError::MissingKey {
        key: key.to_string(),
    }
    .into()
}

/// Energy and gradient pairs of additional force fields found in an input dictionary.
struct FfEntries {
    total: BTreeMap<String, (Option<Array1<f64>>, Option<Array3<f64>>)>,
    nonbonded: BTreeMap<String, (Option<Array1<f64>>, Option<Array3<f64>>)>,
}

impl FfEntries {
    fn collect(mut dict: ArrayDict) -> Result<Self, MolDataError> {
        let mut entries = Self {
            total: BTreeMap::new(),
            nonbonded: BTreeMap::new(),
        };
        let keys: Vec<String> = dict.keys().cloned().collect();
        for key in keys {
            let KeyClass::ForceField { field, name } = KeyCodec::classify(&key)? else {
                return Err(CodecError::UnknownKey { key: key.clone() }.into());
            };
            let name = name.to_string();
            let slot = match field {
                FfField::Energy | FfField::Gradient => entries.total.entry(name).or_default(),
                FfField::NonbondedEnergy | FfField::NonbondedGradient => {
                    entries.nonbonded.entry(name).or_default()
                }
            };
            match field {
                FfField::Energy | FfField::NonbondedEnergy => {
                    slot.0 = Some(take_float::<Ix1>(&mut dict, &key)?)
                }
                FfField::Gradient | FfField::NonbondedGradient => {
                    slot.1 = Some(take_float::<Ix3>(&mut dict, &key)?)
                }
            }
        }
        Ok(entries)
    }

    fn apply(self, data: &mut MolData) -> Result<(), MolDataError> {
        for (name, pair) in self.total {
            let (energy, gradient) = complete(pair, FfField::Energy, FfField::Gradient, &name)?;
            data.add_ff_data(&name, energy, gradient)?;
        }
        for (name, pair) in self.nonbonded {
            let (energy, gradient) = complete(
                pair,
                FfField::NonbondedEnergy,
                FfField::NonbondedGradient,
                &name,
            )?;
            data.add_nonbonded_ff_data(&name, energy, gradient)?;
        }
        Ok(())
    }
}

fn complete(
    pair: (Option<Array1<f64>>, Option<Array3<f64>>),
    energy_field: FfField,
    gradient_field: FfField,
    name: &str,
) -> Result<(Array1<f64>, Array3<f64>), MolDataError> {
    match pair {
        (Some(energy), Some(gradient)) => Ok((energy, gradient)),
        (None, _) => Err(missing(&format!("{}{}", energy_field.prefix(), name))),
        (_, None) => Err(missing(&format!("{}{}", gradient_field.prefix(), name))),
    }
}

/// Energy and gradient of the improper torsions alone, the energy mean-centered.
fn improper_reference(
    engine: &dyn ForceFieldEngine,
    system: &ClassicalSystem,
    molecule: &Molecule,
    xyz: ArrayView3<f64>,
) -> Result<ImproperReference, MolDataError> {
    let mut torsions = engine.remove_forces(system, &ForceFilter::keep(&["torsion"]));
    let improper_keys: HashSet<[usize; 4]> = molecule
        .impropers()
        .iter()
        .filter_map(|tuple| {
            let mut particles = [0usize; 4];
            for (slot, id) in particles.iter_mut().zip(tuple) {
                *slot = molecule.position(*id)?;
            }
            Some(sorted_key(&particles))
        })
        .collect();
    for force in torsions.forces_mut() {
        if let Force::PeriodicTorsion(terms) = force {
            for term in terms.iter_mut() {
                if !improper_keys.contains(&sorted_key(&term.particles)) {
                    term.k = 0.0;
                }
            }
        }
    }
    let (mut energy, forces) = engine.energies_and_forces(&torsions, xyz)?;
    center(&mut energy);
    Ok(ImproperReference {
        energy,
        gradient: -forces,
    })
}

fn digest_dict(dict: &ArrayDict) -> String {
    fn shape(hasher: &mut blake3::Hasher, dims: &[usize]) {
        hasher.update(&(dims.len() as u64).to_le_bytes());
        for &d in dims {
            hasher.update(&(d as u64).to_le_bytes());
        }
    }
    let mut hasher = blake3::Hasher::new();
    for (key, value) in dict {
        hasher.update(&(key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
        match value {
            ArrayValue::Float(array) => {
                hasher.update(&[0u8]);
                shape(&mut hasher, array.shape());
                for x in array.iter() {
                    hasher.update(&x.to_le_bytes());
                }
            }
            ArrayValue::Int(array) => {
                hasher.update(&[1u8]);
                shape(&mut hasher, array.shape());
                for x in array.iter() {
                    hasher.update(&x.to_le_bytes());
                }
            }
            ArrayValue::Text(text) => {
                hasher.update(&[2u8]);
                shape(&mut hasher, &[text.len()]);
                hasher.update(text.as_bytes());
            }
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::io::codec::dicts_same_bits;
    use crate::core::models::atom::Atom;
    use crate::core::models::ids::AtomId;
    use crate::core::forcefield::parameters::ParameterError;
    use crate::core::tuples::indexer::IndexerConfig;
    use crate::data::config::MolDataOptionsBuilder;
    use crate::engine::library::TopologyLibrary;
    use crate::engine::reference::tests::{conformations, engine, topology};
    use ndarray::array;
    use std::fs;
    use tempfile::tempdir;

    pub(crate) const IDENTIFIER: &str = "[CH3:1][CH:2]=[O:3]";

    fn diatomic() -> Molecule {
        Molecule::new(
            vec![Atom::new(AtomId(0), 6), Atom::new(AtomId(1), 1)],
            [(AtomId(0), AtomId(1))],
            IndexerConfig::default(),
        )
        .unwrap()
    }

    fn raw(energy: Array1<f64>, reference: Reference) -> RawMolData {
        let molecule = diatomic();
        let parameters = Parameters::nan_filled(&molecule, 6).unwrap();
        let n = energy.len();
        RawMolData {
            molecule,
            parameters,
            xyz: Array3::zeros((n, 2, 3)),
            energy,
            gradient: Array3::zeros((n, 2, 3)),
            reference,
            mol_id: "CH".to_string(),
            identifiers: Identifiers::default(),
            improper_reference: None,
        }
    }

    fn qm_conformations() -> Conformations {
        let xyz = conformations();
        Conformations {
            gradient: Array3::from_elem(xyz.raw_dim(), 0.5),
            energy: array![-3.0, -1.0],
            xyz,
            partial_charges: None,
        }
    }

    pub(crate) fn sample() -> MolData {
        let options = MolDataOptionsBuilder::new()
            .compute_improper_reference(true)
            .build()
            .unwrap();
        let engine = engine();
        let topology = topology();
        let system = engine.create_system(&topology).unwrap();
        MolData::from_system(
            &system,
            &topology,
            &engine,
            qm_conformations(),
            IDENTIFIER,
            Identifiers {
                mapped_smiles: Some(IDENTIFIER.to_string()),
                ..Identifiers::default()
            },
            &options,
        )
        .unwrap()
    }

    #[test]
    fn nonbonded_baseline_is_subtracted_and_centered() {
        let data = MolData::new(raw(
            array![-10.0, -8.0],
            Reference::Nonbonded {
                ff_name: "reference_ff".to_string(),
                energy: array![-5.0, -5.0],
                gradient: Array3::zeros((2, 2, 3)),
            },
        ))
        .unwrap();
        assert_eq!(data.energy_ref(), &array![-1.0, 1.0]);
        assert_eq!(data.ff_nonbonded_energy("reference_ff"), Some(&array![-5.0, -5.0]));
        assert_eq!(data.n_confs(), 2);
    }

    #[test]
    fn explicit_reference_is_centered_and_empty_records_are_allowed() {
        let data = MolData::new(raw(
            array![1.0, 2.0, 3.0],
            Reference::Explicit {
                energy: array![2.0, 4.0, 6.0],
                gradient: Array3::zeros((3, 2, 3)),
            },
        ))
        .unwrap();
        assert_eq!(data.energy_ref(), &array![-2.0, 0.0, 2.0]);

        let empty = MolData::new(raw(
            Array1::zeros(0),
            Reference::Explicit {
                energy: Array1::zeros(0),
                gradient: Array3::zeros((0, 2, 3)),
            },
        ))
        .unwrap();
        assert_eq!(empty.n_confs(), 0);
        assert!(empty.energy_ref().is_empty());
    }

    #[test]
    fn invalid_mol_ids_and_shapes_are_rejected() {
        let mut input = raw(
            array![1.0],
            Reference::Explicit {
                energy: array![0.0],
                gradient: Array3::zeros((1, 2, 3)),
            },
        );
        input.mol_id = "None".to_string();
        assert!(matches!(
            MolData::new(input),
            Err(MolDataError::InvalidMolId { .. })
        ));

        let input = raw(
            array![1.0],
            Reference::Explicit {
                energy: array![0.0, 1.0],
                gradient: Array3::zeros((1, 2, 3)),
            },
        );
        assert!(matches!(
            MolData::new(input),
            Err(MolDataError::Shape { key, .. }) if key == "energy_ref"
        ));
    }

    #[test]
    fn from_system_derives_reference_targets() {
        let data = sample();
        let mean = data.energy_ref().mean().unwrap();
        assert!(mean.abs() < 1e-12);
        let nb_gradient = data.ff_nonbonded_gradient("reference_ff").unwrap();
        let expected = data.gradient() - nb_gradient;
        assert_eq!(data.gradient_ref(), &expected);
        assert!(!data.parameters().is_nan_filled());
        assert_eq!(data.parameters().impropers().len(), 1);

        let improper = data.improper_ref().unwrap();
        assert_eq!(improper.gradient.shape(), data.xyz().shape());
        assert!(improper.energy.mean().unwrap().abs() < 1e-12);
        assert!(data.molecule().feature("ring_encoding").is_some());
    }

    #[test]
    fn failed_extraction_degrades_to_nan_parameters_on_request() {
        let engine = engine();
        let topology = topology();
        let full = engine.create_system(&topology).unwrap();
        let system = engine.remove_forces(&full, &ForceFilter::remove(&["harmonicbond"]));

        let strict = MolDataOptions::default();
        let result = MolData::from_system(
            &system,
            &topology,
            &engine,
            qm_conformations(),
            IDENTIFIER,
            Identifiers::default(),
            &strict,
        );
        assert!(matches!(
            result,
            Err(MolDataError::Parameters(ParameterError::MissingForce { .. }))
        ));

        let lenient = MolDataOptionsBuilder::new().allow_nan_params(true).build().unwrap();
        let data = MolData::from_system(
            &system,
            &topology,
            &engine,
            qm_conformations(),
            IDENTIFIER,
            Identifiers::default(),
            &lenient,
        )
        .unwrap();
        assert!(data.parameters().is_nan_filled());
    }

    #[test]
    fn dict_round_trip_is_bit_exact() {
        let mut data = sample();
        data.add_ff_data("gaff-2.11", array![1.0, 2.0], Array3::zeros((2, 7, 3)))
            .unwrap();
        let dict = data.to_dict().unwrap();
        assert!(dict.contains_key("energy_gaff-2.11"));
        assert!(dict.contains_key("nonbonded_energy_reference_ff"));
        let restored = MolData::from_dict(dict.clone()).unwrap();
        assert!(dicts_same_bits(&dict, &restored.to_dict().unwrap()));
        assert_eq!(restored.ff_names().collect::<Vec<_>>(), vec!["gaff-2.11"]);
    }

    #[test]
    fn from_dict_rejects_foreign_keys() {
        let mut dict = sample().to_dict().unwrap();
        dict.insert("charges".to_string(), ArrayValue::Text("x".into()));
        assert!(matches!(
            MolData::from_dict(dict),
            Err(MolDataError::Codec(CodecError::UnknownKey { .. }))
        ));
    }

    #[test]
    fn saved_files_are_reproduced_byte_for_byte() {
        let dir = tempdir().unwrap();
        let first = dir.path().join("first.npz");
        let second = dir.path().join("second.npz");
        let data = sample();
        data.save(&first).unwrap();
        let loaded = MolData::load(&first).unwrap();
        loaded.save(&second).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        assert_eq!(loaded.mol_id(), IDENTIFIER);
    }

    #[test]
    fn add_ff_data_validates_name_and_shape() {
        let mut data = sample();
        assert!(matches!(
            data.add_ff_data("ref", array![0.0, 0.0], Array3::zeros((2, 7, 3))),
            Err(MolDataError::Codec(CodecError::InvalidForceFieldName { .. }))
        ));
        assert!(matches!(
            data.add_ff_data("amber", array![0.0], Array3::zeros((2, 7, 3))),
            Err(MolDataError::Shape { .. })
        ));
        assert!(data.ff_energy("amber").is_none());

        let eng = engine();
        let system = eng.create_system(&topology()).unwrap();
        data.add_engine_ff_data(&eng, &system).unwrap();
        assert_eq!(data.ff_energy("reference_ff").unwrap().len(), 2);
    }

    #[test]
    fn data_dicts_are_resolved_and_extras_attached() {
        let mut library = TopologyLibrary::new();
        library.insert(IDENTIFIER, topology());
        let conf = qm_conformations();
        let mut dict = ArrayDict::new();
        dict.insert(MAPPED_SMILES.into(), IDENTIFIER.into());
        dict.insert(XYZ.into(), conf.xyz.clone().into());
        dict.insert(INPUT_ENERGY.into(), conf.energy.clone().into());
        dict.insert(INPUT_GRADIENT.into(), conf.gradient.clone().into());
        dict.insert("energy_amber99".into(), array![0.5, 0.7].into());
        dict.insert("gradient_amber99".into(), Array3::<f64>::zeros((2, 7, 3)).into());

        let data = MolData::from_data_dict(
            dict.clone(),
            &library,
            &engine(),
            &MolDataOptions::default(),
        )
        .unwrap();
        assert_eq!(data.mol_id(), IDENTIFIER);
        assert_eq!(data.ff_energy("amber99"), Some(&array![0.5, 0.7]));

        dict.remove("gradient_amber99");
        assert!(matches!(
            MolData::from_data_dict(dict.clone(), &library, &engine(), &MolDataOptions::default()),
            Err(MolDataError::Codec(CodecError::MissingKey { key })) if key == "gradient_amber99"
        ));

        dict.remove(MAPPED_SMILES);
        assert!(matches!(
            MolData::from_data_dict(dict, &library, &engine(), &MolDataOptions::default()),
            Err(MolDataError::MissingInput { key: "mapped_smiles" })
        ));
    }

    fn input_dict() -> ArrayDict {
        let conf = qm_conformations();
        let mut dict = ArrayDict::new();
        dict.insert(MAPPED_SMILES.into(), IDENTIFIER.into());
        dict.insert(XYZ.into(), conf.xyz.into());
        dict.insert(INPUT_ENERGY.into(), conf.energy.into());
        dict.insert(INPUT_GRADIENT.into(), conf.gradient.into());
        dict
    }

    #[test]
    fn data_dicts_may_carry_an_explicit_reference() {
        let mut library = TopologyLibrary::new();
        library.insert(IDENTIFIER, topology());
        let options = MolDataOptions::default();
        let mut dict = input_dict();
        dict.insert(ENERGY_REF.into(), array![4.0, 6.0].into());
        dict.insert(GRADIENT_REF.into(), Array3::<f64>::from_elem((2, 7, 3), 0.25).into());
        dict.insert("nonbonded_energy_reference_ff".into(), array![1.0, 1.0].into());
        dict.insert(
            "nonbonded_gradient_reference_ff".into(),
            Array3::<f64>::zeros((2, 7, 3)).into(),
        );

        let data = MolData::from_data_dict(dict.clone(), &library, &engine(), &options).unwrap();
        assert_eq!(data.energy_ref(), &array![-1.0, 1.0]);
        assert_eq!(data.gradient_ref(), &Array3::from_elem((2, 7, 3), 0.25));
        assert_eq!(data.energy(), &array![-3.0, -1.0]);
        assert_eq!(data.ff_nonbonded_energy("reference_ff"), Some(&array![1.0, 1.0]));

        let mut short = dict.clone();
        short.insert(ENERGY_REF.into(), array![4.0].into());
        assert!(matches!(
            MolData::from_data_dict(short, &library, &engine(), &options),
            Err(MolDataError::Shape { key, .. }) if key == ENERGY_REF
        ));

        let mut unpaired = dict.clone();
        unpaired.remove(GRADIENT_REF);
        assert!(matches!(
            MolData::from_data_dict(unpaired, &library, &engine(), &options),
            Err(MolDataError::Codec(CodecError::MissingKey { key })) if key == GRADIENT_REF
        ));

        dict.remove(ENERGY_REF);
        dict.remove(GRADIENT_REF);
        assert!(matches!(
            MolData::from_data_dict(dict, &library, &engine(), &options),
            Err(MolDataError::Codec(CodecError::Collision { key }))
                if key == "nonbonded_energy_reference_ff"
        ));
    }

    #[test]
    fn graph_export_carries_reference_parameters_and_targets() {
        let data = sample();
        let graph = data.to_graph().unwrap();
        let n_bonds = data.molecule().bonds().len();
        assert_eq!(graph.bonds.features["k_ref"].shape(), &[n_bonds, 1]);
        assert_eq!(
            graph.impropers.features["ks_ref"].shape(),
            &[data.molecule().impropers().len(), 6]
        );
        let targets = graph.conformations.as_ref().unwrap();
        assert_eq!(targets.xyz.shape(), &[7, 2, 3]);
        assert_eq!(targets.xyz[[5, 1, 2]], data.xyz()[[1, 5, 2]]);
        assert_eq!(graph.n_confs(), 2);
    }

    #[test]
    fn digest_tracks_content() {
        let mut data = sample();
        let before = data.content_digest().unwrap();
        assert_eq!(before.len(), 64);
        assert_eq!(before, data.clone().content_digest().unwrap());
        data.add_ff_data("amber", array![0.0, 0.0], Array3::zeros((2, 7, 3)))
            .unwrap();
        assert_ne!(before, data.content_digest().unwrap());
    }

    #[test]
    fn digest_is_lowercase_blake3_hex() {
        assert_eq!(
            digest_dict(&ArrayDict::new()),
            blake3::hash(b"").to_hex().to_string()
        );

        let mut dict = ArrayDict::new();
        dict.insert("mol_id".into(), "CC".into());
        let mut expected = blake3::Hasher::new();
        expected.update(&6u64.to_le_bytes());
        expected.update(b"mol_id");
        expected.update(&[2u8]);
        expected.update(&1u64.to_le_bytes());
        expected.update(&2u64.to_le_bytes());
        expected.update(b"CC");
        let digest = digest_dict(&dict);
        assert_eq!(digest, expected.finalize().to_hex().to_string());
        assert!(digest.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
