use super::ids::AtomId;
use crate::core::io::codec::{
    self, ArrayDict, CodecError, array_to_ids, ids_to_array, insert_unique,
};
use crate::core::tuples::class::InteractionClass;
use ndarray::{Array1, Array2, Array3, Ix1, Ix2, Ix3};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("Feature '{name}' on level {level} has {found} rows, expected {expected}")]
    FeatureRows {
        level: &'static str,
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Position {position} is out of range for {n_atoms} atoms")]
    PositionOutOfRange { position: i64, n_atoms: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

const TARGETS: &str = "targets";
const IDS: &str = "ids";
const IDXS: &str = "idxs";
const XYZ: &str = "xyz";
const ENERGY_REF: &str = "energy_ref";
const GRADIENT_REF: &str = "gradient_ref";

fn key(level: &str, field: &str) -> String {
    format!("{}.{}", level, field)
}

/// One interaction level of a molecular graph: rows of atom positions plus per-row features.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionNodes {
    /// Positions into the atom level, not atom ids.
    pub idxs: Array2<usize>,
    pub features: BTreeMap<String, Array2<f64>>,
}

impl InteractionNodes {
    pub fn new(idxs: Array2<usize>) -> Self {
        Self {
            idxs,
            features: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.idxs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.idxs.nrows() == 0
    }
}

/// Conformational training targets in graph layout: atoms first, then conformations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConformationTargets {
    /// `(n_atoms, n_confs, 3)`
    pub xyz: Array3<f64>,
    /// `(n_confs)`
    pub energy_ref: Array1<f64>,
    /// `(n_atoms, n_confs, 3)`
    pub gradient_ref: Array3<f64>,
}

/// Heterogeneous graph of a molecule with the levels `n1` (atoms), `n2`, `n3`, `n4`,
/// `n4_improper` and the global level `g`.
#[derive(Debug, Clone, PartialEq)]
pub struct MolecularGraph {
    pub atom_ids: Vec<AtomId>,
    pub atom_features: BTreeMap<String, Array2<f64>>,
    pub bonds: InteractionNodes,
    pub angles: InteractionNodes,
    pub propers: InteractionNodes,
    pub impropers: InteractionNodes,
    pub global: BTreeMap<String, Array1<f64>>,
    /// Kept apart from the static atom features so that feature alignment across a dataset
    /// only sees `(n_atoms, k)` matrices.
    pub conformations: Option<ConformationTargets>,
}

impl MolecularGraph {
    pub const ATOM_LEVEL: &'static str = "n1";
    pub const GLOBAL_LEVEL: &'static str = "g";

    pub fn n_atoms(&self) -> usize {
        self.atom_ids.len()
    }

    pub fn n_confs(&self) -> usize {
        self.conformations
            .as_ref()
            .map(|c| c.energy_ref.len())
            .unwrap_or(0)
    }

    pub fn level(&self, class: InteractionClass) -> &InteractionNodes {
        match class {
            InteractionClass::Bond => &self.bonds,
            InteractionClass::Angle => &self.angles,
            InteractionClass::Proper => &self.propers,
            InteractionClass::Improper => &self.impropers,
        }
    }

    pub fn level_mut(&mut self, class: InteractionClass) -> &mut InteractionNodes {
        match class {
            InteractionClass::Bond => &mut self.bonds,
            InteractionClass::Angle => &mut self.angles,
            InteractionClass::Proper => &mut self.propers,
            InteractionClass::Improper => &mut self.impropers,
        }
    }

    pub fn add_atom_feature(
        &mut self,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        if values.nrows() != self.n_atoms() {
            return Err(GraphError::FeatureRows {
                level: Self::ATOM_LEVEL,
                name,
                expected: self.n_atoms(),
                found: values.nrows(),
            });
        }
        self.atom_features.insert(name, values);
        Ok(())
    }

    pub fn add_interaction_feature(
        &mut self,
        class: InteractionClass,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> Result<(), GraphError> {
        let name = name.into();
        let level = self.level_mut(class);
        if values.nrows() != level.len() {
            return Err(GraphError::FeatureRows {
                level: class.tag(),
                name,
                expected: level.len(),
                found: values.nrows(),
            });
        }
        level.features.insert(name, values);
        Ok(())
    }

    /// Translates rows of atom positions back to atom ids.
    pub fn ids_for(&self, idxs: &Array2<usize>) -> Result<Vec<Vec<AtomId>>, GraphError> {
        idxs.rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .map(|&position| {
                        self.atom_ids.get(position).copied().ok_or(
                            GraphError::PositionOutOfRange {
                                position: position as i64,
                                n_atoms: self.n_atoms(),
                            },
                        )
                    })
                    .collect()
            })
            .collect()
    }

    /// Flattens the graph into `<level>.<field>` keys: `n1.ids`, `n1.<feature>`,
    /// `<tag>.idxs` and `<tag>.<feature>` for every interaction level, `g.<name>`, and
    /// `targets.{xyz,energy_ref,gradient_ref}` when conformations are present.
    pub fn to_dict(&self) -> Result<ArrayDict, GraphError> {
        let mut dict = ArrayDict::new();
        insert_unique(&mut dict, key(Self::ATOM_LEVEL, IDS), ids_to_array(&self.atom_ids))?;
        for (name, values) in &self.atom_features {
            insert_unique(&mut dict, key(Self::ATOM_LEVEL, name), values.clone())?;
        }
        for class in InteractionClass::ALL {
            let level = self.level(class);
            insert_unique(
                &mut dict,
                key(class.tag(), IDXS),
                level.idxs.mapv(|p| p as i64),
            )?;
            for (name, values) in &level.features {
                insert_unique(&mut dict, key(class.tag(), name), values.clone())?;
            }
        }
        for (name, values) in &self.global {
            insert_unique(&mut dict, key(Self::GLOBAL_LEVEL, name), values.clone())?;
        }
        if let Some(targets) = &self.conformations {
            insert_unique(&mut dict, key(TARGETS, XYZ), targets.xyz.clone())?;
            insert_unique(&mut dict, key(TARGETS, ENERGY_REF), targets.energy_ref.clone())?;
            insert_unique(&mut dict, key(TARGETS, GRADIENT_REF), targets.gradient_ref.clone())?;
        }
        Ok(dict)
    }

    /// Rebuilds a graph from [`MolecularGraph::to_dict`] output. Feature row counts and
    /// interaction positions are validated against the atom level.
    pub fn from_dict(mut dict: ArrayDict) -> Result<Self, GraphError> {
        let ids_key = key(Self::ATOM_LEVEL, IDS);
        let ids = codec::take_int::<Ix1>(&mut dict, &ids_key)?;
        let atom_ids = array_to_ids(&ids_key, &ids)?;
        let n_atoms = atom_ids.len();

        let mut take_level = |class: InteractionClass| -> Result<InteractionNodes, GraphError> {
            let idxs_key = key(class.tag(), IDXS);
            let raw = codec::take_int::<Ix2>(&mut dict, &idxs_key)?;
            if raw.ncols() != class.arity() {
                return Err(CodecError::Shape {
                    key: idxs_key,
                    expected: format!("(n, {})", class.arity()),
                    found: raw.shape().to_vec(),
                }
                .into());
            }
            if let Some(&position) = raw.iter().find(|&&p| p < 0 || p as usize >= n_atoms) {
                return Err(GraphError::PositionOutOfRange { position, n_atoms });
            }
            Ok(InteractionNodes::new(raw.mapv(|p| p as usize)))
        };
        let bonds = take_level(InteractionClass::Bond)?;
        let angles = take_level(InteractionClass::Angle)?;
        let propers = take_level(InteractionClass::Proper)?;
        let impropers = take_level(InteractionClass::Improper)?;

        let target_keys = [XYZ, ENERGY_REF, GRADIENT_REF].map(|field| key(TARGETS, field));
        let conformations = if target_keys.iter().any(|k| dict.contains_key(k)) {
            Some(ConformationTargets {
                xyz: codec::take_float::<Ix3>(&mut dict, &target_keys[0])?,
                energy_ref: codec::take_float::<Ix1>(&mut dict, &target_keys[1])?,
                gradient_ref: codec::take_float::<Ix3>(&mut dict, &target_keys[2])?,
            })
        } else {
            None
        };

        let mut graph = Self {
            atom_ids,
            atom_features: BTreeMap::new(),
            bonds,
            angles,
            propers,
            impropers,
            global: BTreeMap::new(),
            conformations,
        };
        let keys: Vec<String> = dict.keys().cloned().collect();
        for full in keys {
            let Some((level, name)) = full.split_once('.') else {
                return Err(CodecError::UnknownKey { key: full }.into());
            };
            if level == Self::ATOM_LEVEL {
                let values = codec::take_float::<Ix2>(&mut dict, &full)?;
                graph.add_atom_feature(name, values)?;
            } else if level == Self::GLOBAL_LEVEL {
                let values = codec::take_float::<Ix1>(&mut dict, &full)?;
                graph.global.insert(name.to_string(), values);
            } else if let Some(class) = InteractionClass::from_tag(level) {
                let values = codec::take_float::<Ix2>(&mut dict, &full)?;
                graph.add_interaction_feature(class, name, values)?;
            } else {
                return Err(CodecError::UnknownKey { key: full }.into());
            }
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_atom_graph() -> MolecularGraph {
        MolecularGraph {
            atom_ids: vec![AtomId(4), AtomId(9)],
            atom_features: BTreeMap::new(),
            bonds: InteractionNodes::new(array![[0, 1]]),
            angles: InteractionNodes::new(Array2::zeros((0, 3))),
            propers: InteractionNodes::new(Array2::zeros((0, 4))),
            impropers: InteractionNodes::new(Array2::zeros((0, 4))),
            global: BTreeMap::new(),
            conformations: None,
        }
    }

    #[test]
    fn ids_for_maps_positions_and_rejects_out_of_range() {
        let g = two_atom_graph();
        assert_eq!(
            g.ids_for(&array![[1, 0]]).unwrap(),
            vec![vec![AtomId(9), AtomId(4)]]
        );
        assert_eq!(
            g.ids_for(&array![[0, 2]]),
            Err(GraphError::PositionOutOfRange {
                position: 2,
                n_atoms: 2
            })
        );
    }

    #[test]
    fn features_must_match_level_size() {
        let mut g = two_atom_graph();
        assert!(g.add_atom_feature("x", Array2::zeros((2, 3))).is_ok());
        assert!(matches!(
            g.add_atom_feature("y", Array2::zeros((1, 3))),
            Err(GraphError::FeatureRows { level: "n1", .. })
        ));
        assert!(g
            .add_interaction_feature(InteractionClass::Bond, "k_ref", Array2::zeros((1, 1)))
            .is_ok());
        assert!(matches!(
            g.add_interaction_feature(InteractionClass::Angle, "k_ref", Array2::zeros((1, 1))),
            Err(GraphError::FeatureRows { level: "n3", .. })
        ));
    }

    #[test]
    fn n_confs_reads_conformation_targets() {
        let mut g = two_atom_graph();
        assert_eq!(g.n_confs(), 0);
        g.conformations = Some(ConformationTargets {
            xyz: Array3::zeros((2, 5, 3)),
            energy_ref: Array1::zeros(5),
            gradient_ref: Array3::zeros((2, 5, 3)),
        });
        assert_eq!(g.n_confs(), 5);
    }

    #[test]
    fn dict_form_keeps_levels_features_and_targets() {
        let mut g = two_atom_graph();
        g.add_atom_feature("mass", array![[12.0], [1.0]]).unwrap();
        g.add_interaction_feature(InteractionClass::Bond, "k_ref", array![[300.0]])
            .unwrap();
        g.global.insert("charge".into(), array![0.0]);
        g.conformations = Some(ConformationTargets {
            xyz: Array3::ones((2, 3, 3)),
            energy_ref: array![0.0, 1.0, -1.0],
            gradient_ref: Array3::zeros((2, 3, 3)),
        });

        let dict = g.to_dict().unwrap();
        assert!(dict.contains_key("n1.ids"));
        assert!(dict.contains_key("n2.k_ref"));
        assert!(dict.contains_key("n4_improper.idxs"));
        assert!(dict.contains_key("g.charge"));
        assert!(dict.contains_key("targets.energy_ref"));
        assert_eq!(MolecularGraph::from_dict(dict).unwrap(), g);
    }

    #[test]
    fn dict_form_rejects_bad_positions_and_stray_keys() {
        let mut dict = two_atom_graph().to_dict().unwrap();
        dict.insert("n2.idxs".into(), array![[0i64, 5]].into());
        assert!(matches!(
            MolecularGraph::from_dict(dict),
            Err(GraphError::PositionOutOfRange { position: 5, n_atoms: 2 })
        ));

        let mut dict = two_atom_graph().to_dict().unwrap();
        dict.insert("n9.extra".into(), array![1.0].into());
        assert!(matches!(
            MolecularGraph::from_dict(dict),
            Err(GraphError::Codec(CodecError::UnknownKey { .. }))
        ));

        let mut dict = two_atom_graph().to_dict().unwrap();
        dict.insert("targets.xyz".into(), Array3::<f64>::zeros((2, 1, 3)).into());
        assert!(matches!(
            MolecularGraph::from_dict(dict),
            Err(GraphError::Codec(CodecError::MissingKey { .. }))
        ));
    }
}
