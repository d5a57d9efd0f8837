use super::atom::Atom;
use super::ids::AtomId;
use serde::{Deserialize, Serialize};

/// One atom of a structure description as delivered by a topology resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyAtom {
    pub id: AtomId,
    pub atomic_number: u8,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub residue: Option<String>,
    /// `None` means the source carried no charge information for this atom.
    #[serde(default)]
    pub formal_charge: Option<i32>,
    #[serde(default)]
    pub is_radical: bool,
}

impl TopologyAtom {
    pub fn new(id: AtomId, atomic_number: u8) -> Self {
        Self {
            id,
            atomic_number,
            name: None,
            residue: None,
            formal_charge: None,
            is_radical: false,
        }
    }

    pub fn to_atom(&self) -> Atom {
        Atom {
            id: self.id,
            atomic_number: self.atomic_number,
            formal_charge: self.formal_charge.unwrap_or(0),
            name: self.name.clone(),
            residue: self.residue.clone(),
            is_radical: self.is_radical,
        }
    }
}

/// Atoms and bonds of a molecule without any derived interaction data.
///
/// Particle `i` of a classical system created from a topology corresponds to `atoms[i]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Topology {
    pub atoms: Vec<TopologyAtom>,
    #[serde(default)]
    pub bonds: Vec<[AtomId; 2]>,
}

impl Topology {
    pub fn new(atoms: Vec<TopologyAtom>, bonds: Vec<[AtomId; 2]>) -> Self {
        Self { atoms, bonds }
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atom_ids(&self) -> impl Iterator<Item = AtomId> + '_ {
        self.atoms.iter().map(|a| a.id)
    }

    pub fn bond_pairs(&self) -> impl Iterator<Item = (AtomId, AtomId)> + '_ {
        self.bonds.iter().map(|&[a, b]| (a, b))
    }

    /// Position of `id` among the atoms, which is also its particle index.
    pub fn particle_index(&self, id: AtomId) -> Option<usize> {
        self.atoms.iter().position(|a| a.id == id)
    }

    pub fn has_formal_charges(&self) -> bool {
        self.atoms.iter().any(|a| a.formal_charge.is_some())
    }
}
