use super::class::{ImproperConvention, InteractionClass};
use super::graph::ConnectivityGraph;
use super::set::TupleSet;
use crate::core::models::ids::AtomId;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct IndexerConfig {
    /// Keep one representative per equivalence class instead of every ordering.
    pub reduce_symmetry: bool,
    pub improper_convention: ImproperConvention,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            reduce_symmetry: true,
            improper_convention: ImproperConvention::Cyclic,
        }
    }
}

/// Canonical tuple sets of all four interaction orders of a molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleSets {
    pub bonds: TupleSet<2>,
    pub angles: TupleSet<3>,
    pub propers: TupleSet<4>,
    pub impropers: TupleSet<4>,
}

impl TupleSets {
    pub fn empty(convention: ImproperConvention) -> Self {
        Self {
            bonds: TupleSet::bonds(),
            angles: TupleSet::angles(),
            propers: TupleSet::propers(),
            impropers: TupleSet::impropers(convention),
        }
    }

    pub fn len(&self, class: InteractionClass) -> usize {
        match class {
            InteractionClass::Bond => self.bonds.len(),
            InteractionClass::Angle => self.angles.len(),
            InteractionClass::Proper => self.propers.len(),
            InteractionClass::Improper => self.impropers.len(),
        }
    }

    /// Exact membership of `tuple` in the set of `class`. Tuples of the wrong arity are
    /// never members.
    pub fn contains(&self, class: InteractionClass, tuple: &[AtomId]) -> bool {
        match class {
            InteractionClass::Bond => <[AtomId; 2]>::try_from(tuple)
                .is_ok_and(|t| self.bonds.contains(&t)),
            InteractionClass::Angle => <[AtomId; 3]>::try_from(tuple)
                .is_ok_and(|t| self.angles.contains(&t)),
            InteractionClass::Proper => <[AtomId; 4]>::try_from(tuple)
                .is_ok_and(|t| self.propers.contains(&t)),
            InteractionClass::Improper => <[AtomId; 4]>::try_from(tuple)
                .is_ok_and(|t| self.impropers.contains(&t)),
        }
    }
}

pub struct TupleIndexer {
    config: IndexerConfig,
}

impl TupleIndexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> IndexerConfig {
        self.config
    }

    #[instrument(level = "debug", skip_all, fields(atoms = graph.len(), bonds = graph.edges().len()))]
    pub fn index(&self, graph: &ConnectivityGraph) -> TupleSets {
        let mut sets = TupleSets::empty(self.config.improper_convention);

        for &a1 in graph.atoms() {
            for &a2 in graph.neighbors(a1) {
                self.add(&mut sets.bonds, [a1, a2]);
                for &a3 in graph.neighbors(a2) {
                    if a3 == a1 {
                        continue;
                    }
                    self.add(&mut sets.angles, [a1, a2, a3]);
                    for &a4 in graph.neighbors(a3) {
                        if a4 == a2 || a4 == a1 {
                            continue;
                        }
                        let mut proper = [a1, a2, a3, a4];
                        if a4 < a1 {
                            proper.reverse();
                        }
                        self.add(&mut sets.propers, proper);
                    }
                }
            }
        }

        for &center in graph.atoms() {
            let wings = graph.neighbors(center);
            if wings.len() < 3 {
                continue;
            }
            for &w1 in wings {
                for &w2 in wings.iter().filter(|&&w| w != w1) {
                    for &w3 in wings.iter().filter(|&&w| w != w1 && w != w2) {
                        self.add(&mut sets.impropers, improper_with_center(center, [w1, w2, w3]));
                    }
                }
            }
        }

        debug!(
            bonds = sets.bonds.len(),
            angles = sets.angles.len(),
            propers = sets.propers.len(),
            impropers = sets.impropers.len(),
            "Derived interaction tuples"
        );
        sets
    }

    fn add<const N: usize>(&self, set: &mut TupleSet<N>, tuple: [AtomId; N]) {
        if self.config.reduce_symmetry {
            set.insert_reduced(tuple);
        } else {
            set.insert_all_variants(tuple);
        }
    }
}

/// Places `center` at the central improper position between the given wings.
#[inline]
pub fn improper_with_center(center: AtomId, wings: [AtomId; 3]) -> [AtomId; 4] {
    [wings[0], wings[1], center, wings[2]]
}
