use super::class::{ImproperConvention, InteractionClass, sorted_key};
use crate::core::models::ids::AtomId;
use std::collections::{HashMap, HashSet};

/// Ordered set of interaction tuples of one class.
///
/// Membership is exact on the stored orientation; equivalence queries go through the
/// class's symmetry group.
#[derive(Debug, Clone)]
pub struct TupleSet<const N: usize> {
    class: InteractionClass,
    convention: ImproperConvention,
    tuples: Vec<[AtomId; N]>,
    members: HashSet<[AtomId; N]>,
}

impl TupleSet<2> {
    pub fn bonds() -> Self {
        Self::empty(InteractionClass::Bond, ImproperConvention::default())
    }
}

impl TupleSet<3> {
    pub fn angles() -> Self {
        Self::empty(InteractionClass::Angle, ImproperConvention::default())
    }
}

impl TupleSet<4> {
    pub fn propers() -> Self {
        Self::empty(InteractionClass::Proper, ImproperConvention::default())
    }

    pub fn impropers(convention: ImproperConvention) -> Self {
        Self::empty(InteractionClass::Improper, convention)
    }
}

impl<const N: usize> TupleSet<N> {
    fn empty(class: InteractionClass, convention: ImproperConvention) -> Self {
        debug_assert_eq!(class.arity(), N);
        Self {
            class,
            convention,
            tuples: Vec::new(),
            members: HashSet::new(),
        }
    }

    /// Rebuilds a set from stored tuples, keeping their order and orientation.
    pub(crate) fn restore(mut self, tuples: impl IntoIterator<Item = [AtomId; N]>) -> Self {
        for tuple in tuples {
            if self.members.insert(tuple) {
                self.tuples.push(tuple);
            }
        }
        self
    }

    pub fn class(&self) -> InteractionClass {
        self.class
    }

    pub fn convention(&self) -> ImproperConvention {
        self.convention
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn as_slice(&self) -> &[[AtomId; N]] {
        &self.tuples
    }

    pub fn iter(&self) -> impl Iterator<Item = &[AtomId; N]> {
        self.tuples.iter()
    }

    pub fn contains(&self, tuple: &[AtomId; N]) -> bool {
        self.members.contains(tuple)
    }

    /// Stored tuple equivalent to `tuple` under the symmetry group, with the sign of the
    /// permutation relating them.
    pub fn representative(&self, tuple: &[AtomId; N]) -> Option<([AtomId; N], i8)> {
        self.class
            .variants(self.convention, tuple)
            .find(|(variant, _)| self.members.contains(variant))
    }

    pub fn contains_equivalent(&self, tuple: &[AtomId; N]) -> bool {
        self.representative(tuple).is_some()
    }

    /// Adds `tuple` unless an equivalent ordering is already present.
    pub fn insert_reduced(&mut self, tuple: [AtomId; N]) -> bool {
        if self.contains_equivalent(&tuple) {
            return false;
        }
        self.members.insert(tuple);
        self.tuples.push(tuple);
        true
    }

    /// Adds every ordering equivalent to `tuple`. Returns how many were new.
    pub fn insert_all_variants(&mut self, tuple: [AtomId; N]) -> usize {
        let variants: Vec<_> = self.class.variants(self.convention, &tuple).collect();
        let mut added = 0;
        for (variant, _) in variants {
            if self.members.insert(variant) {
                self.tuples.push(variant);
                added += 1;
            }
        }
        added
    }

    /// Groups stored tuples by their sorted atom set, preserving storage order.
    pub fn by_atom_set(&self) -> HashMap<[AtomId; N], Vec<usize>> {
        let mut map: HashMap<[AtomId; N], Vec<usize>> = HashMap::new();
        for (i, tuple) in self.tuples.iter().enumerate() {
            map.entry(sorted_key(tuple)).or_default().push(i);
        }
        map
    }
}

impl<const N: usize> PartialEq for TupleSet<N> {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
            && self.convention == other.convention
            && self.tuples == other.tuples
    }
}
