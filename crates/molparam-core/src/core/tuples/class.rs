use crate::core::models::ids::AtomId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A permutation of tuple positions together with the sign it imposes on the
/// interaction coordinate (`-1` flips the sign of a torsion angle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permutation {
    pub order: &'static [usize],
    pub sign: i8,
}

impl Permutation {
    const fn even(order: &'static [usize]) -> Self {
        Self { order, sign: 1 }
    }

    const fn odd(order: &'static [usize]) -> Self {
        Self { order, sign: -1 }
    }

    /// Applies the permutation: position `i` of the result holds `tuple[order[i]]`.
    #[inline]
    pub fn apply<const N: usize>(&self, tuple: &[AtomId; N]) -> [AtomId; N] {
        debug_assert_eq!(self.order.len(), N);
        std::array::from_fn(|i| tuple[self.order[i]])
    }
}

/// How the three wing atoms of an improper torsion are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImproperConvention {
    /// Only the three cyclic wing orderings are equivalent. A center with three
    /// neighbors yields one class per handedness.
    #[default]
    Cyclic,
    /// Wing transpositions are equivalent as well, carrying a sign flip. A center with
    /// three neighbors yields a single class.
    SignedWings,
}

impl ImproperConvention {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Cyclic => "cyclic",
            Self::SignedWings => "signed-wings",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "cyclic" => Some(Self::Cyclic),
            "signed-wings" => Some(Self::SignedWings),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionClass {
    Bond,
    Angle,
    Proper,
    Improper,
}

static BOND_GROUP: [Permutation; 2] = [Permutation::even(&[0, 1]), Permutation::even(&[1, 0])];

static ANGLE_GROUP: [Permutation; 2] = [
    Permutation::even(&[0, 1, 2]),
    Permutation::even(&[2, 1, 0]),
];

static PROPER_GROUP: [Permutation; 2] = [
    Permutation::even(&[0, 1, 2, 3]),
    Permutation::even(&[3, 2, 1, 0]),
];

// Central atom stays at index 2; wings at indices 0, 1 and 3 are rotated.
static IMPROPER_CYCLIC_GROUP: [Permutation; 3] = [
    Permutation::even(&[0, 1, 2, 3]),
    Permutation::even(&[1, 3, 2, 0]),
    Permutation::even(&[3, 0, 2, 1]),
];

static IMPROPER_SIGNED_GROUP: [Permutation; 6] = [
    Permutation::even(&[0, 1, 2, 3]),
    Permutation::even(&[1, 3, 2, 0]),
    Permutation::even(&[3, 0, 2, 1]),
    Permutation::odd(&[1, 0, 2, 3]),
    Permutation::odd(&[3, 1, 2, 0]),
    Permutation::odd(&[0, 3, 2, 1]),
];

impl InteractionClass {
    pub const ALL: [Self; 4] = [Self::Bond, Self::Angle, Self::Proper, Self::Improper];

    /// Index of the central atom of an improper torsion.
    pub const IMPROPER_CENTER: usize = 2;

    pub const fn arity(self) -> usize {
        match self {
            Self::Bond => 2,
            Self::Angle => 3,
            Self::Proper | Self::Improper => 4,
        }
    }

    /// Level tag of the interaction order in graph and archive representations.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Bond => "n2",
            Self::Angle => "n3",
            Self::Proper => "n4",
            Self::Improper => "n4_improper",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.tag() == tag)
    }

    /// Permutations under which an interaction of this class is physically invariant.
    /// The identity always comes first.
    pub fn symmetry_group(self, convention: ImproperConvention) -> &'static [Permutation] {
        match (self, convention) {
            (Self::Bond, _) => &BOND_GROUP,
            (Self::Angle, _) => &ANGLE_GROUP,
            (Self::Proper, _) => &PROPER_GROUP,
            (Self::Improper, ImproperConvention::Cyclic) => &IMPROPER_CYCLIC_GROUP,
            (Self::Improper, ImproperConvention::SignedWings) => &IMPROPER_SIGNED_GROUP,
        }
    }

    /// All orderings equivalent to `tuple`, with the sign each one carries.
    pub fn variants<const N: usize>(
        self,
        convention: ImproperConvention,
        tuple: &[AtomId; N],
    ) -> impl Iterator<Item = ([AtomId; N], i8)> + '_ {
        debug_assert_eq!(self.arity(), N);
        self.symmetry_group(convention)
            .iter()
            .map(move |perm| (perm.apply(tuple), perm.sign))
    }

    /// Lexicographically smallest equivalent ordering, identical for every member of a class.
    pub fn canonical_key<const N: usize>(
        self,
        convention: ImproperConvention,
        tuple: &[AtomId; N],
    ) -> [AtomId; N] {
        self.variants(convention, tuple)
            .map(|(variant, _)| variant)
            .min()
            .unwrap_or(*tuple)
    }
}

impl fmt::Display for InteractionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bond => "bond",
            Self::Angle => "angle",
            Self::Proper => "proper torsion",
            Self::Improper => "improper torsion",
        };
        write!(f, "{}", name)
    }
}

/// Order-insensitive key of a tuple, used for membership tests on the atom set alone.
#[inline]
pub fn sorted_key<T: Ord + Copy, const N: usize>(tuple: &[T; N]) -> [T; N] {
    let mut key = *tuple;
    key.sort_unstable();
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids<const N: usize>(raw: [u32; N]) -> [AtomId; N] {
        raw.map(AtomId)
    }

    #[test]
    fn tags_round_trip() {
        for class in InteractionClass::ALL {
            assert_eq!(InteractionClass::from_tag(class.tag()), Some(class));
        }
        assert_eq!(InteractionClass::from_tag("n5"), None);
    }

    #[test]
    fn every_group_starts_with_identity_and_matches_arity() {
        for convention in [ImproperConvention::Cyclic, ImproperConvention::SignedWings] {
            for class in InteractionClass::ALL {
                let group = class.symmetry_group(convention);
                let identity: Vec<usize> = (0..class.arity()).collect();
                assert_eq!(group[0].order, identity.as_slice());
                assert!(group.iter().all(|p| p.order.len() == class.arity()));
            }
        }
    }

    #[test]
    fn bond_variants_are_both_orientations() {
        let variants: Vec<_> = InteractionClass::Bond
            .variants(ImproperConvention::Cyclic, &ids([3, 8]))
            .map(|(t, _)| t)
            .collect();
        assert_eq!(variants, vec![ids([3, 8]), ids([8, 3])]);
    }

    #[test]
    fn cyclic_improper_variants_keep_center_and_rotate_wings() {
        let variants: Vec<_> = InteractionClass::Improper
            .variants(ImproperConvention::Cyclic, &ids([1, 2, 0, 3]))
            .map(|(t, _)| t)
            .collect();
        assert_eq!(
            variants,
            vec![ids([1, 2, 0, 3]), ids([2, 3, 0, 1]), ids([3, 1, 0, 2])]
        );
        assert!(variants.iter().all(|t| t[InteractionClass::IMPROPER_CENTER] == AtomId(0)));
    }

    #[test]
    fn signed_improper_group_covers_all_wing_orderings_with_signs() {
        let variants: Vec<_> = InteractionClass::Improper
            .variants(ImproperConvention::SignedWings, &ids([1, 2, 0, 3]))
            .collect();
        let distinct: HashSet<_> = variants.iter().map(|(t, _)| *t).collect();
        assert_eq!(distinct.len(), 6);
        assert_eq!(variants.iter().filter(|(_, s)| *s == -1).count(), 3);
    }

    #[test]
    fn canonical_key_is_shared_by_equivalent_orderings() {
        let class = InteractionClass::Proper;
        let a = class.canonical_key(ImproperConvention::Cyclic, &ids([5, 2, 1, 0]));
        let b = class.canonical_key(ImproperConvention::Cyclic, &ids([0, 1, 2, 5]));
        assert_eq!(a, b);
        assert_eq!(a, ids([0, 1, 2, 5]));

        let improper = InteractionClass::Improper;
        let cyclic = ImproperConvention::Cyclic;
        assert_eq!(
            improper.canonical_key(cyclic, &ids([3, 1, 0, 2])),
            improper.canonical_key(cyclic, &ids([1, 2, 0, 3]))
        );
        assert_ne!(
            improper.canonical_key(cyclic, &ids([2, 1, 0, 3])),
            improper.canonical_key(cyclic, &ids([1, 2, 0, 3]))
        );
    }

    #[test]
    fn sorted_key_ignores_order() {
        assert_eq!(sorted_key(&ids([4, 1, 3, 2])), ids([1, 2, 3, 4]));
    }
}
