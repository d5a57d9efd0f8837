use super::error::TupleError;
use crate::core::models::ids::AtomId;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// Undirected bond graph over atom ids.
///
/// Atom order and neighbor order follow insertion order, which fixes the traversal order
/// used by the tuple indexer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectivityGraph {
    atoms: Vec<AtomId>,
    positions: HashMap<AtomId, usize>,
    neighbors: Vec<Vec<AtomId>>,
    edges: Vec<[AtomId; 2]>,
}

impl ConnectivityGraph {
    pub fn new(
        atoms: impl IntoIterator<Item = AtomId>,
        bonds: impl IntoIterator<Item = (AtomId, AtomId)>,
    ) -> Result<Self, TupleError> {
        let mut graph = Self::default();
        for atom in atoms {
            if graph.positions.insert(atom, graph.atoms.len()).is_some() {
                return Err(TupleError::DuplicateAtom { atom });
            }
            graph.atoms.push(atom);
            graph.neighbors.push(Vec::new());
        }

        let mut seen = HashSet::new();
        for (a, b) in bonds {
            if a == b {
                return Err(TupleError::SelfBond { atom: a });
            }
            let pa = graph.position_or_err(a, a, b)?;
            let pb = graph.position_or_err(b, a, b)?;
            let key = if a < b { (a, b) } else { (b, a) };
            if !seen.insert(key) {
                debug!(a = a.get(), b = b.get(), "Ignoring duplicate bond");
                continue;
            }
            graph.neighbors[pa].push(b);
            graph.neighbors[pb].push(a);
            graph.edges.push([a, b]);
        }
        Ok(graph)
    }

    fn position_or_err(&self, atom: AtomId, a: AtomId, b: AtomId) -> Result<usize, TupleError> {
        self.positions
            .get(&atom)
            .copied()
            .ok_or(TupleError::UnknownAtom {
                a,
                b,
                missing: atom,
            })
    }

    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Bonds in insertion order, orientation as first given.
    pub fn edges(&self) -> &[[AtomId; 2]] {
        &self.edges
    }

    pub fn position(&self, atom: AtomId) -> Option<usize> {
        self.positions.get(&atom).copied()
    }

    pub fn neighbors(&self, atom: AtomId) -> &[AtomId] {
        self.position(atom)
            .map(|p| self.neighbors[p].as_slice())
            .unwrap_or(&[])
    }

    pub fn degree(&self, atom: AtomId) -> usize {
        self.neighbors(atom).len()
    }

    pub fn are_bonded(&self, a: AtomId, b: AtomId) -> bool {
        self.neighbors(a).contains(&b)
    }

    /// Size of the smallest ring containing the bond `a`-`b`, searching rings up to
    /// `max_size` atoms.
    pub fn smallest_ring_through(&self, a: AtomId, b: AtomId, max_size: usize) -> Option<usize> {
        if !self.are_bonded(a, b) || max_size < 3 {
            return None;
        }
        let mut visited = HashSet::from([a]);
        let mut queue = VecDeque::from([(a, 0usize)]);
        while let Some((atom, dist)) = queue.pop_front() {
            if dist + 1 >= max_size {
                continue;
            }
            for &next in self.neighbors(atom) {
                let is_direct_edge = (atom == a && next == b) || (atom == b && next == a);
                if is_direct_edge {
                    continue;
                }
                if next == b {
                    return Some(dist + 2);
                }
                if visited.insert(next) {
                    queue.push_back((next, dist + 1));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: u32, bonds: &[(u32, u32)]) -> ConnectivityGraph {
        ConnectivityGraph::new(
            (0..n).map(AtomId),
            bonds.iter().map(|&(a, b)| (AtomId(a), AtomId(b))),
        )
        .unwrap()
    }

    #[test]
    fn new_builds_symmetric_adjacency() {
        let g = graph(3, &[(0, 1), (1, 2)]);
        assert_eq!(g.neighbors(AtomId(1)), &[AtomId(0), AtomId(2)]);
        assert!(g.are_bonded(AtomId(2), AtomId(1)));
        assert_eq!(g.degree(AtomId(0)), 1);
    }

    #[test]
    fn duplicate_bonds_are_ignored() {
        let g = graph(2, &[(0, 1), (1, 0)]);
        assert_eq!(g.edges().len(), 1);
        assert_eq!(g.degree(AtomId(0)), 1);
    }

    #[test]
    fn bond_to_unknown_atom_fails() {
        let result = ConnectivityGraph::new([AtomId(0)], [(AtomId(0), AtomId(5))]);
        assert_eq!(
            result,
            Err(TupleError::UnknownAtom {
                a: AtomId(0),
                b: AtomId(5),
                missing: AtomId(5)
            })
        );
    }

    #[test]
    fn self_bond_and_duplicate_atom_fail() {
        let result = ConnectivityGraph::new([AtomId(0)], [(AtomId(0), AtomId(0))]);
        assert!(matches!(result, Err(TupleError::SelfBond { .. })));
        let result = ConnectivityGraph::new([AtomId(0), AtomId(0)], []);
        assert!(matches!(result, Err(TupleError::DuplicateAtom { .. })));
    }

    #[test]
    fn non_contiguous_ids_are_supported() {
        let g = ConnectivityGraph::new(
            [AtomId(10), AtomId(42)],
            [(AtomId(42), AtomId(10))],
        )
        .unwrap();
        assert_eq!(g.position(AtomId(42)), Some(1));
        assert_eq!(g.neighbors(AtomId(10)), &[AtomId(42)]);
        assert!(g.neighbors(AtomId(7)).is_empty());
    }

    #[test]
    fn smallest_ring_detects_benzene_like_cycle() {
        let g = graph(7, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 0), (0, 6)]);
        assert_eq!(g.smallest_ring_through(AtomId(0), AtomId(1), 8), Some(6));
        assert_eq!(g.smallest_ring_through(AtomId(0), AtomId(6), 8), None);
        assert_eq!(g.smallest_ring_through(AtomId(0), AtomId(1), 5), None);
    }

    #[test]
    fn smallest_ring_detects_three_membered_ring() {
        let g = graph(3, &[(0, 1), (1, 2), (2, 0)]);
        assert_eq!(g.smallest_ring_through(AtomId(0), AtomId(1), 8), Some(3));
    }
}
