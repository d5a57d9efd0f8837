//! # Tuple Indexer
//!
//! Derives the canonical interaction tuples of a molecular graph: bonds (`n2`), angles (`n3`),
//! proper torsions (`n4`) and improper torsions (`n4_improper`).
//!
//! ## Overview
//!
//! Every interaction class owns a fixed permutation group describing which orderings of a
//! tuple denote the same physical term. The indexer walks the bond graph in a deterministic
//! order and, in reduced mode, keeps the first-seen representative of each equivalence class.
//! In unreduced mode every ordering of the group is materialized.
//!
//! ## Key Components
//!
//! - [`class`] - [`InteractionClass`](class::InteractionClass) and its permutation tables
//! - [`graph`] - [`ConnectivityGraph`](graph::ConnectivityGraph), the validated bond graph
//! - [`set`] - [`TupleSet`](set::TupleSet), an ordered symmetry-aware tuple collection
//! - [`indexer`] - [`TupleIndexer`](indexer::TupleIndexer), the enumeration itself
//!
//! ```ignore
//! use molparam::core::tuples::{graph::ConnectivityGraph, indexer::{IndexerConfig, TupleIndexer}};
//!
//! let graph = ConnectivityGraph::new(atom_ids, bonds)?;
//! let sets = TupleIndexer::new(IndexerConfig::default()).index(&graph);
//! println!("{} propers", sets.propers.len());
//! ```

pub mod class;
pub mod error;
pub mod graph;
pub mod indexer;
pub mod set;
