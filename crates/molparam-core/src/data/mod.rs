//! # Data Module
//!
//! Per-molecule training records and the collections built from them.
//!
//! ## Overview
//!
//! A [`moldata::MolData`] ties a molecule, its classical parameters, its conformations and
//! QM targets together, derives the nonbonded-corrected reference targets, and persists as a
//! single `.npz` archive. A [`dataset::Dataset`] holds the graph form of many records and
//! provides reproducible splitting by molecule identity, selection, feature alignment and
//! weighted sampling.
//!
//! ## Key Components
//!
//! - [`moldata`] - Record construction, enrichment, serialization and graph export
//! - [`dataset`] - Collections of graphs, directory loading and selection
//! - [`split`] - Seeded train/val/test and k-fold partitioning of mol_ids
//! - [`sampling`] - Subdataset-balanced sampling weights
//! - [`manifest`] - CSV listing of dataset entries
//! - [`config`] - Builders for record, split and sampling options
//! - [`progress`] - Progress events for long-running loads

pub mod config;
pub mod dataset;
pub mod error;
pub mod manifest;
pub mod moldata;
pub mod progress;
pub mod sampling;
pub mod split;
