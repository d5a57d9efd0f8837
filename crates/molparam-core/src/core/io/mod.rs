//! Flat array dictionaries and their persistence.
//!
//! Every persisted record is a flat mapping from string keys to arrays ([`codec::ArrayDict`]).
//! [`codec`] owns the key namespaces and typed extraction, [`archive`] reads and writes the
//! mapping as a `.npz` file, and [`traits::ArrayArchive`] ties the two together for
//! record types.

pub mod archive;
pub mod codec;
pub mod traits;
