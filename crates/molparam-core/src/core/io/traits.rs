use super::archive::{self, ArchiveError};
use super::codec::ArrayDict;
use std::path::Path;

/// A record that persists as a flat array dictionary.
///
/// Implementors provide the conversion to and from [`ArrayDict`]; file persistence as an
/// `.npz` archive comes for free.
pub trait ArrayArchive: Sized {
    /// The error type for encoding, decoding and file operations.
    type Error: From<ArchiveError>;

    /// Flattens the record into one dictionary.
    ///
    /// # Errors
    ///
    /// Returns an error if two components emit the same key.
    fn to_array_dict(&self) -> Result<ArrayDict, Self::Error>;

    /// Rebuilds a record from a dictionary produced by [`ArrayArchive::to_array_dict`].
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing, has the wrong kind or shape, or if
    /// a key belongs to no component of the record.
    fn from_array_dict(dict: ArrayDict) -> Result<Self, Self::Error>;

    /// Writes the record to `path` atomically.
    fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Self::Error> {
        let dict = self.to_array_dict()?;
        archive::write_npz(path.as_ref(), &dict)?;
        Ok(())
    }

    fn load<P: AsRef<Path>>(path: P) -> Result<Self, Self::Error> {
        let dict = archive::read_npz(path.as_ref())?;
        Self::from_array_dict(dict)
    }
}
