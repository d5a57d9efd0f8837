use super::codec::{ArrayDict, ArrayValue};
use ndarray::{ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter, ReadNpzError, WriteNpzError};
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, PersistError};
use thiserror::Error;
use tracing::debug;

const NPY_SUFFIX: &str = ".npy";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write array '{key}': {source}")]
    Write {
        key: String,
        #[source]
        source: WriteNpzError,
    },

    #[error("Failed to read archive: {source}")]
    Read {
        #[source]
        source: ReadNpzError,
    },

    #[error("Failed to read array '{key}': {source}")]
    ReadArray {
        key: String,
        #[source]
        source: ReadNpzError,
    },

    #[error("Failed to move archive into place at '{path}': {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: PersistError,
    },

    #[error("Text entry '{key}' is not valid UTF-8")]
    InvalidText { key: String },
}

/// Writes `dict` as an uncompressed `.npz` archive, one `.npy` member per key.
///
/// Floats are stored as `f64`, integers as `i64` and text as a `u8` array of UTF-8 bytes.
pub fn write_npz_to<W: Write + Seek>(writer: W, dict: &ArrayDict) -> Result<W, ArchiveError> {
    let mut npz = NpzWriter::new(writer);
    for (key, value) in dict {
        let result = match value {
            ArrayValue::Float(array) => npz.add_array(key.as_str(), array),
            ArrayValue::Int(array) => npz.add_array(key.as_str(), array),
            ArrayValue::Text(text) => {
                let bytes = ndarray::Array1::from(text.as_bytes().to_vec());
                npz.add_array(key.as_str(), &bytes)
            }
        };
        result.map_err(|source| ArchiveError::Write {
            key: key.clone(),
            source,
        })?;
    }
    npz.finish().map_err(|source| ArchiveError::Write {
        key: String::new(),
        source,
    })
}

/// Reads every member of an `.npz` archive. Member names lose their `.npy` suffix.
pub fn read_npz_from<R: Read + Seek>(reader: R) -> Result<ArrayDict, ArchiveError> {
    let mut npz = NpzReader::new(reader).map_err(|source| ArchiveError::Read { source })?;
    let names = npz.names().map_err(|source| ArchiveError::Read { source })?;
    let mut dict = ArrayDict::new();
    for name in names {
        let key = name.strip_suffix(NPY_SUFFIX).unwrap_or(&name).to_string();
        let value = read_member(&mut npz, &name, &key)?;
        dict.insert(key, value);
    }
    Ok(dict)
}

// The element type is not known up front, so each supported dtype is tried in turn.
fn read_member<R: Read + Seek>(
    npz: &mut NpzReader<R>,
    name: &str,
    key: &str,
) -> Result<ArrayValue, ArchiveError> {
    let float_err = match npz.by_name::<OwnedRepr<f64>, IxDyn>(name) {
        Ok(array) => return Ok(ArrayValue::Float(array)),
        Err(err) => err,
    };
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(name) {
        return Ok(ArrayValue::Int(array));
    }
    match npz.by_name::<OwnedRepr<u8>, IxDyn>(name) {
        Ok(bytes) => text_from_bytes(key, bytes),
        Err(_) => Err(ArchiveError::ReadArray {
            key: key.to_string(),
            source: float_err,
        }),
    }
}

fn text_from_bytes(key: &str, bytes: ArrayD<u8>) -> Result<ArrayValue, ArchiveError> {
    String::from_utf8(bytes.into_raw_vec_and_offset().0)
        .map(ArrayValue::Text)
        .map_err(|_| ArchiveError::InvalidText {
            key: key.to_string(),
        })
}

/// Writes `dict` to `path` atomically: the archive is built in a temporary file next to the
/// target and moved into place once complete.
pub fn write_npz(path: &Path, dict: &ArrayDict) -> Result<(), ArchiveError> {
    let io_err = |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    write_npz_to(tmp.as_file_mut(), dict)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|source| ArchiveError::Persist {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), entries = dict.len(), "Wrote archive");
    Ok(())
}

pub fn read_npz(path: &Path) -> Result<ArrayDict, ArchiveError> {
    let file = File::open(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_npz_from(io::BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::codec::dicts_same_bits;
    use ndarray::{Array2, array};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample() -> ArrayDict {
        let mut dict = ArrayDict::new();
        dict.insert("energy".into(), array![1.5, f64::NAN, -2.0].into());
        dict.insert("mol_bonds".into(), array![[0i64, 1], [1, 2]].into());
        dict.insert("mol_propers".into(), Array2::<i64>::zeros((0, 4)).into());
        dict.insert("mol_id".into(), "CCO ethanol".into());
        dict.insert("empty_text".into(), "".into());
        dict
    }

    #[test]
    fn archive_round_trip_in_memory_is_bit_exact() {
        let dict = sample();
        let cursor = write_npz_to(Cursor::new(Vec::new()), &dict).unwrap();
        let restored = read_npz_from(Cursor::new(cursor.into_inner())).unwrap();
        assert!(dicts_same_bits(&dict, &restored));
    }

    #[test]
    fn archive_round_trip_on_disk_keeps_kinds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.npz");
        write_npz(&path, &sample()).unwrap();
        let restored = read_npz(&path).unwrap();
        assert!(matches!(restored["mol_bonds"], ArrayValue::Int(_)));
        assert!(matches!(restored["energy"], ArrayValue::Float(_)));
        assert_eq!(restored["mol_id"], ArrayValue::Text("CCO ethanol".into()));
    }

    #[test]
    fn write_replaces_existing_file_without_leftovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("record.npz");
        std::fs::write(&path, b"stale").unwrap();
        write_npz(&path, &sample()).unwrap();
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
        assert!(read_npz(&path).is_ok());
    }

    #[test]
    fn reading_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.npz");
        match read_npz(&path) {
            Err(ArchiveError::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected I/O error, got {:?}", other),
        }
    }

    #[test]
    fn garbage_is_not_an_archive() {
        let result = read_npz_from(Cursor::new(b"not a zip file".to_vec()));
        assert!(matches!(result, Err(ArchiveError::Read { .. })));
    }
}
