use super::error::DatasetError;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// One row per dataset entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub mol_id: String,
    pub subdataset: String,
    pub n_atoms: usize,
    pub n_confs: usize,
    /// Hex BLAKE3 hash of the entry's serialized record.
    pub digest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn new(rows: Vec<ManifestRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ManifestRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn total_confs(&self) -> usize {
        self.rows.iter().map(|r| r.n_confs).sum()
    }

    /// Writes a CSV with a header row.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), DatasetError> {
        let mut csv = csv::Writer::from_writer(writer);
        for row in &self.rows {
            csv.serialize(row)?;
        }
        csv.flush().map_err(csv::Error::from)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: R) -> Result<Self, DatasetError> {
        let mut csv = csv::Reader::from_reader(reader);
        let rows = csv.deserialize().collect::<Result<Vec<ManifestRow>, _>>()?;
        Ok(Self { rows })
    }

    /// Writes the CSV to `path` through a temporary file in the same directory.
    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let io_error = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
        self.write_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all().map_err(io_error)?;
        tmp.persist(path).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let file = std::fs::File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_from(file)
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestRow;
    type IntoIter = std::slice::Iter<'a, ManifestRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
