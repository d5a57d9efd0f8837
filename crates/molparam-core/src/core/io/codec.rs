use crate::core::models::ids::AtomId;
use ndarray::{Array, Array2, ArrayD, Dimension};
use phf::{Set, phf_set};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A single entry of a flat array archive.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValue {
    Float(ArrayD<f64>),
    Int(ArrayD<i64>),
    Text(String),
}

/// Flat, key-sorted mapping of names to arrays, the in-memory form of a persisted file.
pub type ArrayDict = BTreeMap<String, ArrayValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Int,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Float => "float",
            Self::Int => "integer",
            Self::Text => "text",
        };
        write!(f, "{}", name)
    }
}

impl ArrayValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Float(_) => ValueKind::Float,
            Self::Int(_) => ValueKind::Int,
            Self::Text(_) => ValueKind::Text,
        }
    }

    /// Bit-level equality, so NaN payloads compare equal to themselves.
    pub fn same_bits(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => {
                a.shape() == b.shape()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl<D: Dimension> From<Array<f64, D>> for ArrayValue {
    fn from(array: Array<f64, D>) -> Self {
        Self::Float(array.into_dyn())
    }
}

impl<D: Dimension> From<Array<i64, D>> for ArrayValue {
    fn from(array: Array<i64, D>) -> Self {
        Self::Int(array.into_dyn())
    }
}

impl From<String> for ArrayValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ArrayValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// Bit-level equality of two whole dictionaries.
pub fn dicts_same_bits(a: &ArrayDict, b: &ArrayDict) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && va.same_bits(vb))
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodecError {
    #[error("Key '{key}' is emitted by more than one component")]
    Collision { key: String },

    #[error("Invalid force-field name '{name}': {reason}")]
    InvalidForceFieldName { name: String, reason: &'static str },

    #[error("Required key '{key}' is missing")]
    MissingKey { key: String },

    #[error("Key '{key}' holds a {found} value, expected {expected}")]
    WrongKind {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("Key '{key}' has shape {found:?}, expected {expected}")]
    Shape {
        key: String,
        expected: String,
        found: Vec<usize>,
    },

    #[error("Key '{key}' holds {value}, which is not a valid atom id")]
    InvalidId { key: String, value: i64 },

    #[error("Key '{key}' does not belong to any known namespace")]
    UnknownKey { key: String },
}

/// The per-force-field array families of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfField {
    Energy,
    Gradient,
    NonbondedEnergy,
    NonbondedGradient,
}

impl FfField {
    pub const ALL: [Self; 4] = [
        Self::Energy,
        Self::Gradient,
        Self::NonbondedEnergy,
        Self::NonbondedGradient,
    ];

    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Energy => "energy_",
            Self::Gradient => "gradient_",
            Self::NonbondedEnergy => "nonbonded_energy_",
            Self::NonbondedGradient => "nonbonded_gradient_",
        }
    }
}

/// Namespace a key decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyClass<'a> {
    Record(&'a str),
    Molecule(&'a str),
    Parameters(&'a str),
    ForceField { field: FfField, name: &'a str },
}

static RECORD_KEYS: Set<&'static str> = phf_set! {
    "xyz", "energy", "gradient", "energy_ref", "gradient_ref", "mol_id",
    "mapped_smiles", "smiles", "pdb", "sequence",
    "improper_energy_ref", "improper_gradient_ref",
};

// Leading name segments that would make a force-field key read like another namespace.
static RESERVED_SEGMENTS: Set<&'static str> = phf_set! {
    "energy", "gradient", "nonbonded", "mol", "param", "improper",
};

/// Encoder and decoder of the flat key space shared by molecules, parameters and records.
pub struct KeyCodec;

impl KeyCodec {
    pub const MOLECULE_PREFIX: &'static str = "mol_";
    pub const PARAMETER_PREFIX: &'static str = "param_";

    pub fn is_record_key(key: &str) -> bool {
        RECORD_KEYS.contains(key)
    }

    pub fn molecule_key(field: &str) -> String {
        format!("{}{}", Self::MOLECULE_PREFIX, field)
    }

    pub fn parameter_key(field: &str) -> String {
        format!("{}{}", Self::PARAMETER_PREFIX, field)
    }

    pub fn validate_ff_name(name: &str) -> Result<(), CodecError> {
        let invalid = |reason| {
            Err(CodecError::InvalidForceFieldName {
                name: name.to_string(),
                reason,
            })
        };
        if name.is_empty() {
            return invalid("name is empty");
        }
        if name.starts_with('_') {
            return invalid("name starts with an underscore");
        }
        let leading = name.split('_').next().unwrap_or(name);
        if RESERVED_SEGMENTS.contains(leading) {
            return invalid("leading segment collides with a key prefix");
        }
        if FfField::ALL
            .iter()
            .any(|field| Self::is_record_key(&format!("{}{}", field.prefix(), name)))
        {
            return invalid("name produces a reserved record key");
        }
        Ok(())
    }

    pub fn ff_key(field: FfField, name: &str) -> Result<String, CodecError> {
        Self::validate_ff_name(name)?;
        Ok(format!("{}{}", field.prefix(), name))
    }

    /// Assigns `key` to its namespace. Fixed record keys take precedence over prefixes.
    pub fn classify(key: &str) -> Result<KeyClass<'_>, CodecError> {
        if Self::is_record_key(key) {
            return Ok(KeyClass::Record(key));
        }
        if let Some(field) = key.strip_prefix(Self::MOLECULE_PREFIX) {
            return Ok(KeyClass::Molecule(field));
        }
        if let Some(field) = key.strip_prefix(Self::PARAMETER_PREFIX) {
            return Ok(KeyClass::Parameters(field));
        }
        // Longer prefixes first: "nonbonded_energy_" must not be read as an energy key.
        for field in [
            FfField::NonbondedEnergy,
            FfField::NonbondedGradient,
            FfField::Energy,
            FfField::Gradient,
        ] {
            if let Some(name) = key.strip_prefix(field.prefix()) {
                if Self::validate_ff_name(name).is_ok() {
                    return Ok(KeyClass::ForceField { field, name });
                }
            }
        }
        Err(CodecError::UnknownKey {
            key: key.to_string(),
        })
    }
}

pub fn insert_unique(
    dict: &mut ArrayDict,
    key: impl Into<String>,
    value: impl Into<ArrayValue>,
) -> Result<(), CodecError> {
    let key = key.into();
    if dict.contains_key(&key) {
        return Err(CodecError::Collision { key });
    }
    dict.insert(key, value.into());
    Ok(())
}

/// Moves every entry of `other` into `dict`, failing on the first shared key.
pub fn merge_disjoint(dict: &mut ArrayDict, other: ArrayDict) -> Result<(), CodecError> {
    if let Some(key) = other.keys().find(|k| dict.contains_key(*k)) {
        return Err(CodecError::Collision { key: key.clone() });
    }
    dict.extend(other);
    Ok(())
}

fn take(dict: &mut ArrayDict, key: &str) -> Result<ArrayValue, CodecError> {
    dict.remove(key).ok_or_else(|| CodecError::MissingKey {
        key: key.to_string(),
    })
}

fn wrong_kind(key: &str, expected: ValueKind, found: &ArrayValue) -> CodecError {
    CodecError::WrongKind {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

fn into_dim<T, D: Dimension>(key: &str, array: ArrayD<T>) -> Result<Array<T, D>, CodecError> {
    let found = array.shape().to_vec();
    array.into_dimensionality::<D>().map_err(|_| CodecError::Shape {
        key: key.to_string(),
        expected: match D::NDIM {
            Some(n) => format!("{} dimensions", n),
            None => "any dimensionality".to_string(),
        },
        found,
    })
}

pub fn take_float<D: Dimension>(
    dict: &mut ArrayDict,
    key: &str,
) -> Result<Array<f64, D>, CodecError> {
    match take(dict, key)? {
        ArrayValue::Float(array) => into_dim(key, array),
        other => Err(wrong_kind(key, ValueKind::Float, &other)),
    }
}

pub fn take_int<D: Dimension>(
    dict: &mut ArrayDict,
    key: &str,
) -> Result<Array<i64, D>, CodecError> {
    match take(dict, key)? {
        ArrayValue::Int(array) => into_dim(key, array),
        other => Err(wrong_kind(key, ValueKind::Int, &other)),
    }
}

pub fn take_text(dict: &mut ArrayDict, key: &str) -> Result<String, CodecError> {
    match take(dict, key)? {
        ArrayValue::Text(text) => Ok(text),
        other => Err(wrong_kind(key, ValueKind::Text, &other)),
    }
}

pub fn take_optional_float<D: Dimension>(
    dict: &mut ArrayDict,
    key: &str,
) -> Result<Option<Array<f64, D>>, CodecError> {
    if dict.contains_key(key) {
        take_float(dict, key).map(Some)
    } else {
        Ok(None)
    }
}

pub fn take_optional_text(dict: &mut ArrayDict, key: &str) -> Result<Option<String>, CodecError> {
    if dict.contains_key(key) {
        take_text(dict, key).map(Some)
    } else {
        Ok(None)
    }
}

pub fn ids_to_array(ids: &[AtomId]) -> ndarray::Array1<i64> {
    ids.iter().map(|id| id.as_i64()).collect()
}

pub fn array_to_ids(key: &str, array: &ndarray::Array1<i64>) -> Result<Vec<AtomId>, CodecError> {
    array
        .iter()
        .map(|&value| {
            AtomId::try_from_i64(value).ok_or_else(|| CodecError::InvalidId {
                key: key.to_string(),
                value,
            })
        })
        .collect()
}

pub fn tuples_to_array<const N: usize>(tuples: &[[AtomId; N]]) -> Array2<i64> {
    let flat: Vec<i64> = tuples.iter().flatten().map(|id| id.as_i64()).collect();
    // Length is n * N by construction.
    Array2::from_shape_vec((tuples.len(), N), flat).unwrap_or_else(|_| Array2::zeros((0, N)))
}

pub fn array_to_tuples<const N: usize>(
    key: &str,
    array: &Array2<i64>,
) -> Result<Vec<[AtomId; N]>, CodecError> {
    if array.ncols() != N {
        return Err(CodecError::Shape {
            key: key.to_string(),
            expected: format!("(n, {})", N),
            found: array.shape().to_vec(),
        });
    }
    array
        .rows()
        .into_iter()
        .map(|row| {
            let mut tuple = [AtomId(0); N];
            for (slot, &value) in tuple.iter_mut().zip(row.iter()) {
                *slot = AtomId::try_from_i64(value).ok_or_else(|| CodecError::InvalidId {
                    key: key.to_string(),
                    value,
                })?;
            }
            Ok(tuple)
        })
        .collect()
}
