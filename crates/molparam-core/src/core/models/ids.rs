use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of an atom within a molecule.
///
/// Ids come from the source of the molecule (topology index, structure file serial, ...)
/// and are not required to be contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomId(pub u32);

impl AtomId {
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn as_i64(self) -> i64 {
        i64::from(self.0)
    }

    pub fn try_from_i64(value: i64) -> Option<Self> {
        u32::try_from(value).ok().map(Self)
    }
}

impl From<u32> for AtomId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_from_i64_rejects_negative_and_oversized_values() {
        assert_eq!(AtomId::try_from_i64(7), Some(AtomId(7)));
        assert_eq!(AtomId::try_from_i64(-1), None);
        assert_eq!(AtomId::try_from_i64(i64::from(u32::MAX) + 1), None);
    }

    #[test]
    fn ids_order_by_numeric_value() {
        assert!(AtomId(2) < AtomId(10));
        assert_eq!(AtomId(3).as_i64(), 3);
    }
}
