use super::class::InteractionClass;
use crate::core::models::ids::AtomId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TupleError {
    #[error("Atom id {atom} appears more than once in the atom set")]
    DuplicateAtom { atom: AtomId },

    #[error("Bond ({a}, {b}) references atom {missing}, which is not part of the atom set")]
    UnknownAtom {
        a: AtomId,
        b: AtomId,
        missing: AtomId,
    },

    #[error("Bond ({atom}, {atom}) connects an atom to itself")]
    SelfBond { atom: AtomId },

    #[error("{class} tuple {tuple:?} is not backed by bonds of the molecular graph")]
    Disconnected {
        class: InteractionClass,
        tuple: Vec<AtomId>,
    },
}
