//! Unit conversion. Internal units are kcal/mol, Å, e and radians.

use serde::{Deserialize, Serialize};

pub const KJ_PER_KCAL: f64 = 4.184;
pub const ANGSTROM_PER_NM: f64 = 10.0;
pub const KCAL_PER_HARTREE: f64 = 627.509474;
pub const ANGSTROM_PER_BOHR: f64 = 0.529177210903;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyUnit {
    #[default]
    KcalPerMol,
    KjPerMol,
    Hartree,
}

impl EnergyUnit {
    /// Factor that turns a value in this unit into kcal/mol.
    pub const fn to_kcal(self) -> f64 {
        match self {
            Self::KcalPerMol => 1.0,
            Self::KjPerMol => 1.0 / KJ_PER_KCAL,
            Self::Hartree => KCAL_PER_HARTREE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    #[default]
    Angstrom,
    Nanometer,
    Bohr,
}

impl LengthUnit {
    /// Factor that turns a value in this unit into Å.
    pub const fn to_angstrom(self) -> f64 {
        match self {
            Self::Angstrom => 1.0,
            Self::Nanometer => ANGSTROM_PER_NM,
            Self::Bohr => ANGSTROM_PER_BOHR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnit {
    #[default]
    Degree,
    Radian,
}

impl AngleUnit {
    pub const fn to_radian(self) -> f64 {
        match self {
            Self::Degree => std::f64::consts::PI / 180.0,
            Self::Radian => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kilojoules_convert_to_kilocalories() {
        assert!((4.184 * EnergyUnit::KjPerMol.to_kcal() - 1.0).abs() < 1e-12);
        assert_eq!(EnergyUnit::Hartree.to_kcal(), KCAL_PER_HARTREE);
    }

    #[test]
    fn lengths_convert_to_angstrom() {
        assert_eq!(0.1 * LengthUnit::Nanometer.to_angstrom(), 1.0);
        assert_eq!(LengthUnit::Bohr.to_angstrom(), ANGSTROM_PER_BOHR);
    }

    #[test]
    fn degrees_convert_to_radians() {
        assert!((180.0 * AngleUnit::Degree.to_radian() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn units_deserialize_from_snake_case() {
        #[derive(Deserialize)]
        struct Units {
            energy: EnergyUnit,
            length: LengthUnit,
        }
        let u: Units = toml::from_str("energy = \"kj_per_mol\"\nlength = \"nanometer\"").unwrap();
        assert_eq!(u.energy, EnergyUnit::KjPerMol);
        assert_eq!(u.length, LengthUnit::Nanometer);
    }
}
