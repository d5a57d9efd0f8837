use std::ops::{Add, AddAssign};

/// Energy of a configuration split by contribution (kcal/mol).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EnergyTerm {
    pub bond: f64,
    pub angle: f64,
    pub torsion: f64,
    pub coulomb: f64,
    pub lennard_jones: f64,
}

impl EnergyTerm {
    #[inline]
    pub fn bonded(&self) -> f64 {
        self.bond + self.angle + self.torsion
    }

    #[inline]
    pub fn nonbonded(&self) -> f64 {
        self.coulomb + self.lennard_jones
    }

    #[inline]
    pub fn total(&self) -> f64 {
        self.bonded() + self.nonbonded()
    }
}

impl Add for EnergyTerm {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            bond: self.bond + rhs.bond,
            angle: self.angle + rhs.angle,
            torsion: self.torsion + rhs.torsion,
            coulomb: self.coulomb + rhs.coulomb,
            lennard_jones: self.lennard_jones + rhs.lennard_jones,
        }
    }
}

impl AddAssign for EnergyTerm {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
