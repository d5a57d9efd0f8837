use super::units::{AngleUnit, EnergyUnit, LengthUnit};
use crate::core::models::ids::AtomId;
use crate::core::tuples::class::InteractionClass;
use itertools::Itertools;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const WILDCARD: &str = "*";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct TemplateUnits {
    #[serde(default)]
    pub energy: EnergyUnit,
    #[serde(default)]
    pub length: LengthUnit,
    #[serde(default)]
    pub angle: AngleUnit,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalParams {
    #[serde(default = "default_coulomb14_scale")]
    pub coulomb14_scale: f64,
    #[serde(default = "default_lj14_scale")]
    pub lj14_scale: f64,
}

fn default_coulomb14_scale() -> f64 {
    1.0 / 1.2
}

fn default_lj14_scale() -> f64 {
    0.5
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            coulomb14_scale: default_coulomb14_scale(),
            lj14_scale: default_lj14_scale(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AtomTypeParam {
    pub name: String,
    pub element: u8,
    /// Restricts the type to atoms with this many bonds.
    #[serde(default)]
    pub degree: Option<usize>,
    pub charge: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BondParam {
    pub types: [String; 2],
    pub k: f64,
    pub length: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AngleParam {
    pub types: [String; 3],
    pub k: f64,
    pub angle: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TorsionTermParam {
    pub periodicity: u32,
    pub phase: f64,
    pub k: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TorsionParam {
    /// Impropers place the central atom at index 2.
    pub types: [String; 4],
    pub terms: Vec<TorsionTermParam>,
}

/// A classical force field defined in TOML. Values are converted to kcal/mol, Å and
/// radians on load; harmonic constants follow the `0.5 k (x - x0)^2` convention and angle
/// force constants are always per rad².
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ForcefieldTemplate {
    #[serde(default)]
    pub units: TemplateUnits,
    #[serde(default)]
    pub globals: GlobalParams,
    pub atom_types: Vec<AtomTypeParam>,
    #[serde(default)]
    pub bonds: Vec<BondParam>,
    #[serde(default)]
    pub angles: Vec<AngleParam>,
    #[serde(default)]
    pub propers: Vec<TorsionParam>,
    #[serde(default)]
    pub impropers: Vec<TorsionParam>,
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("No atom type for atom {atom} (element {element}, degree {degree})")]
    MissingAtomType {
        atom: AtomId,
        element: u8,
        degree: usize,
    },
    #[error("No {class} parameter for types {types:?}")]
    MissingParameter {
        class: InteractionClass,
        types: Vec<String>,
    },
}

fn matches(pattern: &[String], types: &[&str]) -> bool {
    pattern
        .iter()
        .zip(types)
        .all(|(p, t)| p == WILDCARD || p == t)
}

fn matches_either_direction(pattern: &[String], types: &[&str]) -> bool {
    let reversed: Vec<&str> = types.iter().rev().copied().collect();
    matches(pattern, types) || matches(pattern, &reversed)
}

impl ForcefieldTemplate {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let content = std::fs::read_to_string(path).map_err(|e| TemplateError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::parse(&content, &path.to_string_lossy())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TemplateError> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self, TemplateError> {
        let template: Self = toml::from_str(content).map_err(|e| TemplateError::Toml {
            path: origin.to_string(),
            source: e,
        })?;
        Ok(template.into_internal_units())
    }

    fn into_internal_units(mut self) -> Self {
        let e = self.units.energy.to_kcal();
        let l = self.units.length.to_angstrom();
        let a = self.units.angle.to_radian();
        for t in &mut self.atom_types {
            t.sigma *= l;
            t.epsilon *= e;
        }
        for b in &mut self.bonds {
            b.length *= l;
            b.k *= e / (l * l);
        }
        for p in &mut self.angles {
            p.angle *= a;
            p.k *= e;
        }
        for t in self.propers.iter_mut().chain(self.impropers.iter_mut()) {
            for term in &mut t.terms {
                term.phase *= a;
                term.k *= e;
            }
        }
        self.units = TemplateUnits {
            energy: EnergyUnit::KcalPerMol,
            length: LengthUnit::Angstrom,
            angle: AngleUnit::Radian,
        };
        self
    }

    /// First atom type matching the element and, where the type restricts it, the degree.
    pub fn atom_type(
        &self,
        atom: AtomId,
        element: u8,
        degree: usize,
    ) -> Result<&AtomTypeParam, TemplateError> {
        self.atom_types
            .iter()
            .find(|t| t.element == element && t.degree.is_none_or(|d| d == degree))
            .ok_or(TemplateError::MissingAtomType {
                atom,
                element,
                degree,
            })
    }

    pub fn bond(&self, types: [&str; 2]) -> Result<&BondParam, TemplateError> {
        self.bonds
            .iter()
            .find(|p| matches_either_direction(&p.types, &types))
            .ok_or_else(|| missing(InteractionClass::Bond, &types))
    }

    pub fn angle(&self, types: [&str; 3]) -> Result<&AngleParam, TemplateError> {
        self.angles
            .iter()
            .find(|p| matches_either_direction(&p.types, &types))
            .ok_or_else(|| missing(InteractionClass::Angle, &types))
    }

    /// Proper torsion terms; an unmatched torsion carries no energy.
    pub fn proper(&self, types: [&str; 4]) -> Option<&TorsionParam> {
        self.propers
            .iter()
            .find(|p| matches_either_direction(&p.types, &types))
    }

    /// Improper terms for a tuple with its center at index 2. Wings match in any order.
    pub fn improper(&self, types: [&str; 4]) -> Option<&TorsionParam> {
        let wings = [types[0], types[1], types[3]];
        self.impropers.iter().find(|p| {
            (p.types[2] == WILDCARD || p.types[2] == types[2])
                && wings.iter().permutations(3).any(|w| {
                    let [a, b, c] = [*w[0], *w[1], *w[2]];
                    matches(&p.types, &[a, b, types[2], c])
                })
        })
    }
}

fn missing(class: InteractionClass, types: &[&str]) -> TemplateError {
    TemplateError::MissingParameter {
        class,
        types: types.iter().map(|t| t.to_string()).collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Small carbon-hydrogen-oxygen force field shared by engine and data tests.
    pub(crate) const TEST_TEMPLATE: &str = r#"
        [units]
        energy = "kcal_per_mol"
        length = "angstrom"
        angle = "degree"

        [globals]
        coulomb14_scale = 0.8333
        lj14_scale = 0.5

        [[atom_types]]
        name = "C3"
        element = 6
        degree = 3
        charge = 0.4
        sigma = 3.4
        epsilon = 0.086

        [[atom_types]]
        name = "CT"
        element = 6
        charge = -0.18
        sigma = 3.4
        epsilon = 0.1094

        [[atom_types]]
        name = "HC"
        element = 1
        charge = 0.06
        sigma = 2.65
        epsilon = 0.0157

        [[atom_types]]
        name = "O"
        element = 8
        charge = -0.4
        sigma = 2.96
        epsilon = 0.21

        [[bonds]]
        types = ["CT", "HC"]
        k = 680.0
        length = 1.09

        [[bonds]]
        types = ["*", "*"]
        k = 620.0
        length = 1.5

        [[angles]]
        types = ["*", "*", "*"]
        k = 100.0
        angle = 109.5

        [[propers]]
        types = ["*", "CT", "CT", "*"]
        terms = [{ periodicity = 3, phase = 0.0, k = 0.15 }]

        [[propers]]
        types = ["HC", "CT", "C3", "O"]
        terms = [
            { periodicity = 1, phase = 0.0, k = 0.8 },
            { periodicity = 2, phase = 180.0, k = 0.1 },
        ]

        [[impropers]]
        types = ["*", "*", "C3", "O"]
        terms = [{ periodicity = 2, phase = 180.0, k = 10.5 }]
    "#;

    #[test]
    fn load_converts_units_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ff.toml");
        fs::write(
            &path,
            r#"
            [units]
            energy = "kj_per_mol"
            length = "nanometer"

            [[atom_types]]
            name = "C"
            element = 6
            charge = 0.0
            sigma = 0.34
            epsilon = 4.184

            [[bonds]]
            types = ["C", "C"]
            k = 418.4
            length = 0.15
            "#,
        )
        .unwrap();
        let ff = ForcefieldTemplate::load(&path).unwrap();
        let c = ff.atom_type(AtomId(0), 6, 4).unwrap();
        assert!((c.sigma - 3.4).abs() < 1e-12);
        assert!((c.epsilon - 1.0).abs() < 1e-12);
        let bond = ff.bond(["C", "C"]).unwrap();
        assert!((bond.length - 1.5).abs() < 1e-12);
        assert!((bond.k - 1.0).abs() < 1e-12);
        assert_eq!(ff.globals, GlobalParams::default());
    }

    #[test]
    fn atom_type_lookup_respects_degree_and_order() {
        let ff = ForcefieldTemplate::from_toml_str(TEST_TEMPLATE).unwrap();
        assert_eq!(ff.atom_type(AtomId(0), 6, 3).unwrap().name, "C3");
        assert_eq!(ff.atom_type(AtomId(0), 6, 4).unwrap().name, "CT");
        assert!(matches!(
            ff.atom_type(AtomId(5), 7, 3),
            Err(TemplateError::MissingAtomType { element: 7, .. })
        ));
    }

    #[test]
    fn wildcards_and_reversal_match_bonded_types() {
        let ff = ForcefieldTemplate::from_toml_str(TEST_TEMPLATE).unwrap();
        assert_eq!(ff.bond(["HC", "CT"]).unwrap().length, 1.09);
        assert_eq!(ff.bond(["CT", "O"]).unwrap().length, 1.5);
        assert!((ff.angle(["HC", "CT", "HC"]).unwrap().angle - 109.5f64.to_radians()).abs() < 1e-12);
        assert_eq!(ff.proper(["O", "C3", "CT", "HC"]).map(|p| p.terms.len()), Some(2));
        assert!(ff.proper(["O", "C3", "CT", "CT"]).is_none());
    }

    #[test]
    fn improper_wings_match_in_any_order() {
        let ff = ForcefieldTemplate::from_toml_str(TEST_TEMPLATE).unwrap();
        assert!(ff.improper(["O", "CT", "C3", "CT"]).is_some());
        assert!(ff.improper(["CT", "CT", "C3", "O"]).is_some());
        assert!(ff.improper(["CT", "O", "CT", "CT"]).is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = ForcefieldTemplate::from_toml_str("atom_types = []\nextra = 1\n");
        assert!(matches!(result, Err(TemplateError::Toml { .. })));
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = ForcefieldTemplate::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(TemplateError::Io { .. })));
    }
}
