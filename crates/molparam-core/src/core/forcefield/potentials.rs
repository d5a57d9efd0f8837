//! Pair and bonded potentials. Every function returns `(energy, dE/dx)` where `x` is the
//! function's scalar coordinate.

pub const COULOMB_CONSTANT: f64 = 332.0637; // In kcal·Å/(mol·e²)

const MIN_DISTANCE: f64 = 1e-6;

#[inline]
pub fn harmonic(x: f64, x0: f64, k: f64) -> (f64, f64) {
    let dx = x - x0;
    (0.5 * k * dx * dx, k * dx)
}

#[inline]
pub fn periodic_torsion(phi: f64, periodicity: u32, phase: f64, k: f64) -> (f64, f64) {
    let n = f64::from(periodicity);
    let arg = n * phi - phase;
    (k * (1.0 + arg.cos()), -k * n * arg.sin())
}

/// `4ε[(σ/r)^12 - (σ/r)^6]`.
#[inline]
pub fn lennard_jones_12_6(dist: f64, sigma: f64, epsilon: f64) -> (f64, f64) {
    if dist < MIN_DISTANCE {
        return (1e10, 0.0);
    }
    let sr6 = (sigma / dist).powi(6);
    let sr12 = sr6 * sr6;
    (
        4.0 * epsilon * (sr12 - sr6),
        4.0 * epsilon * (6.0 * sr6 - 12.0 * sr12) / dist,
    )
}

/// Coulomb energy of a charge product `qq` at distance `dist`, no dielectric screening.
#[inline]
pub fn coulomb(dist: f64, qq: f64) -> (f64, f64) {
    if dist < MIN_DISTANCE {
        return (qq.signum() * 1e10, 0.0);
    }
    let e = COULOMB_CONSTANT * qq / dist;
    (e, -e / dist)
}
