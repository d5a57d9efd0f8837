use super::potentials;
use super::system::{ClassicalSystem, Force, NonbondedForce, SystemError};
use super::term::EnergyTerm;
use crate::core::utils::geometry::{angle_with_gradient, dihedral_with_gradient, distance_with_gradient};
use nalgebra::Vector3;
use ndarray::{Array2, ArrayView2};
use std::collections::HashMap;

/// Evaluates every force of `system` at `positions` (`(n_particles, 3)`, Å).
///
/// Returns the energy split by contribution and the forces `-dE/dx` (kcal/mol/Å) per
/// particle.
pub fn evaluate(
    system: &ClassicalSystem,
    positions: ArrayView2<f64>,
) -> Result<(EnergyTerm, Array2<f64>), SystemError> {
    let n = system.n_particles();
    if positions.shape() != [n, 3] {
        return Err(SystemError::PositionShape {
            expected: n,
            found: positions.shape().to_vec(),
        });
    }
    system.validate()?;

    let points: Vec<Vector3<f64>> = positions
        .rows()
        .into_iter()
        .map(|r| Vector3::new(r[0], r[1], r[2]))
        .collect();
    let mut gradient = vec![Vector3::zeros(); n];
    let mut energy = EnergyTerm::default();

    for force in system.forces() {
        match force {
            Force::HarmonicBond(terms) => {
                for t in terms {
                    let [i, j] = t.particles;
                    let (r, g) = distance_with_gradient(&points[i], &points[j]);
                    let (e, de) = potentials::harmonic(r, t.length, t.k);
                    energy.bond += e;
                    accumulate(&mut gradient, &t.particles, &g, de);
                }
            }
            Force::HarmonicAngle(terms) => {
                for t in terms {
                    let [i, j, k] = t.particles;
                    let (theta, g) = angle_with_gradient(&points[i], &points[j], &points[k]);
                    let (e, de) = potentials::harmonic(theta, t.angle, t.k);
                    energy.angle += e;
                    accumulate(&mut gradient, &t.particles, &g, de);
                }
            }
            Force::PeriodicTorsion(terms) => {
                for t in terms {
                    let [i, j, k, l] = t.particles;
                    let (phi, g) =
                        dihedral_with_gradient(&points[i], &points[j], &points[k], &points[l]);
                    let (e, de) = potentials::periodic_torsion(phi, t.periodicity, t.phase, t.k);
                    energy.torsion += e;
                    accumulate(&mut gradient, &t.particles, &g, de);
                }
            }
            Force::Nonbonded(nb) => {
                let (coulomb, lj) = nonbonded(nb, &points, &mut gradient);
                energy.coulomb += coulomb;
                energy.lennard_jones += lj;
            }
        }
    }

    let mut forces = Array2::zeros((n, 3));
    for (mut row, g) in forces.rows_mut().into_iter().zip(&gradient) {
        row[0] = -g.x;
        row[1] = -g.y;
        row[2] = -g.z;
    }
    Ok((energy, forces))
}

#[inline]
fn accumulate<const N: usize>(
    gradient: &mut [Vector3<f64>],
    particles: &[usize; N],
    coordinate_gradient: &[Vector3<f64>; N],
    de: f64,
) {
    for (&p, g) in particles.iter().zip(coordinate_gradient) {
        gradient[p] += g * de;
    }
}

/// All-pairs Coulomb and Lennard-Jones without cutoff, Lorentz-Berthelot combination.
fn nonbonded(
    nb: &NonbondedForce,
    points: &[Vector3<f64>],
    gradient: &mut [Vector3<f64>],
) -> (f64, f64) {
    let exceptions: HashMap<(usize, usize), (f64, f64)> = nb
        .exceptions
        .iter()
        .map(|e| {
            let [a, b] = e.particles;
            ((a.min(b), a.max(b)), (e.charge_scale, e.lj_scale))
        })
        .collect();

    let (mut coulomb, mut lj) = (0.0, 0.0);
    for i in 0..nb.particles.len() {
        for j in (i + 1)..nb.particles.len() {
            let (charge_scale, lj_scale) = exceptions.get(&(i, j)).copied().unwrap_or((1.0, 1.0));
            if charge_scale == 0.0 && lj_scale == 0.0 {
                continue;
            }
            let (pi, pj) = (&nb.particles[i], &nb.particles[j]);
            let (r, g) = distance_with_gradient(&points[i], &points[j]);

            let (ec, dec) = potentials::coulomb(r, charge_scale * pi.charge * pj.charge);
            let sigma = 0.5 * (pi.sigma + pj.sigma);
            let epsilon = lj_scale * (pi.epsilon * pj.epsilon).sqrt();
            let (el, del) = potentials::lennard_jones_12_6(r, sigma, epsilon);

            coulomb += ec;
            lj += el;
            accumulate(gradient, &[i, j], &g, dec + del);
        }
    }
    (coulomb, lj)
}
