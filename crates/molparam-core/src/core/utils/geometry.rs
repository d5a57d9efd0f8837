use nalgebra::Vector3;

const EPS: f64 = 1e-12;

/// Distance between two points and its gradient with respect to each point.
pub fn distance_with_gradient(p1: &Vector3<f64>, p2: &Vector3<f64>) -> (f64, [Vector3<f64>; 2]) {
    let d = p1 - p2;
    let r = d.norm();
    if r < EPS {
        return (r, [Vector3::zeros(); 2]);
    }
    let g = d / r;
    (r, [g, -g])
}

/// Angle p1-p2-p3 (rad) and its gradient with respect to each point.
pub fn angle_with_gradient(
    p1: &Vector3<f64>,
    p2: &Vector3<f64>,
    p3: &Vector3<f64>,
) -> (f64, [Vector3<f64>; 3]) {
    let u = p1 - p2;
    let v = p3 - p2;
    let (lu, lv) = (u.norm(), v.norm());
    if lu < EPS || lv < EPS {
        return (0.0, [Vector3::zeros(); 3]);
    }
    let (uh, vh) = (u / lu, v / lv);
    let cos = uh.dot(&vh).clamp(-1.0, 1.0);
    let theta = cos.acos();
    let sin = (1.0 - cos * cos).sqrt();
    if sin < 1e-8 {
        // Collinear: the gradient is undefined.
        return (theta, [Vector3::zeros(); 3]);
    }
    let g1 = (uh * cos - vh) / (lu * sin);
    let g3 = (vh * cos - uh) / (lv * sin);
    (theta, [g1, -(g1 + g3), g3])
}

/// Dihedral p1-p2-p3-p4 (rad, in (-π, π]) and its gradient with respect to each point,
/// following Blondel and Karplus.
pub fn dihedral_with_gradient(
    p1: &Vector3<f64>,
    p2: &Vector3<f64>,
    p3: &Vector3<f64>,
    p4: &Vector3<f64>,
) -> (f64, [Vector3<f64>; 4]) {
    let b1 = p2 - p1;
    let b2 = p3 - p2;
    let b3 = p4 - p3;
    let m = b1.cross(&b2);
    let n = b2.cross(&b3);
    let lb2 = b2.norm();
    let phi = (lb2 * b1.dot(&n)).atan2(m.dot(&n));

    let (mm, nn) = (m.norm_squared(), n.norm_squared());
    if mm < EPS || nn < EPS || lb2 < EPS {
        return (phi, [Vector3::zeros(); 4]);
    }
    let g1 = -m * (lb2 / mm);
    let g4 = n * (lb2 / nn);
    let s1 = b1.dot(&b2) / (lb2 * lb2);
    let s3 = b3.dot(&b2) / (lb2 * lb2);
    let g2 = -g1 - g1 * s1 + g4 * s3;
    let g3 = -g4 + g1 * s1 - g4 * s3;
    (phi, [g1, g2, g3, g4])
}

pub fn dihedral(p1: &Vector3<f64>, p2: &Vector3<f64>, p3: &Vector3<f64>, p4: &Vector3<f64>) -> f64 {
    dihedral_with_gradient(p1, p2, p3, p4).0
}
