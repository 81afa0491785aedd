//! Small vector helpers shared by the driving logic.
//!
//! The world is Y-up. Lateral decisions look at the sign of
//! `cross(forward, v).y`: positive means `v` lies to the right.

use nalgebra::Vector3;

/// Linear remap of `value` from `[from1, to1]` onto `[from2, to2]`.
///
/// Degenerate ranges collapse to `from2`. The result is not clamped.
pub fn remap(value: f64, from1: f64, to1: f64, from2: f64, to2: f64) -> f64 {
    if from1 == to1 || from2 == to2 {
        return from2;
    }
    (value - from1) / (to1 - from1) * (to2 - from2) + from2
}

/// Drops the vertical component.
pub fn flat(v: Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, 0.0, v.z)
}

/// Distance on the ground plane.
pub fn flat_distance(a: Vector3<f64>, b: Vector3<f64>) -> f64 {
    flat(a - b).norm()
}

/// Normalized copy, or zero for (near) zero vectors.
pub fn normalize_or_zero(v: Vector3<f64>) -> Vector3<f64> {
    v.try_normalize(1e-9).unwrap_or_else(Vector3::zeros)
}

/// Vertical component of `a × b`; > 0 when `b` is to the right of `a`.
pub fn cross_y(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    a.z * b.x - a.x * b.z
}

/// Unsigned angle between two vectors in degrees (0 for degenerate input).
pub fn angle_deg(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let denom = a.norm() * b.norm();
    if denom < 1e-12 {
        return 0.0;
    }
    (a.dot(b) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Projection of `v` onto the direction `onto` (any length).
pub fn project(v: &Vector3<f64>, onto: &Vector3<f64>) -> Vector3<f64> {
    let len2 = onto.norm_squared();
    if len2 < 1e-18 {
        return Vector3::zeros();
    }
    onto * (v.dot(onto) / len2)
}

/// Closest point to `pt` on the segment `p1`–`p2`, evaluated on the ground
/// plane. The returned point takes its height from `p1`.
pub fn closest_point_on_segment_xz(
    pt: Vector3<f64>,
    p1: Vector3<f64>,
    p2: Vector3<f64>,
) -> Vector3<f64> {
    let dx = p2.x - p1.x;
    let dz = p2.z - p1.z;
    if dx == 0.0 && dz == 0.0 {
        return p1;
    }
    let t = (((pt.x - p1.x) * dx + (pt.z - p1.z) * dz) / (dx * dx + dz * dz)).clamp(0.0, 1.0);
    Vector3::new(p1.x + t * dx, p1.y, p1.z + t * dz)
}

/// Arithmetic mean of a point set.
pub fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    points.iter().sum::<Vector3<f64>>() / points.len() as f64
}
