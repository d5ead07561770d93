//! 3×3 projective transforms (homographies) in pixel coordinates.
//!
//! A [`Homography`] maps points of one image plane into another. Pairwise
//! registration produces one per adjacent pair; global alignment composes
//! them into per-image transforms targeting the reference frame.

use nalgebra::Matrix3;

/// Determinant magnitude below which a transform is treated as singular.
pub const SINGULARITY_EPSILON: f64 = 1e-10;

/// A 3×3 homogeneous projective transform.
///
/// Stored in row-major order:
/// ```text
/// | a  b  tx |   | data[0] data[1] data[2] |
/// | c  d  ty | = | data[3] data[4] data[5] |
/// | g  h  i  |   | data[6] data[7] data[8] |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Homography {
    /// Row-major matrix elements.
    pub data: [f64; 9],
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    /// The identity transform.
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            data: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        }
    }

    /// A pure translation by `(tx, ty)`.
    #[must_use]
    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self {
            data: [1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0],
        }
    }

    /// Build from a row-major array.
    #[must_use]
    pub const fn from_rows(data: [f64; 9]) -> Self {
        Self { data }
    }

    /// Build from a `nalgebra` matrix, normalized so the bottom-right
    /// element is 1 when it is safely nonzero.
    #[must_use]
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        let scale = if m[(2, 2)].abs() > SINGULARITY_EPSILON {
            1.0 / m[(2, 2)]
        } else {
            1.0
        };
        Self {
            data: [
                m[(0, 0)] * scale,
                m[(0, 1)] * scale,
                m[(0, 2)] * scale,
                m[(1, 0)] * scale,
                m[(1, 1)] * scale,
                m[(1, 2)] * scale,
                m[(2, 0)] * scale,
                m[(2, 1)] * scale,
                m[(2, 2)] * scale,
            ],
        }
    }

    /// Convert to a `nalgebra` matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix3<f64> {
        let d = &self.data;
        Matrix3::new(d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7], d[8])
    }

    /// Map a point through the transform with perspective division.
    ///
    /// Returns `None` when the point maps to the plane at infinity
    /// (homogeneous `w` near zero).
    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let d = &self.data;
        let w = d[6].mul_add(x, d[7].mul_add(y, d[8]));
        if w.abs() < SINGULARITY_EPSILON {
            return None;
        }
        let px = d[0].mul_add(x, d[1].mul_add(y, d[2])) / w;
        let py = d[3].mul_add(x, d[4].mul_add(y, d[5])) / w;
        Some((px, py))
    }

    /// Full 3×3 determinant.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        let d = &self.data;
        d[0] * (d[4] * d[8] - d[5] * d[7]) - d[1] * (d[3] * d[8] - d[5] * d[6])
            + d[2] * (d[3] * d[7] - d[4] * d[6])
    }

    /// Whether the transform can be inverted.
    #[must_use]
    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > SINGULARITY_EPSILON
    }

    /// Matrix inverse via the adjugate. Returns `None` for singular
    /// transforms rather than substituting identity.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < SINGULARITY_EPSILON {
            return None;
        }
        let d = &self.data;
        let inv_det = 1.0 / det;
        Some(Self {
            data: [
                (d[4] * d[8] - d[5] * d[7]) * inv_det,
                (d[2] * d[7] - d[1] * d[8]) * inv_det,
                (d[1] * d[5] - d[2] * d[4]) * inv_det,
                (d[5] * d[6] - d[3] * d[8]) * inv_det,
                (d[0] * d[8] - d[2] * d[6]) * inv_det,
                (d[2] * d[3] - d[0] * d[5]) * inv_det,
                (d[3] * d[7] - d[4] * d[6]) * inv_det,
                (d[1] * d[6] - d[0] * d[7]) * inv_det,
                (d[0] * d[4] - d[1] * d[3]) * inv_det,
            ],
        })
    }

    /// Compose two transforms: `self * other` (apply `other` first).
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        let a = &self.data;
        let b = &other.data;
        Self {
            data: [
                a[0] * b[0] + a[1] * b[3] + a[2] * b[6],
                a[0] * b[1] + a[1] * b[4] + a[2] * b[7],
                a[0] * b[2] + a[1] * b[5] + a[2] * b[8],
                a[3] * b[0] + a[4] * b[3] + a[5] * b[6],
                a[3] * b[1] + a[4] * b[4] + a[5] * b[7],
                a[3] * b[2] + a[4] * b[5] + a[5] * b[8],
                a[6] * b[0] + a[7] * b[3] + a[8] * b[6],
                a[6] * b[1] + a[7] * b[4] + a[8] * b[7],
                a[6] * b[2] + a[7] * b[5] + a[8] * b[8],
            ],
        }
    }

    /// Frobenius distance from the identity matrix. Used by tests to
    /// assert near-identity recovery.
    #[must_use]
    pub fn deviation_from_identity(&self) -> f64 {
        let id = Self::identity();
        self.data
            .iter()
            .zip(id.data.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(a: (f64, f64), b: (f64, f64)) {
        assert!(
            (a.0 - b.0).abs() < EPS && (a.1 - b.1).abs() < EPS,
            "expected {b:?}, got {a:?}",
        );
    }

    #[test]
    fn identity_maps_points_unchanged() {
        let h = Homography::identity();
        assert_close(h.apply(5.0, 7.0).unwrap(), (5.0, 7.0));
    }

    #[test]
    fn translation_shifts_points() {
        let h = Homography::translation(10.0, -5.0);
        assert_close(h.apply(3.0, 4.0).unwrap(), (13.0, -1.0));
    }

    #[test]
    fn inverse_round_trips() {
        let h = Homography::from_rows([1.1, 0.2, 5.0, -0.1, 0.9, -3.0, 1e-4, -2e-4, 1.0]);
        let inv = h.inverse().unwrap();
        for &(x, y) in &[(0.0, 0.0), (10.0, 10.0), (-5.0, 7.0), (100.0, -50.0)] {
            let (px, py) = h.apply(x, y).unwrap();
            let (bx, by) = inv.apply(px, py).unwrap();
            assert!((bx - x).abs() < 1e-6 && (by - y).abs() < 1e-6);
        }
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let h = Homography::from_rows([0.0; 9]);
        assert!(!h.is_invertible());
        assert!(h.inverse().is_none());
    }

    #[test]
    fn compose_applies_rightmost_first() {
        let t1 = Homography::translation(5.0, 3.0);
        let t2 = Homography::translation(2.0, -1.0);
        let composed = t1.compose(&t2);
        // t2 first: (0,0) -> (2,-1); then t1: -> (7,2).
        assert_close(composed.apply(0.0, 0.0).unwrap(), (7.0, 2.0));
    }

    #[test]
    fn perspective_division() {
        let h = Homography::from_rows([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.001, 0.0, 1.0]);
        let (x, y) = h.apply(100.0, 0.0).unwrap();
        // w = 1.1, so x' = 100 / 1.1.
        assert!((x - 100.0 / 1.1).abs() < 1e-9);
        assert!(y.abs() < EPS);
    }

    #[test]
    fn point_at_infinity_returns_none() {
        let h = Homography::from_rows([1.0, 0.0, 0.0, 0.0, 1.0, 0.0, -0.01, 0.0, 1.0]);
        // w = -0.01 * 100 + 1 = 0.
        assert!(h.apply(100.0, 0.0).is_none());
    }

    #[test]
    fn matrix_round_trip_normalizes_scale() {
        let m = Matrix3::new(2.0, 0.0, 4.0, 0.0, 2.0, 6.0, 0.0, 0.0, 2.0);
        let h = Homography::from_matrix(&m);
        // Scaled down so data[8] == 1.
        assert!((h.data[8] - 1.0).abs() < EPS);
        assert_close(h.apply(1.0, 1.0).unwrap(), (3.0, 4.0));
    }

    #[test]
    fn identity_deviation_is_zero() {
        assert!(Homography::identity().deviation_from_identity() < EPS);
    }
}
