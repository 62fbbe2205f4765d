//! Homogeneous 2-D transforms applied to landmark clouds.
//!
//! Transforms are stored as 3x3 homogeneous matrices so that scale, similarity
//! and general affine maps compose and invert uniformly. The multi-scale
//! controller records one affine and one scale transform per pyramid level;
//! their composition maps per-scale estimates back to original image
//! coordinates.

use nalgebra::{Matrix3, Point2};
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::shape::PointCloud;

/// Composable, invertible 2-D affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine2 {
    /// Homogeneous 3x3 matrix with last row `[0, 0, 1]`.
    pub mat: Matrix3<f64>,
}

impl Affine2 {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            mat: Matrix3::identity(),
        }
    }

    /// Uniform scaling about the origin.
    pub fn scaling(factor: f64) -> Self {
        Self {
            mat: Matrix3::new(factor, 0.0, 0.0, 0.0, factor, 0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Pure translation.
    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            mat: Matrix3::new(1.0, 0.0, tx, 0.0, 1.0, ty, 0.0, 0.0, 1.0),
        }
    }

    /// Similarity transform `p -> s R p + t` with rotation angle in radians.
    pub fn similarity(scale: f64, angle: f64, tx: f64, ty: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            mat: Matrix3::new(
                scale * cos,
                -scale * sin,
                tx,
                scale * sin,
                scale * cos,
                ty,
                0.0,
                0.0,
                1.0,
            ),
        }
    }

    /// Compose with another transform; `inner` is applied first.
    pub fn compose(&self, inner: &Affine2) -> Self {
        Self {
            mat: self.mat * inner.mat,
        }
    }

    /// Inverse transform, or `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Self> {
        self.mat.try_inverse().map(|mat| Self { mat })
    }

    /// Apply to a single point.
    pub fn apply_point(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.mat * nalgebra::Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0], v[1])
    }

    /// Apply to every point of a cloud.
    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        PointCloud::new(cloud.points.iter().map(|&p| self.apply_point(p)).collect())
    }

    /// Row-major array form for serialization-adjacent consumers.
    pub fn to_array(&self) -> [[f64; 3]; 3] {
        let m = &self.mat;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

/// Least-squares similarity transform mapping `src` onto `dst`.
///
/// Closed-form 2-D Procrustes without reflection. Fails with
/// [`FitError::Configuration`] when the clouds disagree in size, have fewer
/// than two points, or `src` is degenerate (all points coincident).
pub fn procrustes_similarity(src: &PointCloud, dst: &PointCloud) -> Result<Affine2, FitError> {
    let n = src.n_points();
    if n < 2 || n != dst.n_points() {
        return Err(FitError::config(format!(
            "procrustes needs two equal-sized clouds of >= 2 points, got {} and {}",
            n,
            dst.n_points()
        )));
    }

    let cs = src.centroid();
    let cd = dst.centroid();

    // Cross terms of the centered clouds: a = sum of dots, b = sum of crosses.
    let mut a = 0.0;
    let mut b = 0.0;
    let mut norm = 0.0;
    for (ps, pd) in src.points.iter().zip(&dst.points) {
        let s = ps - cs;
        let d = pd - cd;
        a += s.x * d.x + s.y * d.y;
        b += s.x * d.y - s.y * d.x;
        norm += s.norm_squared();
    }
    if norm <= f64::EPSILON {
        return Err(FitError::config(
            "procrustes source cloud is degenerate (zero spread)",
        ));
    }

    // s*cos and s*sin of the optimal similarity.
    let sc = a / norm;
    let ss = b / norm;

    // t = cd - sR * cs.
    let tx = cd.x - (sc * cs.x - ss * cs.y);
    let ty = cd.y - (ss * cs.x + sc * cs.y);
    Ok(Affine2 {
        mat: Matrix3::new(sc, -ss, tx, ss, sc, ty, 0.0, 0.0, 1.0),
    })
}
