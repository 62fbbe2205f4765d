//! Ordered landmark point clouds.

use nalgebra::{DVector, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Ordered set of 2-D landmark positions.
///
/// Point order carries landmark identity: every estimate produced during
/// fitting preserves the order of the model's mean shape. Coordinates are
/// `(x, y)` in the owning frame (scale-pyramid frame during per-scale
/// optimization, original image frame in aggregated results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    /// Landmark positions.
    pub points: Vec<Point2<f64>>,
}

impl PointCloud {
    /// Create from a list of points.
    pub fn new(points: Vec<Point2<f64>>) -> Self {
        Self { points }
    }

    /// Number of landmarks.
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Centroid of the cloud, or the origin for an empty cloud.
    pub fn centroid(&self) -> Point2<f64> {
        if self.points.is_empty() {
            return Point2::origin();
        }
        let mut acc = Vector2::zeros();
        for p in &self.points {
            acc += p.coords;
        }
        Point2::from(acc / self.points.len() as f64)
    }

    /// Flatten into an interleaved `[x0, y0, x1, y1, ...]` vector.
    pub fn to_vector(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.points.len() * 2,
            self.points.iter().flat_map(|p| [p.x, p.y]),
        )
    }

    /// Rebuild from an interleaved `[x0, y0, x1, y1, ...]` vector.
    ///
    /// Returns `None` when the vector length is odd.
    pub fn from_vector(v: &DVector<f64>) -> Option<Self> {
        if v.len() % 2 != 0 {
            return None;
        }
        Some(Self {
            points: (0..v.len() / 2)
                .map(|i| Point2::new(v[2 * i], v[2 * i + 1]))
                .collect(),
        })
    }

    /// Root-mean-square point-to-point distance to another cloud.
    ///
    /// Returns `f64::NAN` when the clouds disagree in size or are empty.
    pub fn rms_distance(&self, other: &PointCloud) -> f64 {
        if self.points.is_empty() || self.points.len() != other.points.len() {
            return f64::NAN;
        }
        let sum: f64 = self
            .points
            .iter()
            .zip(&other.points)
            .map(|(a, b)| (a - b).norm_squared())
            .sum();
        (sum / self.points.len() as f64).sqrt()
    }

    /// Return a copy with every coordinate multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Point2::new(p.x * factor, p.y * factor))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_round_trip() {
        let cloud = PointCloud::new(vec![Point2::new(1.0, 2.0), Point2::new(-3.5, 4.0)]);
        let v = cloud.to_vector();
        assert_eq!(v.len(), 4);
        assert_eq!(v[2], -3.5);
        let back = PointCloud::from_vector(&v).unwrap();
        assert_eq!(back, cloud);
    }

    #[test]
    fn from_vector_rejects_odd_length() {
        let v = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(PointCloud::from_vector(&v).is_none());
    }

    #[test]
    fn centroid_and_rms() {
        let a = PointCloud::new(vec![Point2::new(0.0, 0.0), Point2::new(2.0, 0.0)]);
        let c = a.centroid();
        assert!((c.x - 1.0).abs() < 1e-12 && c.y.abs() < 1e-12);

        let b = a.scaled(2.0);
        // Point 0 moves by 0, point 1 by 2 -> rms = sqrt((0 + 4) / 2).
        assert!((a.rms_distance(&b) - 2.0f64.sqrt()).abs() < 1e-12);
    }
}
