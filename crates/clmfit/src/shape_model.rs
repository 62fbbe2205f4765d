//! Linear statistical shape model with a runtime active-component window.
//!
//! The basis itself is built elsewhere (PCA training is out of scope); this
//! module consumes a trained mean/basis/variance triple and exposes the
//! projection-and-reconstruction operator the alignment algorithms need.
//! "Active components" are a runtime view window over the retained basis:
//! trimming at training time is permanent capacity reduction, activity is
//! reversible selection below that capacity.

use nalgebra::{DMatrix, DVector, Point2};
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::shape::PointCloud;
use crate::transform::procrustes_similarity;

/// Active shape-component selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSpec {
    /// Use every retained component.
    All,
    /// Use exactly this many leading components.
    Count(usize),
    /// Use the smallest leading prefix reaching this fraction of total
    /// variance, in `(0, 1]`.
    VarianceFraction(f64),
}

/// Trained linear shape model: mean shape, orthonormal basis, variances.
///
/// The model operates in its own normalized frame; inputs are
/// similarity-aligned to the mean before projection and mapped back after
/// reconstruction, so the four global similarity parameters (scale, rotation,
/// translation) are never absorbed into the basis coefficients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearShapeModel {
    mean: DVector<f64>,
    components: DMatrix<f64>,
    variances: DVector<f64>,
    n_active: usize,
}

impl LinearShapeModel {
    /// Number of global similarity parameters (scale, rotation, tx, ty).
    const N_GLOBAL: usize = 4;

    /// Build from trained parts.
    ///
    /// `mean` is an interleaved `[x0, y0, ...]` vector of at least two
    /// points, `components` holds orthonormal basis vectors as columns, and
    /// `variances` the per-component variances in non-increasing order.
    pub fn from_parts(
        mean: DVector<f64>,
        components: DMatrix<f64>,
        variances: DVector<f64>,
    ) -> Result<Self, FitError> {
        if mean.len() < 4 || mean.len() % 2 != 0 {
            return Err(FitError::config(format!(
                "shape model mean must hold >= 2 interleaved points, got length {}",
                mean.len()
            )));
        }
        if components.nrows() != mean.len() {
            return Err(FitError::config(format!(
                "component rows ({}) must match mean length ({})",
                components.nrows(),
                mean.len()
            )));
        }
        if variances.len() != components.ncols() {
            return Err(FitError::config(format!(
                "variance count ({}) must match component count ({})",
                variances.len(),
                components.ncols()
            )));
        }
        for i in 0..variances.len() {
            if !variances[i].is_finite() || variances[i] < 0.0 {
                return Err(FitError::config(format!(
                    "variance {} is not a finite non-negative number",
                    i
                )));
            }
            if i > 0 && variances[i] > variances[i - 1] {
                return Err(FitError::config(
                    "variances must be sorted in non-increasing order",
                ));
            }
        }
        let n_active = components.ncols();
        Ok(Self {
            mean,
            components,
            variances,
            n_active,
        })
    }

    /// Number of landmarks.
    pub fn n_points(&self) -> usize {
        self.mean.len() / 2
    }

    /// Number of retained basis components (training-time capacity).
    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    /// Number of currently active components.
    pub fn n_active_components(&self) -> usize {
        self.n_active
    }

    /// Number of global similarity parameters.
    pub fn n_global_parameters(&self) -> usize {
        Self::N_GLOBAL
    }

    /// Variances of the active components.
    pub fn active_variances(&self) -> &[f64] {
        &self.variances.as_slice()[..self.n_active]
    }

    /// Mean shape as a point cloud.
    pub fn mean_shape(&self) -> PointCloud {
        cloud_from_vector(&self.mean)
    }

    /// Select the active-component window.
    ///
    /// Fails with [`FitError::Configuration`] when a count exceeds the
    /// retained capacity or a variance fraction is outside `(0, 1]`.
    pub fn set_active_components(&mut self, spec: ComponentSpec) -> Result<(), FitError> {
        self.n_active = match spec {
            ComponentSpec::All => self.n_components(),
            ComponentSpec::Count(n) => {
                if n > self.n_components() {
                    return Err(FitError::config(format!(
                        "requested {} active components, model retains {}",
                        n,
                        self.n_components()
                    )));
                }
                n
            }
            ComponentSpec::VarianceFraction(f) => {
                if !(f > 0.0 && f <= 1.0) || !f.is_finite() {
                    return Err(FitError::config(format!(
                        "variance fraction must lie in (0, 1], got {}",
                        f
                    )));
                }
                let total: f64 = self.variances.iter().sum();
                if total <= 0.0 {
                    return Err(FitError::config(
                        "variance fraction selection on a zero-variance model",
                    ));
                }
                let mut acc = 0.0;
                let mut n = self.n_components();
                for (i, v) in self.variances.iter().enumerate() {
                    acc += v;
                    if acc / total >= f {
                        n = i + 1;
                        break;
                    }
                }
                n
            }
        };
        Ok(())
    }

    /// Project a shape onto the active subspace and reconstruct it.
    pub fn reconstruct(&self, shape: &PointCloud) -> Result<PointCloud, FitError> {
        self.constrain(shape, None)
    }

    /// Reconstruct with optional per-component coefficient weights.
    ///
    /// `weights`, when given, must hold one factor per active component; the
    /// regularised mean-shift update passes its Tikhonov attenuation factors
    /// here. The input is similarity-aligned to the model frame first and the
    /// reconstruction is mapped back through the inverse alignment.
    pub fn constrain(
        &self,
        shape: &PointCloud,
        weights: Option<&[f64]>,
    ) -> Result<PointCloud, FitError> {
        if shape.n_points() != self.n_points() {
            return Err(FitError::config(format!(
                "shape has {} landmarks, model expects {}",
                shape.n_points(),
                self.n_points()
            )));
        }
        if let Some(w) = weights {
            if w.len() != self.n_active {
                return Err(FitError::config(format!(
                    "got {} component weights for {} active components",
                    w.len(),
                    self.n_active
                )));
            }
        }

        let to_model = procrustes_similarity(shape, &self.mean_shape())?;
        let from_model = to_model.inverse().ok_or_else(|| {
            FitError::config("similarity alignment to the model frame is not invertible")
        })?;

        let aligned = to_model.apply(shape).to_vector();
        let centered = aligned - &self.mean;

        let basis = self.components.columns(0, self.n_active);
        let mut coeffs = basis.transpose() * &centered;
        if let Some(w) = weights {
            for (c, &wi) in coeffs.iter_mut().zip(w) {
                *c *= wi;
            }
        }
        let reconstructed = &self.mean + basis * coeffs;
        Ok(from_model.apply(&cloud_from_vector(&reconstructed)))
    }
}

fn cloud_from_vector(v: &DVector<f64>) -> PointCloud {
    PointCloud::new(
        (0..v.len() / 2)
            .map(|i| Point2::new(v[2 * i], v[2 * i + 1]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Four-point model with two orthonormal components along raw axes 0 and 2.
    fn model() -> LinearShapeModel {
        let mean = DVector::from_vec(vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]);
        let mut components = DMatrix::zeros(8, 2);
        components[(0, 0)] = 1.0;
        components[(2, 1)] = 1.0;
        let variances = DVector::from_vec(vec![4.0, 1.0]);
        LinearShapeModel::from_parts(mean, components, variances).unwrap()
    }

    #[test]
    fn reconstruct_of_mean_is_mean() {
        let m = model();
        let out = m.reconstruct(&m.mean_shape()).unwrap();
        assert!(out.rms_distance(&m.mean_shape()) < 1e-9);
    }

    #[test]
    fn active_count_over_capacity_is_rejected() {
        let mut m = model();
        let err = m.set_active_components(ComponentSpec::Count(3)).unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));
        // Capacity is untouched after a rejected selection.
        assert_eq!(m.n_active_components(), 2);
    }

    #[test]
    fn all_spec_activates_every_retained_component() {
        let mut m = model();
        m.set_active_components(ComponentSpec::Count(1)).unwrap();
        assert_eq!(m.n_active_components(), 1);
        m.set_active_components(ComponentSpec::All).unwrap();
        assert_eq!(m.n_active_components(), m.n_components());
    }

    #[test]
    fn variance_fraction_picks_smallest_prefix() {
        let mut m = model();
        // First component holds 4/5 of the variance.
        m.set_active_components(ComponentSpec::VarianceFraction(0.75))
            .unwrap();
        assert_eq!(m.n_active_components(), 1);
        m.set_active_components(ComponentSpec::VarianceFraction(0.95))
            .unwrap();
        assert_eq!(m.n_active_components(), 2);

        assert!(m
            .set_active_components(ComponentSpec::VarianceFraction(1.5))
            .is_err());
        assert!(m
            .set_active_components(ComponentSpec::VarianceFraction(0.0))
            .is_err());
    }

    #[test]
    fn global_parameter_count_is_similarity() {
        assert_eq!(model().n_global_parameters(), 4);
    }

    #[test]
    fn from_parts_validates_geometry() {
        let mean = DVector::from_vec(vec![0.0, 0.0, 1.0]);
        let c = DMatrix::zeros(3, 1);
        let v = DVector::from_vec(vec![1.0]);
        assert!(LinearShapeModel::from_parts(mean, c, v).is_err());

        let mean = DVector::from_vec(vec![0.0; 8]);
        let c = DMatrix::zeros(8, 2);
        let v = DVector::from_vec(vec![1.0, 2.0]); // increasing: rejected
        assert!(LinearShapeModel::from_parts(mean, c, v).is_err());
    }
}
