//! Regularised landmark mean-shift alignment.

use std::sync::Arc;

use image::GrayImage;
use nalgebra::Point2;

use crate::error::FitError;
use crate::expert::{ExpertEnsemble, ResponseMap};
use crate::shape::PointCloud;
use crate::shape_model::LinearShapeModel;

use super::{run_alignment, AlgorithmResult, AlignmentAlgorithm};

/// Gaussian-KDE mean-shift over detector responses, constrained to the shape
/// model's active subspace.
///
/// Each iteration moves every landmark toward the kernel-weighted mode of its
/// response map, then projects the moved cloud onto the model with
/// per-component Tikhonov attenuation `v / (v + kernel_variance)`. The kernel
/// variance plays the double role of KDE bandwidth and regularisation weight,
/// as in the regularised landmark mean-shift formulation.
pub struct RegularisedMeanShift {
    ensemble: Arc<dyn ExpertEnsemble>,
    model: LinearShapeModel,
    /// KDE bandwidth (pixel variance) and Tikhonov weight.
    pub kernel_variance: f64,
    /// RMS shape change below which the run is converged.
    pub convergence_eps: f64,
}

impl RegularisedMeanShift {
    /// Create with default bandwidth and convergence threshold.
    pub fn new(ensemble: Arc<dyn ExpertEnsemble>, model: LinearShapeModel) -> Self {
        Self {
            ensemble,
            model,
            kernel_variance: 10.0,
            convergence_eps: 1e-3,
        }
    }

    /// The shape model driving the subspace constraint.
    pub fn model(&self) -> &LinearShapeModel {
        &self.model
    }
}

impl AlignmentAlgorithm for RegularisedMeanShift {
    fn run(
        &self,
        image: &GrayImage,
        initial_shape: &PointCloud,
        max_iters: usize,
        gt_shape: Option<&PointCloud>,
    ) -> Result<AlgorithmResult, FitError> {
        let attenuation: Vec<f64> = self
            .model
            .active_variances()
            .iter()
            .map(|&v| v / (v + self.kernel_variance))
            .collect();

        run_alignment(
            self.ensemble.as_ref(),
            &self.model,
            image,
            initial_shape,
            max_iters,
            gt_shape,
            self.convergence_eps,
            |current, responses| {
                let targets = mean_shift_targets(current, responses, self.kernel_variance);
                self.model.constrain(&targets, Some(&attenuation))
            },
        )
    }
}

/// Kernel-weighted mode estimate per landmark.
///
/// A landmark whose map is degenerate or whose kernel-weighted mass vanishes
/// keeps its current position; only the all-degenerate case is fatal and the
/// driver has already screened for it.
fn mean_shift_targets(
    current: &PointCloud,
    responses: &[ResponseMap],
    kernel_variance: f64,
) -> PointCloud {
    let two_var = (2.0 * kernel_variance).max(f64::MIN_POSITIVE);
    let points = current
        .points
        .iter()
        .zip(responses)
        .map(|(&p, map)| {
            if map.is_degenerate() {
                return p;
            }
            let (cy, cx) = map.center();
            let (rows, cols) = map.shape();
            let mut mass = 0.0;
            let mut off_y = 0.0;
            let mut off_x = 0.0;
            for r in 0..rows {
                let dy = r as f64 - cy;
                for c in 0..cols {
                    let dx = c as f64 - cx;
                    let w = map.map[(r, c)] * (-(dy * dy + dx * dx) / two_var).exp();
                    mass += w;
                    off_y += w * dy;
                    off_x += w * dx;
                }
            }
            if mass <= f64::EPSILON {
                p
            } else {
                Point2::new(p.x + off_x / mass, p.y + off_y / mass)
            }
        })
        .collect();
    PointCloud::new(points)
}
