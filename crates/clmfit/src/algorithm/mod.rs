//! Per-scale shape alignment algorithms.
//!
//! An alignment algorithm owns one expert ensemble and one shape model for a
//! single pyramid scale and produces the per-iteration trace of shape
//! estimates the multi-scale controller aggregates. Variants share one
//! contract and are selected by configuration ([`AlgorithmKind`]), not by
//! subclassing:
//!
//! - [`RegularisedMeanShift`]: Gaussian-KDE mean-shift over response maps,
//!   regularised toward the shape model's active subspace.
//! - [`ActiveShapeModel`]: peak picking followed by plain subspace
//!   reconstruction.

use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::expert::{ExpertEnsemble, ResponseMap};
use crate::shape::PointCloud;
use crate::shape_model::LinearShapeModel;

mod asm;
mod mean_shift;

pub use asm::ActiveShapeModel;
pub use mean_shift::RegularisedMeanShift;

/// Why an alignment run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Shape change fell below the convergence threshold.
    Converged {
        /// RMS shape change of the final iteration.
        delta: f64,
    },
    /// The iteration budget was exhausted.
    MaxIters,
}

/// Iteration trace of one per-scale alignment run.
///
/// Index 0 always holds the shape-model reconstruction of the initial shape;
/// it is produced before the first counted iteration and never counts toward
/// the iteration budget, so a zero-iteration run still carries one estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    /// Per-iteration shape estimates, reconstruction first.
    pub shapes: Vec<PointCloud>,
    /// Why the run stopped.
    pub reason: StopReason,
    /// Number of counted iterations actually executed.
    pub n_iters: usize,
    /// Ground-truth shape in the same frame, when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt_shape: Option<PointCloud>,
}

impl AlgorithmResult {
    /// The reconstructed initial shape (iteration index 0).
    pub fn initial_shape(&self) -> &PointCloud {
        &self.shapes[0]
    }

    /// The final shape estimate.
    pub fn final_shape(&self) -> &PointCloud {
        &self.shapes[self.shapes.len() - 1]
    }

    /// RMS error of the final estimate against the ground truth, if any.
    pub fn final_error(&self) -> Option<f64> {
        self.gt_shape
            .as_ref()
            .map(|gt| self.final_shape().rms_distance(gt))
    }
}

/// Alignment variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    /// Regularised landmark mean-shift.
    #[default]
    RegularisedMeanShift,
    /// Active-shape-model style peak picking.
    ActiveShapeModel,
}

/// Per-scale optimization capability consumed by the multi-scale controller.
pub trait AlignmentAlgorithm: Send + Sync {
    /// Align `initial_shape` on `image` for at most `max_iters` counted
    /// iterations.
    ///
    /// The returned trace always starts with the model reconstruction of the
    /// initial shape. Fails with [`FitError::AlignmentDiverged`] when every
    /// landmark's response map degenerates in one iteration.
    fn run(
        &self,
        image: &GrayImage,
        initial_shape: &PointCloud,
        max_iters: usize,
        gt_shape: Option<&PointCloud>,
    ) -> Result<AlgorithmResult, FitError>;
}

/// Evaluate every landmark's response map around the current estimate.
///
/// Landmarks are independent at this point; the fan-out runs on the rayon
/// pool and the caller performs the serial reduction.
pub(crate) fn gather_responses(
    ensemble: &dyn ExpertEnsemble,
    image: &GrayImage,
    shape: &PointCloud,
) -> Vec<ResponseMap> {
    let n = ensemble.n_experts().min(shape.n_points());
    (0..n)
        .into_par_iter()
        .map(|i| ensemble.response(image, i, shape.points[i]))
        .collect()
}

/// Shared iteration driver for alignment variants.
///
/// `step` maps the current estimate and its response maps to the next
/// estimate; the driver owns reconstruction, divergence detection,
/// convergence bookkeeping, and the iteration trace.
pub(crate) fn run_alignment<F>(
    ensemble: &dyn ExpertEnsemble,
    model: &LinearShapeModel,
    image: &GrayImage,
    initial_shape: &PointCloud,
    max_iters: usize,
    gt_shape: Option<&PointCloud>,
    convergence_eps: f64,
    mut step: F,
) -> Result<AlgorithmResult, FitError>
where
    F: FnMut(&PointCloud, &[ResponseMap]) -> Result<PointCloud, FitError>,
{
    // Project-and-reconstruct the initialization; occupies index 0 and is
    // not a counted iteration.
    let mut shapes = vec![model.reconstruct(initial_shape)?];
    let mut reason = StopReason::MaxIters;

    for iteration in 0..max_iters {
        let current = shapes[shapes.len() - 1].clone();
        let responses = gather_responses(ensemble, image, &current);
        if responses.iter().all(ResponseMap::is_degenerate) {
            return Err(FitError::AlignmentDiverged {
                iteration,
                n_landmarks: responses.len(),
            });
        }

        let next = step(&current, &responses)?;
        let delta = next.rms_distance(&current);
        shapes.push(next);
        tracing::debug!(iteration, delta, "alignment step");

        if delta < convergence_eps {
            reason = StopReason::Converged { delta };
            break;
        }
    }

    let n_iters = shapes.len() - 1;
    Ok(AlgorithmResult {
        shapes,
        reason,
        n_iters,
        gt_shape: gt_shape.cloned(),
    })
}
