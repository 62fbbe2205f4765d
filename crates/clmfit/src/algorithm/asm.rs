//! Active-shape-model style alignment: peak picking plus reconstruction.

use std::sync::Arc;

use image::GrayImage;
use nalgebra::Point2;

use crate::error::FitError;
use crate::expert::{ExpertEnsemble, ResponseMap};
use crate::shape::PointCloud;
use crate::shape_model::LinearShapeModel;

use super::{run_alignment, AlgorithmResult, AlignmentAlgorithm};

/// Classic active-shape-model update over detector responses.
///
/// Each iteration snaps every landmark to the maximum of its response map and
/// projects the snapped cloud back onto the model subspace. Cruder than the
/// mean-shift variant but cheap, and useful as a second capability behind the
/// same contract.
pub struct ActiveShapeModel {
    ensemble: Arc<dyn ExpertEnsemble>,
    model: LinearShapeModel,
    /// RMS shape change below which the run is converged.
    pub convergence_eps: f64,
}

impl ActiveShapeModel {
    /// Create with the default convergence threshold.
    pub fn new(ensemble: Arc<dyn ExpertEnsemble>, model: LinearShapeModel) -> Self {
        Self {
            ensemble,
            model,
            convergence_eps: 1e-3,
        }
    }

    /// The shape model driving the subspace constraint.
    pub fn model(&self) -> &LinearShapeModel {
        &self.model
    }
}

impl AlignmentAlgorithm for ActiveShapeModel {
    fn run(
        &self,
        image: &GrayImage,
        initial_shape: &PointCloud,
        max_iters: usize,
        gt_shape: Option<&PointCloud>,
    ) -> Result<AlgorithmResult, FitError> {
        run_alignment(
            self.ensemble.as_ref(),
            &self.model,
            image,
            initial_shape,
            max_iters,
            gt_shape,
            self.convergence_eps,
            |current, responses| {
                let targets = peak_targets(current, responses);
                self.model.reconstruct(&targets)
            },
        )
    }
}

/// Snap each landmark to its response peak; degenerate maps keep the current
/// position.
fn peak_targets(current: &PointCloud, responses: &[ResponseMap]) -> PointCloud {
    let points = current
        .points
        .iter()
        .zip(responses)
        .map(|(&p, map)| {
            if map.is_degenerate() {
                return p;
            }
            let (cy, cx) = map.center();
            let (r, c) = map.peak();
            Point2::new(p.x + c as f64 - cx, p.y + r as f64 - cy)
        })
        .collect();
    PointCloud::new(points)
}
