//! Aggregated multi-scale fitting result.

use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmResult;
use crate::shape::PointCloud;
use crate::transform::Affine2;

/// Result of one multi-scale fit: one iteration trace per scale plus the
/// transforms mapping each scale's estimates back to the original image
/// frame.
///
/// Constructed once when the last scale finishes and immutable afterwards; a
/// failed scale aborts the fit before this type is ever built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittingResult {
    /// Scale factors, in processing order.
    pub scales: Vec<f64>,
    /// Per-scale iteration traces, in scale coordinates.
    pub results: Vec<AlgorithmResult>,
    /// Per-scale inverse feature/rescale corrections (identity when fitting
    /// raw intensity).
    pub affine_transforms: Vec<Affine2>,
    /// Per-scale inverse scaling back to the original frame.
    pub scale_transforms: Vec<Affine2>,
    /// Original image dimensions `[width, height]`.
    pub image_size: [u32; 2],
    /// Ground-truth shape in original image coordinates, when provided.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gt_shape: Option<PointCloud>,
}

impl FittingResult {
    pub(crate) fn new(
        scales: Vec<f64>,
        results: Vec<AlgorithmResult>,
        affine_transforms: Vec<Affine2>,
        scale_transforms: Vec<Affine2>,
        image_size: [u32; 2],
        gt_shape: Option<PointCloud>,
    ) -> Self {
        Self {
            scales,
            results,
            affine_transforms,
            scale_transforms,
            image_size,
            gt_shape,
        }
    }

    /// Number of pyramid scales.
    pub fn n_scales(&self) -> usize {
        self.scales.len()
    }

    /// Transform mapping scale `k` coordinates to the original image frame.
    pub fn to_image_frame(&self, scale_index: usize) -> Affine2 {
        self.affine_transforms[scale_index].compose(&self.scale_transforms[scale_index])
    }

    /// Every iterate of one scale, mapped to original image coordinates.
    pub fn shapes_at(&self, scale_index: usize) -> Vec<PointCloud> {
        let t = self.to_image_frame(scale_index);
        self.results[scale_index]
            .shapes
            .iter()
            .map(|s| t.apply(s))
            .collect()
    }

    /// Final estimate of one scale in original image coordinates.
    pub fn final_shape_at(&self, scale_index: usize) -> PointCloud {
        self.to_image_frame(scale_index)
            .apply(self.results[scale_index].final_shape())
    }

    /// Final estimate of the finest processed scale, in image coordinates.
    pub fn final_shape(&self) -> PointCloud {
        self.final_shape_at(self.results.len() - 1)
    }

    /// Total counted iterations across all scales.
    pub fn n_iters_total(&self) -> usize {
        self.results.iter().map(|r| r.n_iters).sum()
    }

    /// RMS error of the final estimate against the ground truth, if any.
    pub fn final_error(&self) -> Option<f64> {
        self.gt_shape
            .as_ref()
            .map(|gt| self.final_shape().rms_distance(gt))
    }
}
