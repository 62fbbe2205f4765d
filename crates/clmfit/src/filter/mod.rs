//! Correlation-filter training data model.
//!
//! Value types shared by the solver strategies and the incremental manager:
//! rectangular patches, normalized training batches, desired responses,
//! learned filters, and the sufficient statistics that make warm updates
//! possible without retaining raw patches.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{BatchIssue, FitError};

mod incremental;
mod solver;

pub use incremental::IncrementalFilterManager;
pub use solver::{CorrelationSolver, MccfSolver, MosseSolver};

/// One training patch: channel-major samples over a fixed 2-D support.
///
/// Rectangular by construction; a batch of patches is only normalized into a
/// stack when every member shares the same `[channels, height, width]` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f64>,
}

impl Patch {
    /// Create from a channel-major sample buffer of length
    /// `channels * height * width`.
    pub fn new(
        channels: usize,
        height: usize,
        width: usize,
        data: Vec<f64>,
    ) -> Result<Self, FitError> {
        let expected = channels * height * width;
        if expected == 0 || data.len() != expected {
            return Err(FitError::ShapeMismatch {
                issue: BatchIssue::DataLength {
                    expected,
                    got: data.len(),
                },
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// Infallible constructor for internal callers that build rectangular
    /// buffers by construction.
    pub(crate) fn from_raw(channels: usize, height: usize, width: usize, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), channels * height * width);
        Self {
            channels,
            height,
            width,
            data,
        }
    }

    /// Create a single-channel patch from a matrix of samples.
    pub fn from_matrix(m: &DMatrix<f64>) -> Result<Self, FitError> {
        let (h, w) = m.shape();
        let mut data = Vec::with_capacity(h * w);
        for r in 0..h {
            for c in 0..w {
                data.push(m[(r, c)]);
            }
        }
        Self::new(1, h, w, data)
    }

    /// Patch shape as `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Sample value at `(channel, row, col)`.
    #[inline]
    pub fn value(&self, channel: usize, row: usize, col: usize) -> f64 {
        self.data[(channel * self.height + row) * self.width + col]
    }
}

/// Desired correlation response shared by every patch of a training batch.
///
/// Single-channel by contract (`(1, response_h, response_w)` in the original
/// formulation); typically a narrow Gaussian peaked at the patch center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredResponse {
    map: DMatrix<f64>,
}

impl DesiredResponse {
    /// Wrap a response map; fails on zero-sized support.
    pub fn new(map: DMatrix<f64>) -> Result<Self, FitError> {
        if map.nrows() == 0 || map.ncols() == 0 {
            return Err(FitError::ShapeMismatch {
                issue: BatchIssue::EmptyResponse,
            });
        }
        Ok(Self { map })
    }

    /// An isotropic Gaussian response peaked at the window center.
    pub fn gaussian(height: usize, width: usize, sigma: f64) -> Result<Self, FitError> {
        let cy = (height as f64 - 1.0) / 2.0;
        let cx = (width as f64 - 1.0) / 2.0;
        let s2 = (2.0 * sigma * sigma).max(f64::MIN_POSITIVE);
        Self::new(DMatrix::from_fn(height, width, |r, c| {
            let dy = r as f64 - cy;
            let dx = c as f64 - cx;
            (-(dy * dy + dx * dx) / s2).exp()
        }))
    }

    /// Response support as `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.map.shape()
    }

    /// The response map itself.
    pub fn map(&self) -> &DMatrix<f64> {
        &self.map
    }
}

/// A training batch normalized into one rectangular stack.
///
/// This is the boundary where list-shaped input is made rectangular: ragged
/// batches are rejected here, before any numeric path runs.
#[derive(Debug, Clone)]
pub struct PatchStack {
    patches: Vec<Patch>,
    shape: [usize; 3],
}

impl PatchStack {
    /// Normalize a list of patches, rejecting empty or ragged input.
    pub fn new(patches: Vec<Patch>) -> Result<Self, FitError> {
        let first = patches.first().ok_or(FitError::ShapeMismatch {
            issue: BatchIssue::Empty,
        })?;
        let shape = first.shape();
        for (index, p) in patches.iter().enumerate().skip(1) {
            if p.shape() != shape {
                return Err(FitError::ShapeMismatch {
                    issue: BatchIssue::Ragged {
                        index,
                        expected: shape,
                        got: p.shape(),
                    },
                });
            }
        }
        Ok(Self { patches, shape })
    }

    /// Number of patches in the batch.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the stack is empty (never true for a constructed stack).
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Common patch shape `[channels, height, width]`.
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Iterate over the stacked patches.
    pub fn iter(&self) -> std::slice::Iter<'_, Patch> {
        self.patches.iter()
    }
}

/// Geometry binding a patch shape to a response shape.
///
/// `extended_len` is the `N` of the statistics contract:
/// `(patch_h + response_h - 1) * (patch_w + response_w - 1) * channels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterGeometry {
    /// Channel count shared by patches and filter.
    pub channels: usize,
    /// Patch support.
    pub patch_h: usize,
    /// Patch support.
    pub patch_w: usize,
    /// Response (and filter kernel) support.
    pub response_h: usize,
    /// Response (and filter kernel) support.
    pub response_w: usize,
}

impl FilterGeometry {
    /// Derive the geometry of a normalized batch and its desired response.
    pub fn of(batch: &PatchStack, response: &DesiredResponse) -> Self {
        let [channels, patch_h, patch_w] = batch.shape();
        let (response_h, response_w) = response.shape();
        Self {
            channels,
            patch_h,
            patch_w,
            response_h,
            response_w,
        }
    }

    /// Rows of the periodic extension grid.
    pub fn extended_h(&self) -> usize {
        self.patch_h + self.response_h - 1
    }

    /// Columns of the periodic extension grid.
    pub fn extended_w(&self) -> usize {
        self.patch_w + self.response_w - 1
    }

    /// Length `N` of the vectorized extended support across channels.
    pub fn extended_len(&self) -> usize {
        self.extended_h() * self.extended_w() * self.channels
    }
}

/// Learned correlation filter: one kernel per channel, response-sized.
///
/// Immutable once produced; a warm update supersedes the previous filter
/// rather than mutating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    kernels: Vec<DMatrix<f64>>,
}

impl Filter {
    pub(crate) fn from_kernels(kernels: Vec<DMatrix<f64>>) -> Self {
        Self { kernels }
    }

    /// Number of channels.
    pub fn n_channels(&self) -> usize {
        self.kernels.len()
    }

    /// Kernel support as `(rows, cols)`.
    pub fn kernel_shape(&self) -> (usize, usize) {
        self.kernels
            .first()
            .map(|k| k.shape())
            .unwrap_or((0, 0))
    }

    /// Kernel of one channel.
    pub fn kernel(&self, channel: usize) -> &DMatrix<f64> {
        &self.kernels[channel]
    }
}

/// Auto-/cross-correlation statistics sufficient for warm filter updates.
///
/// Stored as per-sample means so that chained increments and one-shot solves
/// agree exactly under the equal-weight combination rule. One instance is
/// owned per landmark; `increment` returns a successor instead of mutating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SufficientStatistics {
    /// Mean correlation of the desired response with each shifted patch,
    /// length `N`.
    pub auto_correlation: DVector<f64>,
    /// Mean pairwise correlation between shifted patches, `N x N`, symmetric
    /// positive semi-definite by construction.
    pub cross_correlation: DMatrix<f64>,
    /// Number of training patches observed so far.
    pub sample_count: usize,
}

impl SufficientStatistics {
    /// Length `N` these statistics were accumulated over.
    pub fn extended_len(&self) -> usize {
        self.auto_correlation.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_rejects_wrong_buffer_length() {
        let err = Patch::new(1, 3, 3, vec![0.0; 8]).unwrap_err();
        assert!(matches!(
            err,
            FitError::ShapeMismatch {
                issue: BatchIssue::DataLength {
                    expected: 9,
                    got: 8
                }
            }
        ));
    }

    #[test]
    fn stack_rejects_empty_and_ragged() {
        assert!(matches!(
            PatchStack::new(vec![]).unwrap_err(),
            FitError::ShapeMismatch {
                issue: BatchIssue::Empty
            }
        ));

        let a = Patch::new(1, 3, 3, vec![0.0; 9]).unwrap();
        let b = Patch::new(1, 3, 4, vec![0.0; 12]).unwrap();
        let err = PatchStack::new(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            FitError::ShapeMismatch {
                issue: BatchIssue::Ragged { index: 1, .. }
            }
        ));
    }

    #[test]
    fn geometry_extended_len_matches_contract() {
        let p = Patch::new(2, 5, 4, vec![0.0; 40]).unwrap();
        let stack = PatchStack::new(vec![p]).unwrap();
        let resp = DesiredResponse::gaussian(3, 3, 1.0).unwrap();
        let g = FilterGeometry::of(&stack, &resp);
        // (5+3-1) * (4+3-1) * 2
        assert_eq!(g.extended_len(), 7 * 6 * 2);
    }

    #[test]
    fn gaussian_response_peaks_at_center() {
        let r = DesiredResponse::gaussian(5, 5, 1.5).unwrap();
        let m = r.map();
        assert!((m[(2, 2)] - 1.0).abs() < 1e-12);
        assert!(m[(0, 0)] < m[(2, 2)]);
    }

    #[test]
    fn patch_value_is_channel_major() {
        let mut data = vec![0.0; 2 * 2 * 2];
        data[7] = 42.0; // channel 1, row 1, col 1
        let p = Patch::new(2, 2, 2, data).unwrap();
        assert_eq!(p.value(1, 1, 1), 42.0);
        assert_eq!(p.value(0, 1, 1), 0.0);
    }
}
