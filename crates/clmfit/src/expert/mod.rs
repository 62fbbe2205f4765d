//! Per-landmark patch experts.
//!
//! An expert ensemble is the set of per-landmark detectors used at one
//! pyramid scale. The fitting loop consumes ensembles through the
//! [`ExpertEnsemble`] trait; [`CorrelationExpertEnsemble`] is the provided
//! implementation backed by incrementally trained correlation filters.

use image::GrayImage;
use nalgebra::{DMatrix, Point2};

mod ensemble;
mod sampling;

pub use ensemble::CorrelationExpertEnsemble;
pub use sampling::{bilinear_sample, extract_patch};

/// Detector response evaluated over a search window.
///
/// Cell `(r, c)` corresponds to the image offset
/// `(r - (rows-1)/2, c - (cols-1)/2)` relative to the query center, so the
/// center cell is the query position itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMap {
    /// Response values over the search window.
    pub map: DMatrix<f64>,
}

impl ResponseMap {
    /// Wrap a raw response map.
    pub fn new(map: DMatrix<f64>) -> Self {
        Self { map }
    }

    /// Search window shape `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        self.map.shape()
    }

    /// Total response mass.
    pub fn mass(&self) -> f64 {
        self.map.iter().sum()
    }

    /// Whether the map carries no usable information: empty support,
    /// non-finite values, or zero mass everywhere.
    pub fn is_degenerate(&self) -> bool {
        if self.map.is_empty() {
            return true;
        }
        let mut mass = 0.0;
        for v in self.map.iter() {
            if !v.is_finite() {
                return true;
            }
            mass += v.abs();
        }
        mass <= f64::EPSILON
    }

    /// Shift to non-negative values and rescale to unit mass.
    ///
    /// A constant map has no information to normalize and collapses to
    /// all-zero, which `is_degenerate` then reports.
    pub fn normalized(&self) -> Self {
        let min = self.map.iter().copied().fold(f64::INFINITY, f64::min);
        if !min.is_finite() {
            return Self {
                map: DMatrix::zeros(self.map.nrows(), self.map.ncols()),
            };
        }
        let shifted = self.map.map(|v| v - min);
        let mass: f64 = shifted.iter().sum();
        if mass <= f64::EPSILON {
            return Self {
                map: DMatrix::zeros(self.map.nrows(), self.map.ncols()),
            };
        }
        Self {
            map: shifted / mass,
        }
    }

    /// Row/column offsets of the map center cell.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.map.nrows() as f64 - 1.0) / 2.0,
            (self.map.ncols() as f64 - 1.0) / 2.0,
        )
    }

    /// Location `(row, col)` of the maximum response.
    pub fn peak(&self) -> (usize, usize) {
        let mut best = (0, 0);
        let mut best_v = f64::NEG_INFINITY;
        for r in 0..self.map.nrows() {
            for c in 0..self.map.ncols() {
                if self.map[(r, c)] > best_v {
                    best_v = self.map[(r, c)];
                    best = (r, c);
                }
            }
        }
        best
    }
}

/// Collection of per-landmark patch detectors for one pyramid scale.
///
/// Implementations must be shareable across worker threads: the fitting loop
/// evaluates all landmarks of one iteration concurrently.
pub trait ExpertEnsemble: Send + Sync {
    /// Number of landmark experts.
    fn n_experts(&self) -> usize;

    /// Response search window shape `(rows, cols)`.
    fn search_shape(&self) -> (usize, usize);

    /// Evaluate the detector of landmark `index` around `center`.
    fn response(&self, image: &GrayImage, index: usize, center: Point2<f64>) -> ResponseMap;
}
