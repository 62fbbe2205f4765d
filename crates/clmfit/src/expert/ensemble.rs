//! Correlation-filter expert ensemble.

use image::GrayImage;
use nalgebra::{DMatrix, Point2};

use crate::error::FitError;
use crate::filter::{
    DesiredResponse, Filter, IncrementalFilterManager, Patch, SufficientStatistics,
};

use super::sampling::extract_patch;
use super::{ExpertEnsemble, ResponseMap};

/// One trained landmark detector with its warm-update statistics.
#[derive(Debug, Clone)]
struct LandmarkExpert {
    filter: Filter,
    statistics: SufficientStatistics,
}

/// Ensemble of per-landmark correlation-filter experts for one scale.
///
/// Each landmark owns exactly one statistics slot, written only through the
/// manager's `train`/`increment` paths; raw training patches are never
/// retained. Evaluation correlates the landmark's kernel with an intensity
/// window around the query center and returns a non-negative unit-mass
/// response map.
pub struct CorrelationExpertEnsemble {
    experts: Vec<LandmarkExpert>,
    response: DesiredResponse,
    manager: IncrementalFilterManager,
}

impl CorrelationExpertEnsemble {
    /// Cold-train one expert per landmark batch.
    ///
    /// `batches[i]` holds the training patches of landmark `i`; all batches
    /// share the one desired response. Fails on an empty batch list, or with
    /// the manager's error for any malformed landmark batch.
    pub fn train(
        manager: IncrementalFilterManager,
        batches: Vec<Vec<Patch>>,
        response: DesiredResponse,
    ) -> Result<Self, FitError> {
        if batches.is_empty() {
            return Err(FitError::config(
                "expert ensemble needs at least one landmark batch",
            ));
        }
        let n = batches.len();
        let mut experts = Vec::with_capacity(n);
        for batch in batches {
            let (filter, statistics) = manager.train(batch, &response)?;
            experts.push(LandmarkExpert { filter, statistics });
        }
        tracing::info!(n_landmarks = n, "trained correlation expert ensemble");
        Ok(Self {
            experts,
            response,
            manager,
        })
    }

    /// Warm-update every expert with a new batch per landmark.
    ///
    /// The update is atomic: all landmark solves run first and the ensemble
    /// is only rewritten once every one of them succeeded, so a failure never
    /// leaves the ensemble half-refreshed.
    pub fn increment(&mut self, batches: Vec<Vec<Patch>>) -> Result<(), FitError> {
        if batches.len() != self.experts.len() {
            return Err(FitError::config(format!(
                "got {} landmark batches for {} experts",
                batches.len(),
                self.experts.len()
            )));
        }
        let mut updated = Vec::with_capacity(self.experts.len());
        for (expert, batch) in self.experts.iter().zip(batches) {
            let n_new = batch.len();
            let (filter, statistics) =
                self.manager
                    .increment(&expert.statistics, batch, &self.response)?;
            tracing::debug!(
                n_new,
                total = statistics.sample_count,
                "incremented landmark expert"
            );
            updated.push(LandmarkExpert { filter, statistics });
        }
        self.experts = updated;
        Ok(())
    }

    /// Trained filter of one landmark.
    pub fn filter(&self, index: usize) -> &Filter {
        &self.experts[index].filter
    }

    /// Warm-update statistics of one landmark.
    pub fn statistics(&self, index: usize) -> &SufficientStatistics {
        &self.experts[index].statistics
    }

    /// The shared desired response.
    pub fn desired_response(&self) -> &DesiredResponse {
        &self.response
    }
}

impl ExpertEnsemble for CorrelationExpertEnsemble {
    fn n_experts(&self) -> usize {
        self.experts.len()
    }

    fn search_shape(&self) -> (usize, usize) {
        self.response.shape()
    }

    fn response(&self, image: &GrayImage, index: usize, center: Point2<f64>) -> ResponseMap {
        let (rh, rw) = self.response.shape();
        let filter = &self.experts[index].filter;
        let (kh, kw) = filter.kernel_shape();

        // Window covering every kernel placement over the search grid.
        let window = extract_patch(image, center, rh + kh - 1, rw + kw - 1);

        let mut map = DMatrix::zeros(rh, rw);
        for r in 0..rh {
            for c in 0..rw {
                let mut acc = 0.0;
                for ch in 0..filter.n_channels() {
                    let kernel = filter.kernel(ch);
                    for p in 0..kh {
                        for q in 0..kw {
                            acc += kernel[(p, q)] * window.value(0, r + p, c + q);
                        }
                    }
                }
                map[(r, c)] = acc;
            }
        }
        ResponseMap::new(map).normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn dot_image(w: u32, h: u32, x: u32, y: u32) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        img.put_pixel(x, y, Luma([255]));
        img
    }

    fn trained_single_expert(img: &GrayImage, truth: Point2<f64>) -> CorrelationExpertEnsemble {
        let patch = extract_patch(img, truth, 7, 7);
        let response = DesiredResponse::gaussian(3, 3, 0.5).unwrap();
        CorrelationExpertEnsemble::train(
            IncrementalFilterManager::mccf(1e-3),
            vec![vec![patch]],
            response,
        )
        .unwrap()
    }

    #[test]
    fn response_peaks_at_center_when_queried_at_truth() {
        let truth = Point2::new(10.0, 10.0);
        let img = dot_image(21, 21, 10, 10);
        let ensemble = trained_single_expert(&img, truth);

        let map = ensemble.response(&img, 0, truth);
        assert!(!map.is_degenerate());
        assert_eq!(map.peak(), (1, 1));
        assert!((map.mass() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn response_peak_points_back_toward_truth() {
        let truth = Point2::new(10.0, 10.0);
        let img = dot_image(21, 21, 10, 10);
        let ensemble = trained_single_expert(&img, truth);

        // Query one pixel below the truth: the peak must sit one row up.
        let map = ensemble.response(&img, 0, Point2::new(10.0, 11.0));
        assert_eq!(map.peak(), (0, 1));
    }

    #[test]
    fn increment_keeps_shapes_and_is_atomic_on_failure() {
        let truth = Point2::new(10.0, 10.0);
        let img = dot_image(21, 21, 10, 10);
        let mut ensemble = trained_single_expert(&img, truth);
        let shape_before = ensemble.filter(0).kernel_shape();
        let count_before = ensemble.statistics(0).sample_count;

        ensemble
            .increment(vec![vec![extract_patch(&img, truth, 7, 7)]])
            .unwrap();
        assert_eq!(ensemble.filter(0).kernel_shape(), shape_before);
        assert_eq!(ensemble.statistics(0).sample_count, count_before + 1);

        // Wrong geometry is rejected and nothing changes.
        let err = ensemble
            .increment(vec![vec![extract_patch(&img, truth, 9, 9)]])
            .unwrap_err();
        assert!(matches!(err, FitError::DimensionMismatch { .. }));
        assert_eq!(ensemble.statistics(0).sample_count, count_before + 1);
    }

    #[test]
    fn batch_count_must_match_expert_count() {
        let truth = Point2::new(10.0, 10.0);
        let img = dot_image(21, 21, 10, 10);
        let mut ensemble = trained_single_expert(&img, truth);
        let err = ensemble.increment(vec![]).unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));
    }
}
