//! Multi-scale fitting controller.
//!
//! Drives the coarse-to-fine pyramid: per scale, selects the active
//! shape-model components, rescales the image, hands the incoming shape to
//! that scale's alignment algorithm, and records the inverse transforms so
//! every scale's estimates are reported in original image coordinates.
//! Scales run strictly in sequence, since each scale's initialization is the
//! previous scale's final estimate, and any scale failure aborts the whole
//! fit with no partial result.

use std::sync::Arc;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::algorithm::{
    ActiveShapeModel, AlgorithmKind, AlignmentAlgorithm, RegularisedMeanShift,
};
use crate::error::FitError;
use crate::expert::ExpertEnsemble;
use crate::shape::PointCloud;
use crate::shape_model::{ComponentSpec, LinearShapeModel};
use crate::transform::Affine2;

mod result;

pub use result::FittingResult;

/// Active-component configuration across the pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSelection {
    /// One spec applied at every scale.
    Uniform(ComponentSpec),
    /// One spec per scale, coarsest first.
    PerScale(Vec<ComponentSpec>),
}

impl Default for ComponentSelection {
    fn default() -> Self {
        Self::Uniform(ComponentSpec::All)
    }
}

/// Iteration budget across the pyramid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationBudget {
    /// One bound applied at every scale.
    Uniform(usize),
    /// One bound per scale, coarsest first.
    PerScale(Vec<usize>),
}

impl Default for IterationBudget {
    fn default() -> Self {
        Self::Uniform(20)
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitterOptions {
    /// Alignment variant run at every scale.
    pub algorithm: AlgorithmKind,
    /// Active shape components per scale.
    pub n_shape: ComponentSelection,
    /// Counted-iteration bound per scale.
    pub max_iters: IterationBudget,
    /// Mean-shift kernel variance (ignored by the peak-picking variant).
    pub kernel_variance: f64,
    /// RMS shape change below which a scale stops early.
    pub convergence_eps: f64,
}

impl Default for FitterOptions {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmKind::default(),
            n_shape: ComponentSelection::default(),
            max_iters: IterationBudget::default(),
            kernel_variance: 10.0,
            convergence_eps: 1e-3,
        }
    }
}

/// Multi-scale fitting controller.
///
/// Owns one alignment algorithm per scale, each composed from that scale's
/// expert ensemble and shape model; the variant is picked by configuration,
/// not by subclassing.
pub struct MultiScaleFitter {
    scales: Vec<f64>,
    algorithms: Vec<Box<dyn AlignmentAlgorithm>>,
    max_iters: Vec<usize>,
}

impl std::fmt::Debug for MultiScaleFitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiScaleFitter")
            .field("scales", &self.scales)
            .field("max_iters", &self.max_iters)
            .finish_non_exhaustive()
    }
}

impl MultiScaleFitter {
    /// Assemble a fitter from per-scale models and ensembles.
    ///
    /// `scales`, `shape_models`, and `ensembles` are parallel lists in
    /// processing order (coarsest first). Active components are selected
    /// here, before any fitting runs, so an invalid spec fails construction
    /// rather than a later `fit` call.
    pub fn new(
        scales: Vec<f64>,
        shape_models: Vec<LinearShapeModel>,
        ensembles: Vec<Arc<dyn ExpertEnsemble>>,
        options: FitterOptions,
    ) -> Result<Self, FitError> {
        if scales.is_empty() {
            return Err(FitError::config("scale pyramid must hold at least one scale"));
        }
        for &s in &scales {
            if !s.is_finite() || s <= 0.0 {
                return Err(FitError::config(format!(
                    "scale factors must be finite and positive, got {}",
                    s
                )));
            }
        }
        if shape_models.len() != scales.len() || ensembles.len() != scales.len() {
            return Err(FitError::config(format!(
                "got {} shape models and {} ensembles for {} scales",
                shape_models.len(),
                ensembles.len(),
                scales.len()
            )));
        }

        let specs = resolve_per_scale(&options.n_shape, scales.len())?;
        let iters = resolve_iteration_budget(&options.max_iters, scales.len())?;

        let mut algorithms: Vec<Box<dyn AlignmentAlgorithm>> = Vec::with_capacity(scales.len());
        for ((mut model, ensemble), spec) in
            shape_models.into_iter().zip(ensembles).zip(specs)
        {
            model.set_active_components(spec)?;
            match options.algorithm {
                AlgorithmKind::RegularisedMeanShift => {
                    let mut alg = RegularisedMeanShift::new(ensemble, model);
                    alg.kernel_variance = options.kernel_variance;
                    alg.convergence_eps = options.convergence_eps;
                    algorithms.push(Box::new(alg));
                }
                AlgorithmKind::ActiveShapeModel => {
                    let mut alg = ActiveShapeModel::new(ensemble, model);
                    alg.convergence_eps = options.convergence_eps;
                    algorithms.push(Box::new(alg));
                }
            }
        }

        tracing::info!(
            n_scales = scales.len(),
            algorithm = ?options.algorithm,
            "configured multi-scale fitter"
        );
        Ok(Self {
            scales,
            algorithms,
            max_iters: iters,
        })
    }

    /// Scale factors in processing order.
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// Number of pyramid scales.
    pub fn n_scales(&self) -> usize {
        self.scales.len()
    }

    /// Fit the landmark set on one image.
    ///
    /// `initial_shape` and `gt_shape` are in original image coordinates. The
    /// first scale is initialized from `initial_shape`; every following scale
    /// from the previous scale's final estimate. Any scale failure
    /// propagates; no partially-built result is returned.
    pub fn fit(
        &self,
        image: &GrayImage,
        initial_shape: &PointCloud,
        gt_shape: Option<&PointCloud>,
    ) -> Result<FittingResult, FitError> {
        let (width, height) = image.dimensions();
        let mut results = Vec::with_capacity(self.scales.len());
        let mut affine_transforms = Vec::with_capacity(self.scales.len());
        let mut scale_transforms = Vec::with_capacity(self.scales.len());
        let mut carried: Option<(PointCloud, f64)> = None;

        for (k, &scale) in self.scales.iter().enumerate() {
            let scaled_image = rescale_image(image, scale);
            let shape_in = match &carried {
                None => initial_shape.scaled(scale),
                Some((prev, prev_scale)) => prev.scaled(scale / prev_scale),
            };
            let gt_in = gt_shape.map(|g| g.scaled(scale));

            tracing::info!(scale, max_iters = self.max_iters[k], "fitting scale");
            let result =
                self.algorithms[k].run(&scaled_image, &shape_in, self.max_iters[k], gt_in.as_ref())?;
            tracing::debug!(
                scale,
                n_iters = result.n_iters,
                reason = ?result.reason,
                "scale finished"
            );

            carried = Some((result.final_shape().clone(), scale));
            affine_transforms.push(Affine2::identity());
            scale_transforms.push(Affine2::scaling(1.0 / scale));
            results.push(result);
        }

        Ok(FittingResult::new(
            self.scales.clone(),
            results,
            affine_transforms,
            scale_transforms,
            [width, height],
            gt_shape.cloned(),
        ))
    }
}

fn resolve_per_scale(
    selection: &ComponentSelection,
    n_scales: usize,
) -> Result<Vec<ComponentSpec>, FitError> {
    match selection {
        ComponentSelection::Uniform(spec) => Ok(vec![*spec; n_scales]),
        ComponentSelection::PerScale(specs) => {
            if specs.len() != n_scales {
                return Err(FitError::config(format!(
                    "per-scale component list has {} entries for {} scales",
                    specs.len(),
                    n_scales
                )));
            }
            Ok(specs.clone())
        }
    }
}

fn resolve_iteration_budget(
    budget: &IterationBudget,
    n_scales: usize,
) -> Result<Vec<usize>, FitError> {
    match budget {
        IterationBudget::Uniform(n) => Ok(vec![*n; n_scales]),
        IterationBudget::PerScale(ns) => {
            if ns.len() != n_scales {
                return Err(FitError::config(format!(
                    "per-scale iteration list has {} entries for {} scales",
                    ns.len(),
                    n_scales
                )));
            }
            Ok(ns.clone())
        }
    }
}

/// Build the pyramid image for one scale.
fn rescale_image(image: &GrayImage, scale: f64) -> GrayImage {
    if (scale - 1.0).abs() < 1e-12 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(image, nw, nh, image::imageops::FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::test_support::{
        square_model, square_shape, CenterPeakEnsemble, ZeroEnsemble,
    };
    use crate::expert::{ExpertEnsemble, ResponseMap};
    use nalgebra::{DMatrix, Point2};
    use std::sync::Mutex;

    /// Records which scale evaluated first.
    struct TaggedEnsemble {
        tag: usize,
        log: Arc<Mutex<Vec<usize>>>,
    }

    impl ExpertEnsemble for TaggedEnsemble {
        fn n_experts(&self) -> usize {
            4
        }

        fn search_shape(&self) -> (usize, usize) {
            (5, 5)
        }

        fn response(&self, _: &GrayImage, _: usize, _: Point2<f64>) -> ResponseMap {
            self.log.lock().unwrap().push(self.tag);
            let mut map = DMatrix::zeros(5, 5);
            map[(2, 2)] = 1.0;
            ResponseMap::new(map)
        }
    }

    fn two_scale_fitter(options: FitterOptions) -> MultiScaleFitter {
        MultiScaleFitter::new(
            vec![0.5, 1.0],
            vec![square_model(), square_model()],
            vec![
                Arc::new(CenterPeakEnsemble { n: 4 }) as Arc<dyn ExpertEnsemble>,
                Arc::new(CenterPeakEnsemble { n: 4 }),
            ],
            options,
        )
        .unwrap()
    }

    #[test]
    fn scales_run_coarsest_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let fitter = MultiScaleFitter::new(
            vec![0.5, 1.0],
            vec![square_model(), square_model()],
            vec![
                Arc::new(TaggedEnsemble {
                    tag: 0,
                    log: log.clone(),
                }) as Arc<dyn ExpertEnsemble>,
                Arc::new(TaggedEnsemble {
                    tag: 1,
                    log: log.clone(),
                }),
            ],
            FitterOptions::default(),
        )
        .unwrap();

        let img = GrayImage::new(64, 64);
        let result = fitter.fit(&img, &square_shape(), None).unwrap();
        assert_eq!(result.n_scales(), 2);

        let order = log.lock().unwrap();
        assert!(!order.is_empty());
        let first_fine = order.iter().position(|&t| t == 1).unwrap();
        assert!(order[..first_fine].iter().all(|&t| t == 0));
    }

    #[test]
    fn every_scale_reports_in_image_coordinates() {
        let fitter = two_scale_fitter(FitterOptions::default());
        let img = GrayImage::new(64, 64);
        let initial = square_shape();
        let result = fitter.fit(&img, &initial, None).unwrap();

        for k in 0..2 {
            assert!(!result.results[k].shapes.is_empty());
            // Center-peaked responses keep the shape where it started, so
            // both scales must land on the initialization once mapped back.
            assert!(result.final_shape_at(k).rms_distance(&initial) < 1e-6);
        }
        assert!(result
            .final_shape_at(0)
            .rms_distance(&result.final_shape_at(1))
            < 1e-6);
    }

    #[test]
    fn divergence_propagates_out_of_fit() {
        let fitter = MultiScaleFitter::new(
            vec![0.5, 1.0],
            vec![square_model(), square_model()],
            vec![
                Arc::new(ZeroEnsemble { n: 4 }) as Arc<dyn ExpertEnsemble>,
                Arc::new(CenterPeakEnsemble { n: 4 }),
            ],
            FitterOptions::default(),
        )
        .unwrap();
        let img = GrayImage::new(64, 64);
        let err = fitter.fit(&img, &square_shape(), None).unwrap_err();
        assert!(matches!(err, FitError::AlignmentDiverged { .. }));
    }

    #[test]
    fn per_scale_lists_must_match_the_pyramid() {
        let build = |options| {
            MultiScaleFitter::new(
                vec![0.5, 1.0],
                vec![square_model(), square_model()],
                vec![
                    Arc::new(CenterPeakEnsemble { n: 4 }) as Arc<dyn ExpertEnsemble>,
                    Arc::new(CenterPeakEnsemble { n: 4 }),
                ],
                options,
            )
        };

        let err = build(FitterOptions {
            max_iters: IterationBudget::PerScale(vec![5]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));

        let err = build(FitterOptions {
            n_shape: ComponentSelection::PerScale(vec![ComponentSpec::All; 3]),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));

        // Component overflow surfaces the shape model's rejection.
        let err = build(FitterOptions {
            n_shape: ComponentSelection::Uniform(ComponentSpec::Count(17)),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));
    }

    #[test]
    fn zero_iteration_scales_still_emit_the_reconstruction() {
        let fitter = two_scale_fitter(FitterOptions {
            max_iters: IterationBudget::PerScale(vec![0, 3]),
            ..Default::default()
        });
        let img = GrayImage::new(64, 64);
        let result = fitter.fit(&img, &square_shape(), None).unwrap();
        assert_eq!(result.results[0].n_iters, 0);
        assert_eq!(result.results[0].shapes.len(), 1);
        assert!(result.results[1].n_iters >= 1);
    }

    #[test]
    fn invalid_scales_are_rejected() {
        let err = MultiScaleFitter::new(
            vec![0.0],
            vec![square_model()],
            vec![Arc::new(CenterPeakEnsemble { n: 4 }) as Arc<dyn ExpertEnsemble>],
            FitterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));

        let err = MultiScaleFitter::new(
            vec![],
            vec![],
            vec![],
            FitterOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::Configuration { .. }));
    }

    #[test]
    fn ground_truth_is_reported_in_image_frame() {
        let fitter = two_scale_fitter(FitterOptions::default());
        let img = GrayImage::new(64, 64);
        let initial = square_shape();
        let result = fitter.fit(&img, &initial, Some(&initial)).unwrap();
        assert!(result.final_error().unwrap() < 1e-6);
        // Per-scale traces carry the ground truth in their own frame.
        assert!(result.results[0].gt_shape.is_some());
    }
}
