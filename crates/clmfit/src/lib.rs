//! clmfit: constrained local model landmark fitting.
//!
//! Locates a fixed set of landmark points on a grayscale image by fitting a
//! statistical shape model against per-landmark correlation-filter patch
//! detectors, refined across a coarse-to-fine scale pyramid. The pipeline
//! stages are:
//!
//! 1. **Filter** – incremental correlation-filter training: cold `train` and
//!    warm `increment` over auto-/cross-correlation sufficient statistics,
//!    with pluggable solve strategies (regularised least squares, MOSSE).
//! 2. **Expert** – per-landmark patch detectors evaluated into response maps
//!    around a query position.
//! 3. **Algorithm** – per-scale alignment: regularised landmark mean-shift or
//!    active-shape-model peak picking, constrained by the shape model.
//! 4. **Fitter** – the multi-scale controller: per-scale reconstruction,
//!    optimization, and transform composition back to image coordinates.
//!
//! # Public API
//! - [`MultiScaleFitter`] and [`FitterOptions`] as the primary entry points
//! - [`IncrementalFilterManager`] and [`CorrelationExpertEnsemble`] for
//!   training and refreshing detectors
//! - [`LinearShapeModel`] as the consumed shape-model value type
//!
//! Fitting is synchronous and free of blocking I/O; scales run strictly in
//! sequence, while per-landmark detector evaluation inside one iteration
//! fans out across the rayon pool.

mod algorithm;
mod error;
mod expert;
mod filter;
mod fitter;
mod shape;
mod shape_model;
mod transform;

pub use algorithm::{
    ActiveShapeModel, AlgorithmKind, AlgorithmResult, AlignmentAlgorithm, RegularisedMeanShift,
    StopReason,
};
pub use error::{BatchIssue, FitError};
pub use expert::{
    bilinear_sample, extract_patch, CorrelationExpertEnsemble, ExpertEnsemble, ResponseMap,
};
pub use filter::{
    CorrelationSolver, DesiredResponse, Filter, FilterGeometry, IncrementalFilterManager,
    MccfSolver, MosseSolver, Patch, PatchStack, SufficientStatistics,
};
pub use fitter::{
    ComponentSelection, FitterOptions, FittingResult, IterationBudget, MultiScaleFitter,
};
pub use shape::PointCloud;
pub use shape_model::{ComponentSpec, LinearShapeModel};
pub use transform::{procrustes_similarity, Affine2};
