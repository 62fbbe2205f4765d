//! Incremental correlation-filter training front-end.
//!
//! [`IncrementalFilterManager`] is the single entry point callers use to
//! produce and refresh per-landmark patch detectors. It normalizes raw batch
//! input, validates geometry, and delegates the numeric solve to the
//! configured [`CorrelationSolver`] strategy. `train` and `increment` share
//! one output shape so a cold start and a warm update are interchangeable
//! downstream.

use crate::error::FitError;

use super::solver::validate_statistics_geometry;
use super::{
    CorrelationSolver, DesiredResponse, Filter, FilterGeometry, MccfSolver, MosseSolver, Patch,
    PatchStack, SufficientStatistics,
};

/// Trains and incrementally refreshes correlation-filter patch detectors.
///
/// The manager is stateless apart from its solver strategy: `train` and
/// `increment` are pure functions of their arguments, which keeps repeated
/// warm updates safe to chain arbitrarily many times. Per-landmark statistics
/// ownership lives with the caller (one slot per landmark, never shared).
#[derive(Debug)]
pub struct IncrementalFilterManager {
    solver: Box<dyn CorrelationSolver>,
}

impl IncrementalFilterManager {
    /// Create with an explicit solver strategy.
    pub fn new(solver: Box<dyn CorrelationSolver>) -> Self {
        Self { solver }
    }

    /// Convenience constructor for the regularised least-squares strategy.
    pub fn mccf(lambda: f64) -> Self {
        Self::new(Box::new(MccfSolver::new(lambda)))
    }

    /// Convenience constructor for the decoupled MOSSE strategy.
    pub fn mosse(lambda: f64) -> Self {
        Self::new(Box::new(MosseSolver::new(lambda)))
    }

    /// Cold-start training on one batch.
    ///
    /// The batch is normalized into a rectangular stack first; empty or
    /// ragged input fails with [`FitError::ShapeMismatch`]. Any statistics a
    /// caller holds for this landmark are superseded by the returned ones;
    /// this path is not cumulative.
    pub fn train(
        &self,
        patches: Vec<Patch>,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let batch = PatchStack::new(patches)?;
        self.solver.solve(&batch, response)
    }

    /// Warm update folding a new batch into existing statistics.
    ///
    /// Beyond the `train` preconditions, the provided statistics must carry
    /// the geometry implied by the batch and response
    /// ([`FitError::DimensionMismatch`] otherwise). The returned statistics
    /// account for `statistics.sample_count + patches.len()` observations and
    /// are the valid input for the next `increment` call.
    pub fn increment(
        &self,
        statistics: &SufficientStatistics,
        patches: Vec<Patch>,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let batch = PatchStack::new(patches)?;
        validate_statistics_geometry(statistics, &FilterGeometry::of(&batch, response))?;
        self.solver.solve_incremental(statistics, &batch, response)
    }
}

impl Default for IncrementalFilterManager {
    /// Regularised least squares with the solver's default weight.
    fn default() -> Self {
        Self::new(Box::new(MccfSolver::default()))
    }
}
