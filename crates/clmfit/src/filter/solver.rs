//! Correlation-filter solve strategies.
//!
//! Both provided strategies accumulate the same sufficient statistics over
//! the circulant (periodic-extension) design of each zero-padded patch, the
//! spatial-domain equivalent of the classic frequency-domain solutions, and
//! differ only in how the regularised system is solved:
//!
//! - [`MccfSolver`]: full multi-channel regularised least squares (LU solve).
//! - [`MosseSolver`]: decoupled minimum-output-sum-of-squared-errors solve
//!   using the diagonal of the cross-correlation.
//!
//! Statistics are stored as per-sample means, so a one-shot solve over
//! `B1 ∪ B2` and a chained increment over `B1` then `B2` agree exactly under
//! the equal-weight combination rule.

use nalgebra::{DMatrix, DVector};

use crate::error::FitError;

use super::{DesiredResponse, Filter, FilterGeometry, PatchStack, SufficientStatistics};

/// Strategy interface for the correlation-filter solve primitive.
///
/// `solve` is the cold path, `solve_incremental` the warm one; both return
/// the same output shape so callers can treat them uniformly. The combination
/// rule for merging statistics on increment is owned by the strategy.
pub trait CorrelationSolver: Send + Sync + std::fmt::Debug {
    /// Train a filter from scratch on one normalized batch.
    fn solve(
        &self,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError>;

    /// Fold a new batch into existing statistics and re-solve.
    fn solve_incremental(
        &self,
        statistics: &SufficientStatistics,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError>;
}

/// Multi-channel correlation filter via regularised least squares.
#[derive(Debug, Clone, Copy)]
pub struct MccfSolver {
    /// Tikhonov regularisation added to the cross-correlation diagonal.
    pub lambda: f64,
}

impl MccfSolver {
    /// Create with an explicit regularisation weight.
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }
}

impl Default for MccfSolver {
    fn default() -> Self {
        Self { lambda: 0.01 }
    }
}

impl CorrelationSolver for MccfSolver {
    fn solve(
        &self,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let geom = FilterGeometry::of(batch, response);
        let stats = batch_mean_statistics(batch, response, &geom);
        let filter = solve_dense(&geom, &stats, self.lambda)?;
        Ok((filter, stats))
    }

    fn solve_incremental(
        &self,
        statistics: &SufficientStatistics,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let geom = FilterGeometry::of(batch, response);
        validate_statistics_geometry(statistics, &geom)?;
        let merged = merge_statistics(statistics, &batch_mean_statistics(batch, response, &geom));
        let filter = solve_dense(&geom, &merged, self.lambda)?;
        Ok((filter, merged))
    }
}

/// Minimum-output-sum-of-squared-errors filter (decoupled solve).
///
/// Accumulates the full statistics of the shared contract but solves each
/// coefficient independently against the cross-correlation diagonal, trading
/// inter-tap coupling for speed.
#[derive(Debug, Clone, Copy)]
pub struct MosseSolver {
    /// Regularisation added to each diagonal entry before the division.
    pub lambda: f64,
}

impl MosseSolver {
    /// Create with an explicit regularisation weight.
    pub fn new(lambda: f64) -> Self {
        Self { lambda }
    }
}

impl Default for MosseSolver {
    fn default() -> Self {
        Self { lambda: 0.01 }
    }
}

impl CorrelationSolver for MosseSolver {
    fn solve(
        &self,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let geom = FilterGeometry::of(batch, response);
        let stats = batch_mean_statistics(batch, response, &geom);
        let filter = solve_diagonal(&geom, &stats, self.lambda);
        Ok((filter, stats))
    }

    fn solve_incremental(
        &self,
        statistics: &SufficientStatistics,
        batch: &PatchStack,
        response: &DesiredResponse,
    ) -> Result<(Filter, SufficientStatistics), FitError> {
        let geom = FilterGeometry::of(batch, response);
        validate_statistics_geometry(statistics, &geom)?;
        let merged = merge_statistics(statistics, &batch_mean_statistics(batch, response, &geom));
        let filter = solve_diagonal(&geom, &merged, self.lambda);
        Ok((filter, merged))
    }
}

/// Reject statistics whose geometry disagrees with the batch geometry.
pub(crate) fn validate_statistics_geometry(
    stats: &SufficientStatistics,
    geom: &FilterGeometry,
) -> Result<(), FitError> {
    let n = geom.extended_len();
    if stats.auto_correlation.len() != n {
        return Err(FitError::DimensionMismatch {
            expected: n,
            got: stats.auto_correlation.len(),
        });
    }
    if stats.cross_correlation.shape() != (n, n) {
        return Err(FitError::DimensionMismatch {
            expected: n,
            got: stats.cross_correlation.nrows(),
        });
    }
    Ok(())
}

/// Equal-weight running-mean merge: every sample ever observed counts once.
fn merge_statistics(
    prev: &SufficientStatistics,
    batch: &SufficientStatistics,
) -> SufficientStatistics {
    let n = prev.sample_count as f64;
    let m = batch.sample_count as f64;
    let w_prev = n / (n + m);
    let w_new = m / (n + m);
    SufficientStatistics {
        auto_correlation: &prev.auto_correlation * w_prev + &batch.auto_correlation * w_new,
        cross_correlation: &prev.cross_correlation * w_prev + &batch.cross_correlation * w_new,
        sample_count: prev.sample_count + batch.sample_count,
    }
}

#[inline]
fn flat_index(geom: &FilterGeometry, channel: usize, row: usize, col: usize) -> usize {
    (channel * geom.extended_h() + row) * geom.extended_w() + col
}

/// Zero-pad one patch channel into the top-left of the extended grid.
fn embed_patch_channel(
    patch: &super::Patch,
    channel: usize,
    eh: usize,
    ew: usize,
) -> DMatrix<f64> {
    let [_, ph, pw] = patch.shape();
    let mut out = DMatrix::zeros(eh, ew);
    for r in 0..ph {
        for c in 0..pw {
            out[(r, c)] = patch.value(channel, r, c);
        }
    }
    out
}

/// Embed the desired response so its support is centered on the patch center.
///
/// Placement uses modular arithmetic so that response supports larger than
/// the patch wrap instead of truncating.
fn embed_response(response: &DesiredResponse, geom: &FilterGeometry) -> DMatrix<f64> {
    let eh = geom.extended_h();
    let ew = geom.extended_w();
    let (rh, rw) = response.shape();
    let oy = (geom.patch_h as isize - 1) / 2 - (rh as isize - 1) / 2;
    let ox = (geom.patch_w as isize - 1) / 2 - (rw as isize - 1) / 2;
    let mut out = DMatrix::zeros(eh, ew);
    let map = response.map();
    for r in 0..rh {
        for c in 0..rw {
            let u = (oy + r as isize).rem_euclid(eh as isize) as usize;
            let v = (ox + c as isize).rem_euclid(ew as isize) as usize;
            out[(u, v)] = map[(r, c)];
        }
    }
    out
}

/// Circular cross-correlation: `out(dp, dq) = Σ a(u, v) · b(u+dp, v+dq)`
/// with periodic indexing on `b`.
fn circular_correlation(a: &DMatrix<f64>, b: &DMatrix<f64>) -> DMatrix<f64> {
    let (h, w) = a.shape();
    DMatrix::from_fn(h, w, |dp, dq| {
        let mut acc = 0.0;
        for u in 0..h {
            let bu = (u + dp) % h;
            for v in 0..w {
                acc += a[(u, v)] * b[(bu, (v + dq) % w)];
            }
        }
        acc
    })
}

/// Accumulate per-sample mean auto-/cross-correlation statistics.
fn batch_mean_statistics(
    batch: &PatchStack,
    response: &DesiredResponse,
    geom: &FilterGeometry,
) -> SufficientStatistics {
    let eh = geom.extended_h();
    let ew = geom.extended_w();
    let n = geom.extended_len();
    let t_ext = embed_response(response, geom);

    let mut auto = DVector::zeros(n);
    let mut cross = DMatrix::zeros(n, n);

    for patch in batch.iter() {
        let chans: Vec<DMatrix<f64>> = (0..geom.channels)
            .map(|c| embed_patch_channel(patch, c, eh, ew))
            .collect();

        for (ci, xc) in chans.iter().enumerate() {
            let cc = circular_correlation(&t_ext, xc);
            for p in 0..eh {
                for q in 0..ew {
                    auto[flat_index(geom, ci, p, q)] += cc[(p, q)];
                }
            }
        }

        // B[(c1,p1,q1),(c2,p2,q2)] is the circular correlation of the two
        // channels at lag (p2-p1, q2-q1); fill every block by lookup.
        for (c1, x1) in chans.iter().enumerate() {
            for (c2, x2) in chans.iter().enumerate() {
                let cc = circular_correlation(x1, x2);
                for p1 in 0..eh {
                    for q1 in 0..ew {
                        let k1 = flat_index(geom, c1, p1, q1);
                        for p2 in 0..eh {
                            for q2 in 0..ew {
                                let k2 = flat_index(geom, c2, p2, q2);
                                cross[(k1, k2)] +=
                                    cc[((p2 + eh - p1) % eh, (q2 + ew - q1) % ew)];
                            }
                        }
                    }
                }
            }
        }
    }

    let inv_m = 1.0 / batch.len() as f64;
    SufficientStatistics {
        auto_correlation: auto * inv_m,
        cross_correlation: cross * inv_m,
        sample_count: batch.len(),
    }
}

/// Crop the extended solution into a response-sized kernel centered on the
/// zero lag (wrap-around indexing, the spatial analogue of an fft shift).
fn crop_filter(solution: &DVector<f64>, geom: &FilterGeometry) -> Filter {
    let eh = geom.extended_h() as isize;
    let ew = geom.extended_w() as isize;
    let half_r = (geom.response_h as isize - 1) / 2;
    let half_c = (geom.response_w as isize - 1) / 2;
    let kernels = (0..geom.channels)
        .map(|ch| {
            DMatrix::from_fn(geom.response_h, geom.response_w, |r, c| {
                let p = (r as isize - half_r).rem_euclid(eh) as usize;
                let q = (c as isize - half_c).rem_euclid(ew) as usize;
                solution[flat_index(geom, ch, p, q)]
            })
        })
        .collect();
    Filter::from_kernels(kernels)
}

fn solve_dense(
    geom: &FilterGeometry,
    stats: &SufficientStatistics,
    lambda: f64,
) -> Result<Filter, FitError> {
    let n = geom.extended_len();
    let mut system = stats.cross_correlation.clone();
    for k in 0..n {
        system[(k, k)] += lambda;
    }
    let solution = system
        .lu()
        .solve(&stats.auto_correlation)
        .ok_or_else(|| FitError::config("regularised correlation system is singular"))?;
    Ok(crop_filter(&solution, geom))
}

fn solve_diagonal(geom: &FilterGeometry, stats: &SufficientStatistics, lambda: f64) -> Filter {
    let n = geom.extended_len();
    let solution = DVector::from_fn(n, |k, _| {
        stats.auto_correlation[k] / (stats.cross_correlation[(k, k)] + lambda)
    });
    crop_filter(&solution, geom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Patch;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn impulse_patch(h: usize, w: usize) -> Patch {
        let mut data = vec![0.0; h * w];
        data[(h / 2) * w + w / 2] = 1.0;
        Patch::new(1, h, w, data).unwrap()
    }

    fn random_batch(rng: &mut StdRng, n: usize, h: usize, w: usize) -> Vec<Patch> {
        (0..n)
            .map(|_| {
                let data = (0..h * w).map(|_| rng.gen_range(-1.0..1.0)).collect();
                Patch::new(1, h, w, data).unwrap()
            })
            .collect()
    }

    #[test]
    fn mccf_impulse_training_yields_centered_kernel() {
        let solver = MccfSolver::new(1e-3);
        let batch = PatchStack::new(vec![impulse_patch(5, 5)]).unwrap();
        let response = DesiredResponse::gaussian(3, 3, 0.75).unwrap();
        let (filter, stats) = solver.solve(&batch, &response).unwrap();

        assert_eq!(filter.n_channels(), 1);
        assert_eq!(filter.kernel_shape(), (3, 3));
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.extended_len(), 7 * 7);

        // The learned kernel must peak where the desired response peaks.
        let k = filter.kernel(0);
        let mut best = (0, 0);
        for r in 0..3 {
            for c in 0..3 {
                if k[(r, c)] > k[best] {
                    best = (r, c);
                }
            }
        }
        assert_eq!(best, (1, 1));
    }

    #[test]
    fn solve_is_deterministic_bit_for_bit() {
        let mut rng = StdRng::seed_from_u64(7);
        let patches = random_batch(&mut rng, 4, 6, 6);
        let response = DesiredResponse::gaussian(3, 3, 1.0).unwrap();
        let solver = MccfSolver::default();

        let a = solver
            .solve(&PatchStack::new(patches.clone()).unwrap(), &response)
            .unwrap();
        let b = solver
            .solve(&PatchStack::new(patches).unwrap(), &response)
            .unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.1, b.1);
    }

    #[test]
    fn incremental_chain_matches_single_batch() {
        let mut rng = StdRng::seed_from_u64(21);
        let b1 = random_batch(&mut rng, 2, 5, 5);
        let b2 = random_batch(&mut rng, 3, 5, 5);
        let response = DesiredResponse::gaussian(3, 3, 1.0).unwrap();
        let solver = MccfSolver::default();

        let (_, s1) = solver
            .solve(&PatchStack::new(b1.clone()).unwrap(), &response)
            .unwrap();
        let (_, s12) = solver
            .solve_incremental(&s1, &PatchStack::new(b2.clone()).unwrap(), &response)
            .unwrap();
        assert_eq!(s12.sample_count, 5);

        let mut all = b1;
        all.extend(b2);
        let (_, s_all) = solver
            .solve(&PatchStack::new(all).unwrap(), &response)
            .unwrap();
        assert_eq!(s_all.sample_count, s12.sample_count);
        let max_diff = (&s_all.cross_correlation - &s12.cross_correlation)
            .iter()
            .fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(max_diff < 1e-9, "cross-correlation drift {}", max_diff);
    }

    #[test]
    fn incremental_rejects_foreign_geometry() {
        let mut rng = StdRng::seed_from_u64(3);
        let response = DesiredResponse::gaussian(3, 3, 1.0).unwrap();
        let solver = MosseSolver::default();

        let small = PatchStack::new(random_batch(&mut rng, 2, 4, 4)).unwrap();
        let (_, stats) = solver.solve(&small, &response).unwrap();

        let big = PatchStack::new(random_batch(&mut rng, 2, 6, 6)).unwrap();
        let err = solver.solve_incremental(&stats, &big, &response).unwrap_err();
        assert!(matches!(err, FitError::DimensionMismatch { .. }));
    }

    #[test]
    fn mosse_and_mccf_share_statistics_contract() {
        let mut rng = StdRng::seed_from_u64(11);
        let patches = random_batch(&mut rng, 3, 5, 4);
        let response = DesiredResponse::gaussian(3, 3, 1.0).unwrap();

        let (fa, sa) = MccfSolver::default()
            .solve(&PatchStack::new(patches.clone()).unwrap(), &response)
            .unwrap();
        let (fb, sb) = MosseSolver::default()
            .solve(&PatchStack::new(patches).unwrap(), &response)
            .unwrap();

        // Same statistics, different solve.
        assert_eq!(sa, sb);
        assert_eq!(fa.kernel_shape(), fb.kernel_shape());
        assert_ne!(fa, fb);
    }

    #[test]
    fn cross_correlation_matrix_is_symmetric() {
        let mut rng = StdRng::seed_from_u64(5);
        let batch = PatchStack::new(random_batch(&mut rng, 2, 4, 4)).unwrap();
        let response = DesiredResponse::gaussian(3, 3, 1.0).unwrap();
        let (_, stats) = MccfSolver::default().solve(&batch, &response).unwrap();

        let b = &stats.cross_correlation;
        let asym = (b - b.transpose()).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(asym < 1e-12);
    }
}
