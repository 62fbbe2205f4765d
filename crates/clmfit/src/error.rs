//! Library-wide error taxonomy.
//!
//! Every variant propagates to the immediate caller uncaught. Masking a
//! malformed batch or a divergence would corrupt downstream sufficient
//! statistics, so there is no silent recovery anywhere in the crate.

/// Reason a training batch could not be normalized into a rectangular stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchIssue {
    /// The batch contains no patches.
    Empty,
    /// A patch disagrees with the shape of the first patch in the batch.
    Ragged {
        /// Index of the offending patch within the batch.
        index: usize,
        /// Shape of the first patch, `[channels, height, width]`.
        expected: [usize; 3],
        /// Shape of the offending patch.
        got: [usize; 3],
    },
    /// Raw sample buffer length does not match the declared patch shape.
    DataLength {
        /// `channels * height * width` implied by the declared shape.
        expected: usize,
        /// Length of the provided buffer.
        got: usize,
    },
    /// The desired response has a degenerate (zero-sized) support.
    EmptyResponse,
}

impl std::fmt::Display for BatchIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty training batch"),
            Self::Ragged {
                index,
                expected,
                got,
            } => write!(
                f,
                "patch {} has shape {:?}, batch expects {:?}",
                index, got, expected
            ),
            Self::DataLength { expected, got } => {
                write!(f, "patch buffer length {} does not match shape ({})", got, expected)
            }
            Self::EmptyResponse => write!(f, "desired response has zero-sized support"),
        }
    }
}

/// Errors surfaced by filter training, alignment, and multi-scale fitting.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// Training batch is malformed: empty, ragged, or inconsistent buffers.
    ShapeMismatch {
        /// What made the batch unusable.
        issue: BatchIssue,
    },
    /// Sufficient statistics geometry is inconsistent with the batch geometry.
    DimensionMismatch {
        /// Extended length `N` implied by the patch/response geometry.
        expected: usize,
        /// Auto-correlation length found in the provided statistics.
        got: usize,
    },
    /// Every landmark produced a degenerate response map in one iteration.
    AlignmentDiverged {
        /// Zero-based counted iteration at which the responses collapsed.
        iteration: usize,
        /// Number of landmarks that were evaluated.
        n_landmarks: usize,
    },
    /// Invalid fitter, shape-model, or solver configuration.
    Configuration {
        /// Description of the rejected value.
        reason: String,
    },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeMismatch { issue } => write!(f, "malformed training batch: {}", issue),
            Self::DimensionMismatch { expected, got } => write!(
                f,
                "statistics geometry mismatch: batch requires N = {}, statistics carry {}",
                expected, got
            ),
            Self::AlignmentDiverged {
                iteration,
                n_landmarks,
            } => write!(
                f,
                "alignment diverged at iteration {}: all {} response maps degenerate",
                iteration, n_landmarks
            ),
            Self::Configuration { reason } => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl std::error::Error for FitError {}

impl FitError {
    /// Shorthand for a [`FitError::Configuration`] with a formatted reason.
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }
}
