//! Incremental density estimation over the latent space.
//!
//! Two interchangeable estimators back the encoder: an exact kernel
//! density that retains every sample, and a compressed variant that
//! merges nearby samples into weighted Gaussian kernels to bound memory.
//! Both accept repeated `fit` calls and fold new samples into existing
//! state, so streaming and batch fitting produce the same estimate.

mod kernel_compression;
mod kernel_density;

pub use kernel_compression::KernelCompression;
pub use kernel_density::KernelDensity;

use ndarray::{Array1, ArrayD, ArrayView2};
use thiserror::Error;

use crate::config::{ConfigError, EstimationSpec};
use crate::state_space::StateSpace;

/// Errors from density estimation.
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("dimension mismatch: estimator has {expected} dimensions, data has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid bandwidth: {0}")]
    InvalidBandwidth(String),

    #[error("invalid kernel limit: must be >= 1")]
    InvalidKernelLimit,

    #[error("invalid distance threshold: must not be NaN")]
    InvalidDistanceThreshold,

    #[error("invalid dimension range {start}..{end} for {dims} dimensions")]
    InvalidDimensionRange {
        start: usize,
        end: usize,
        dims: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Incremental kernel density estimator.
///
/// `fit` folds samples into the estimator's state; `evaluate` returns the
/// estimated density at each query point, normalized to sum to 1 across
/// the queried points. Evaluating an estimator that has seen no samples
/// yields all zeros rather than an error.
pub trait DensityEstimator: Send {
    /// Number of dimensions each sample must have.
    fn dims(&self) -> usize;

    /// Fold a batch of samples (one row each) into the estimate.
    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<(), EstimatorError>;

    /// Relative density at each query point, normalized to sum to 1.
    fn evaluate(&self, points: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError>;

    /// Number of retained components (samples or merged kernels).
    fn len(&self) -> usize;

    /// True when no samples have been fitted yet.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evaluate over a freshly built rectangular grid, returning the
    /// densities in the grid's native shape.
    fn evaluate_grid(
        &self,
        min: &[f64],
        max: &[f64],
        steps: &[usize],
    ) -> Result<ArrayD<f64>, EstimatorError> {
        let space = StateSpace::new(min, max, steps)?;
        let flat = self.evaluate(space.points())?;
        Ok(space.to_grid(flat.view())?)
    }
}

/// Construct the estimator described by a validated spec.
pub fn build_estimator(spec: &EstimationSpec) -> Result<Box<dyn DensityEstimator>, EstimatorError> {
    spec.validate()?;
    match spec {
        EstimationSpec::KernelDensity { bandwidth } => {
            Ok(Box::new(KernelDensity::new(bandwidth)?))
        }
        EstimationSpec::KernelCompression {
            bandwidth,
            distance_threshold,
            kernel_limit,
        } => Ok(Box::new(KernelCompression::new(
            bandwidth,
            *distance_threshold,
            *kernel_limit,
        )?)),
    }
}
