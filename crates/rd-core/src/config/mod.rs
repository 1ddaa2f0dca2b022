//! Shared configuration types for the decoding pipeline.
//!
//! The grid, estimation, and transition specifications are plain data:
//! they can be deserialized from JSON/TOML, validated up front, and then
//! handed to the component factories. Components trust a validated spec,
//! so every reachable invalid combination is rejected here rather than
//! deep inside a fit or decode loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },

    #[error("dimension mismatch for {field}: expected {expected}, got {got}")]
    DimensionMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Rectangular evaluation grid over the latent space.
///
/// Each dimension d is discretized into `steps[d]` evenly spaced values
/// from `min[d]` to `max[d]` inclusive. The flattened point set iterates
/// the last dimension fastest (row-major order).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSpec {
    /// Lower bound per dimension.
    pub min: Vec<f64>,
    /// Upper bound per dimension (inclusive).
    pub max: Vec<f64>,
    /// Number of grid values per dimension.
    pub steps: Vec<usize>,
}

impl GridSpec {
    /// Uniform spec across all dimensions.
    pub fn uniform(dims: usize, min: f64, max: f64, steps: usize) -> Self {
        Self {
            min: vec![min; dims],
            max: vec![max; dims],
            steps: vec![steps; dims],
        }
    }

    /// Number of latent dimensions.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    /// Total number of grid points across all dimensions.
    pub fn len(&self) -> usize {
        self.steps.iter().product()
    }

    /// True when the spec describes no dimensions at all.
    pub fn is_empty(&self) -> bool {
        self.min.is_empty()
    }

    /// Validate bounds, counts, and finiteness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "grid.min",
                message: "at least one dimension is required".to_string(),
            });
        }
        if self.max.len() != self.min.len() {
            return Err(ConfigError::DimensionMismatch {
                field: "grid.max",
                expected: self.min.len(),
                got: self.max.len(),
            });
        }
        if self.steps.len() != self.min.len() {
            return Err(ConfigError::DimensionMismatch {
                field: "grid.steps",
                expected: self.min.len(),
                got: self.steps.len(),
            });
        }
        for d in 0..self.min.len() {
            if !self.min[d].is_finite() || !self.max[d].is_finite() {
                return Err(ConfigError::InvalidValue {
                    field: "grid.min/max",
                    message: format!("bounds must be finite, got [{}, {}]", self.min[d], self.max[d]),
                });
            }
            if self.max[d] <= self.min[d] {
                return Err(ConfigError::InvalidValue {
                    field: "grid.max",
                    message: format!(
                        "upper bound must exceed lower bound, got [{}, {}] in dimension {}",
                        self.min[d], self.max[d], d
                    ),
                });
            }
            if self.steps[d] == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "grid.steps",
                    message: format!("step count must be >= 1, got 0 in dimension {}", d),
                });
            }
        }
        Ok(())
    }
}

/// Density estimation method for occupancy and per-channel surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EstimationSpec {
    /// Exact kernel density: every fitted sample is retained.
    KernelDensity {
        /// Gaussian kernel bandwidth per dimension.
        bandwidth: Vec<f64>,
    },

    /// Compressed kernel density: nearby samples are merged into weighted
    /// Gaussian kernels, bounding memory regardless of sample count.
    KernelCompression {
        /// Gaussian kernel bandwidth per dimension. Seeds each new kernel's
        /// diagonal variance as bandwidth^2.
        bandwidth: Vec<f64>,
        /// Mahalanobis distance above which a sample opens a new kernel
        /// instead of merging. Defaults to negative infinity (always open
        /// a new kernel while under the limit).
        #[serde(default)]
        distance_threshold: Option<f64>,
        /// Hard cap on the number of retained kernels. Defaults to unbounded.
        #[serde(default)]
        kernel_limit: Option<usize>,
    },
}

impl EstimationSpec {
    /// Bandwidth vector regardless of method.
    pub fn bandwidth(&self) -> &[f64] {
        match self {
            EstimationSpec::KernelDensity { bandwidth } => bandwidth,
            EstimationSpec::KernelCompression { bandwidth, .. } => bandwidth,
        }
    }

    /// Validate bandwidths and compression parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bandwidth = self.bandwidth();
        if bandwidth.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "estimation.bandwidth",
                message: "at least one dimension is required".to_string(),
            });
        }
        for (d, b) in bandwidth.iter().enumerate() {
            if !b.is_finite() || *b <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "estimation.bandwidth",
                    message: format!("bandwidth must be finite and > 0, got {} in dimension {}", b, d),
                });
            }
        }
        if let EstimationSpec::KernelCompression {
            distance_threshold,
            kernel_limit,
            ..
        } = self
        {
            if let Some(threshold) = distance_threshold {
                if threshold.is_nan() {
                    return Err(ConfigError::InvalidValue {
                        field: "estimation.distance_threshold",
                        message: "distance threshold must not be NaN".to_string(),
                    });
                }
            }
            if let Some(limit) = kernel_limit {
                if *limit == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "estimation.kernel_limit",
                        message: "kernel limit must be >= 1".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// State transition structure for the forward filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionSpec {
    /// Equal probability of moving to any state.
    Uniform,

    /// Gaussian fall-off with distance between states.
    RandomWalk {
        /// Distance scale. When absent, inferred from the state space as
        /// half the mean pairwise distance.
        #[serde(default)]
        bandwidth: Option<f64>,
    },

    /// Identity transition: states never move.
    Stationary,

    /// Inverted random walk favoring jumps to distant states.
    ReciprocalGaussian {
        /// Distance scale, as for `RandomWalk`.
        #[serde(default)]
        bandwidth: Option<f64>,
    },
}

impl Default for TransitionSpec {
    /// A random walk with an inferred distance scale.
    fn default() -> Self {
        TransitionSpec::RandomWalk { bandwidth: None }
    }
}

impl TransitionSpec {
    /// Validate the optional distance scale.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bandwidth = match self {
            TransitionSpec::RandomWalk { bandwidth } => bandwidth,
            TransitionSpec::ReciprocalGaussian { bandwidth } => bandwidth,
            _ => &None,
        };
        if let Some(b) = bandwidth {
            if !b.is_finite() || *b <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "transition.bandwidth",
                    message: format!("bandwidth must be finite and > 0, got {}", b),
                });
            }
        }
        Ok(())
    }
}
