//! Discretized latent state space.
//!
//! A `StateSpace` is the evaluation grid every other component agrees on:
//! density estimators are queried at its points, transition matrices are
//! indexed by its point order, and posteriors are reported over it. The
//! flattened ordering is row-major (last dimension fastest) and is part of
//! the contract; reshaping a flat per-point vector back into the grid shape
//! relies on it.

use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, IxDyn};

use crate::config::{ConfigError, GridSpec};

/// Evenly spaced Cartesian grid over the latent space.
#[derive(Debug, Clone)]
pub struct StateSpace {
    min: Vec<f64>,
    max: Vec<f64>,
    steps: Vec<usize>,
    /// Flattened grid points, one row per point, row-major over `steps`.
    points: Array2<f64>,
}

impl StateSpace {
    /// Build the grid described by a validated spec.
    pub fn from_spec(spec: &GridSpec) -> Result<Self, ConfigError> {
        spec.validate()?;
        let dims = spec.dims();
        let len = spec.len();

        let axes: Vec<Vec<f64>> = (0..dims)
            .map(|d| linspace(spec.min[d], spec.max[d], spec.steps[d]))
            .collect();

        let mut points = Array2::zeros((len, dims));
        for (i, mut row) in points.rows_mut().into_iter().enumerate() {
            // Decode the flat index with the last dimension varying fastest.
            let mut rem = i;
            for d in (0..dims).rev() {
                let idx = rem % spec.steps[d];
                rem /= spec.steps[d];
                row[d] = axes[d][idx];
            }
        }

        Ok(Self {
            min: spec.min.clone(),
            max: spec.max.clone(),
            steps: spec.steps.clone(),
            points,
        })
    }

    /// Convenience constructor from raw bounds.
    pub fn new(min: &[f64], max: &[f64], steps: &[usize]) -> Result<Self, ConfigError> {
        Self::from_spec(&GridSpec {
            min: min.to_vec(),
            max: max.to_vec(),
            steps: steps.to_vec(),
        })
    }

    /// Number of latent dimensions.
    pub fn dims(&self) -> usize {
        self.min.len()
    }

    /// Total number of grid points.
    pub fn len(&self) -> usize {
        self.points.nrows()
    }

    /// True when the grid holds no points.
    pub fn is_empty(&self) -> bool {
        self.points.nrows() == 0
    }

    /// Grid extent per dimension.
    pub fn shape(&self) -> &[usize] {
        &self.steps
    }

    /// Lower bounds per dimension.
    pub fn min(&self) -> &[f64] {
        &self.min
    }

    /// Upper bounds per dimension.
    pub fn max(&self) -> &[f64] {
        &self.max
    }

    /// All grid points as a `[len, dims]` view.
    pub fn points(&self) -> ArrayView2<'_, f64> {
        self.points.view()
    }

    /// A single grid point by flat index.
    pub fn point(&self, index: usize) -> ArrayView1<'_, f64> {
        self.points.row(index)
    }

    /// Reshape a flat per-point vector into the native grid shape.
    ///
    /// Errors when the length does not match the grid.
    pub fn to_grid(&self, flat: ArrayView1<'_, f64>) -> Result<ArrayD<f64>, ConfigError> {
        if flat.len() != self.len() {
            return Err(ConfigError::DimensionMismatch {
                field: "state_space.flat",
                expected: self.len(),
                got: flat.len(),
            });
        }
        let owned = flat.to_owned();
        owned
            .into_shape_with_order(IxDyn(&self.steps))
            .map_err(|e| ConfigError::InvalidValue {
                field: "state_space.shape",
                message: e.to_string(),
            })
    }
}

/// `steps` evenly spaced values from `min` to `max` inclusive.
/// With a single step the sole value is `min`.
fn linspace(min: f64, max: f64, steps: usize) -> Vec<f64> {
    if steps == 1 {
        return vec![min];
    }
    let delta = (max - min) / (steps - 1) as f64;
    (0..steps).map(|i| min + delta * i as f64).collect()
}
