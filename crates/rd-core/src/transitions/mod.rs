//! State transition structure for the forward filters.
//!
//! A transition model is a dense row-normalized `[states, states]` weight
//! matrix over the state space's point order. The filter applies it as
//! `matrix . posterior` each step, so row `i` holds the weights with
//! which mass arriving at state `i` is drawn from every state `j`.

mod random_walk;
mod reciprocal_gaussian;
mod stationary;
mod uniform;

pub use random_walk::RandomWalkTransition;
pub use reciprocal_gaussian::ReciprocalGaussianTransition;
pub use stationary::StationaryTransition;
pub use uniform::UniformTransition;

use ndarray::{Array2, ArrayView2};
use thiserror::Error;

use crate::config::{ConfigError, TransitionSpec};
use crate::state_space::StateSpace;

/// Errors from transition model construction.
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid transition bandwidth: must be finite and > 0, got {0}")]
    InvalidBandwidth(f64),

    #[error("cannot infer a distance scale: state space has fewer than two distinct points")]
    DegenerateStateSpace,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Dense transition structure over a discretized state space.
pub trait TransitionModel: Send {
    /// Row-normalized transition weights, `[states, states]`.
    fn matrix(&self) -> ArrayView2<'_, f64>;

    /// Number of states the matrix covers.
    fn len(&self) -> usize {
        self.matrix().nrows()
    }
}

/// Construct the transition model described by a validated spec.
pub fn build_transition(
    spec: &TransitionSpec,
    space: &StateSpace,
) -> Result<Box<dyn TransitionModel>, TransitionError> {
    spec.validate()?;
    match spec {
        TransitionSpec::Uniform => Ok(Box::new(UniformTransition::new(space))),
        TransitionSpec::RandomWalk { bandwidth } => {
            Ok(Box::new(RandomWalkTransition::new(space, *bandwidth)?))
        }
        TransitionSpec::Stationary => Ok(Box::new(StationaryTransition::new(space))),
        TransitionSpec::ReciprocalGaussian { bandwidth } => Ok(Box::new(
            ReciprocalGaussianTransition::new(space, *bandwidth)?,
        )),
    }
}

/// Squared Euclidean distances between all pairs of grid points.
pub(crate) fn pairwise_sq_distances(space: &StateSpace) -> Array2<f64> {
    let points = space.points();
    let n = points.nrows();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let mut d2 = 0.0;
            for d in 0..points.ncols() {
                let diff = points[[i, d]] - points[[j, d]];
                d2 += diff * diff;
            }
            out[[i, j]] = d2;
            out[[j, i]] = d2;
        }
    }
    out
}

/// Mean Euclidean distance over ordered pairs `i != j`.
/// Zero for spaces with a single point or fully duplicated points.
pub(crate) fn mean_pairwise_distance(sq_distances: &Array2<f64>) -> f64 {
    let n = sq_distances.nrows();
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                sum += sq_distances[[i, j]].sqrt();
            }
        }
    }
    sum / (n * (n - 1)) as f64
}

/// Normalize each row to sum to 1. Rows with no mass become uniform;
/// returns how many rows needed that fallback.
pub(crate) fn normalize_rows(matrix: &mut Array2<f64>) -> usize {
    let n = matrix.ncols();
    let uniform = 1.0 / n as f64;
    let mut fallbacks = 0;
    for mut row in matrix.rows_mut() {
        let total: f64 = row.sum();
        if total > 0.0 && total.is_finite() {
            row /= total;
        } else {
            row.fill(uniform);
            fallbacks += 1;
        }
    }
    fallbacks
}
