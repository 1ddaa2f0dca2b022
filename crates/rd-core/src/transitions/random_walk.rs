//! Distance-penalized random walk transitions.

use ndarray::{Array2, ArrayView2};

use super::{
    mean_pairwise_distance, normalize_rows, pairwise_sq_distances, TransitionError,
    TransitionModel,
};
use crate::state_space::StateSpace;

/// Gaussian fall-off with distance: nearby states receive most of the
/// mass, so the posterior diffuses locally step to step.
#[derive(Debug, Clone)]
pub struct RandomWalkTransition {
    matrix: Array2<f64>,
    bandwidth: f64,
}

impl RandomWalkTransition {
    /// Build the walk over `space`. Without an explicit `bandwidth` the
    /// distance scale is inferred as half the mean pairwise distance,
    /// which requires at least two distinct grid points.
    pub fn new(space: &StateSpace, bandwidth: Option<f64>) -> Result<Self, TransitionError> {
        let sq_distances = pairwise_sq_distances(space);
        let bandwidth = resolve_bandwidth(&sq_distances, bandwidth)?;

        let mut matrix = gaussian_distance_weights(&sq_distances, bandwidth);
        // Diagonal weight is always 1, so no row can be empty.
        let fallbacks = normalize_rows(&mut matrix);
        debug_assert_eq!(fallbacks, 0);

        Ok(Self { matrix, bandwidth })
    }

    /// The distance scale in use, explicit or inferred.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

impl TransitionModel for RandomWalkTransition {
    fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

/// Raw Gaussian weights `exp(-0.5 * d^2 / bandwidth)` before any row
/// normalization. Shared with the reciprocal variant, which inverts
/// these weights rather than recomputing them.
pub(super) fn gaussian_distance_weights(
    sq_distances: &Array2<f64>,
    bandwidth: f64,
) -> Array2<f64> {
    sq_distances.mapv(|d2| (-0.5 * d2 / bandwidth).exp())
}

/// Validate an explicit bandwidth or infer one from the distance table.
pub(super) fn resolve_bandwidth(
    sq_distances: &Array2<f64>,
    bandwidth: Option<f64>,
) -> Result<f64, TransitionError> {
    match bandwidth {
        Some(b) if b.is_finite() && b > 0.0 => Ok(b),
        Some(b) => Err(TransitionError::InvalidBandwidth(b)),
        None => {
            let inferred = mean_pairwise_distance(sq_distances) / 2.0;
            if inferred > 0.0 && inferred.is_finite() {
                Ok(inferred)
            } else {
                Err(TransitionError::DegenerateStateSpace)
            }
        }
    }
}
