//! Stationary transitions: the identity matrix.

use ndarray::{Array2, ArrayView2};

use super::TransitionModel;
use crate::state_space::StateSpace;

/// States never move; the filter's prediction step passes the posterior
/// through unchanged.
#[derive(Debug, Clone)]
pub struct StationaryTransition {
    matrix: Array2<f64>,
}

impl StationaryTransition {
    pub fn new(space: &StateSpace) -> Self {
        Self {
            matrix: Array2::eye(space.len()),
        }
    }
}

impl TransitionModel for StationaryTransition {
    fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_identity_preserves_any_distribution() {
        let space = StateSpace::new(&[0.0], &[1.0], &[4]).unwrap();
        let model = StationaryTransition::new(&space);
        let p = ndarray::arr1(&[0.1, 0.2, 0.3, 0.4]);
        let q = model.matrix().dot(&p);
        for i in 0..4 {
            assert_abs_diff_eq!(q[i], p[i], epsilon = 1e-12);
        }
    }
}
