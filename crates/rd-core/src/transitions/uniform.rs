//! Uniform transitions: every state is equally reachable.

use ndarray::{Array2, ArrayView2};

use super::TransitionModel;
use crate::state_space::StateSpace;

/// Equal probability of moving to any state, ignoring distance.
#[derive(Debug, Clone)]
pub struct UniformTransition {
    matrix: Array2<f64>,
}

impl UniformTransition {
    pub fn new(space: &StateSpace) -> Self {
        let n = space.len();
        Self {
            matrix: Array2::from_elem((n, n), 1.0 / n as f64),
        }
    }
}

impl TransitionModel for UniformTransition {
    fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_all_entries_equal_and_rows_normalized() {
        let space = StateSpace::new(&[0.0], &[1.0], &[4]).unwrap();
        let model = UniformTransition::new(&space);
        let m = model.matrix();
        for i in 0..4 {
            assert_abs_diff_eq!(m.row(i).sum(), 1.0, epsilon = 1e-12);
            for j in 0..4 {
                assert_abs_diff_eq!(m[[i, j]], 0.25);
            }
        }
    }

    #[test]
    fn test_uniform_transition_erases_history() {
        // matrix . p is the same distribution for any probability vector p.
        let space = StateSpace::new(&[0.0], &[1.0], &[3]).unwrap();
        let model = UniformTransition::new(&space);
        let peaked = ndarray::arr1(&[1.0, 0.0, 0.0]);
        let spread = model.matrix().dot(&peaked);
        for v in spread.iter() {
            assert_abs_diff_eq!(*v, 1.0 / 3.0, epsilon = 1e-12);
        }
    }
}
