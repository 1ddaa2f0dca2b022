//! Inverted random walk favoring long jumps.

use ndarray::{Array2, ArrayView2};
use tracing::warn;

use super::random_walk::{gaussian_distance_weights, resolve_bandwidth};
use super::{normalize_rows, pairwise_sq_distances, TransitionError, TransitionModel};
use crate::state_space::StateSpace;

/// The mirror image of [`super::RandomWalkTransition`]: Gaussian distance
/// weights are negated and shifted by each row's minimum, so the most
/// distant states receive the most mass and the current state receives
/// none. Models fragmented trajectories that jump rather than diffuse.
#[derive(Debug, Clone)]
pub struct ReciprocalGaussianTransition {
    matrix: Array2<f64>,
    bandwidth: f64,
}

impl ReciprocalGaussianTransition {
    pub fn new(space: &StateSpace, bandwidth: Option<f64>) -> Result<Self, TransitionError> {
        let sq_distances = pairwise_sq_distances(space);
        let bandwidth = resolve_bandwidth(&sq_distances, bandwidth)?;

        let mut matrix = gaussian_distance_weights(&sq_distances, bandwidth);
        invert_rows(&mut matrix);
        let fallbacks = normalize_rows(&mut matrix);
        if fallbacks > 0 {
            warn!(
                rows = fallbacks,
                states = matrix.nrows(),
                "reciprocal gaussian rows had no mass after inversion; using uniform rows"
            );
        }

        Ok(Self { matrix, bandwidth })
    }

    /// The distance scale in use, explicit or inferred.
    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

/// Negate every weight and shift each row by its minimum, leaving all
/// entries non-negative with zeros where the weights peaked.
fn invert_rows(matrix: &mut Array2<f64>) {
    for mut row in matrix.rows_mut() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        // -w - min(-w) == max(w) - w
        row.mapv_inplace(|w| max - w);
    }
}

impl TransitionModel for ReciprocalGaussianTransition {
    fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn line_space(n: usize) -> StateSpace {
        StateSpace::new(&[0.0], &[(n - 1) as f64], &[n]).unwrap()
    }

    #[test]
    fn test_rows_normalize_with_zero_diagonal() {
        let model = ReciprocalGaussianTransition::new(&line_space(5), Some(1.0)).unwrap();
        let m = model.matrix();
        for i in 0..5 {
            assert_abs_diff_eq!(m.row(i).sum(), 1.0, epsilon = 1e-12);
            // Staying put had the peak weight, so it ends with none.
            assert_abs_diff_eq!(m[[i, i]], 0.0);
        }
    }

    #[test]
    fn test_mass_grows_with_distance() {
        let model = ReciprocalGaussianTransition::new(&line_space(5), Some(1.0)).unwrap();
        let m = model.matrix();
        assert!(m[[0, 4]] > m[[0, 2]]);
        assert!(m[[0, 2]] > m[[0, 1]]);
    }

    #[test]
    fn test_single_point_space_falls_back_to_uniform() {
        // One state: inversion leaves a zero row, which normalizes to
        // the uniform (here, certain) distribution instead of NaN.
        let space = StateSpace::new(&[0.0], &[1.0], &[1]).unwrap();
        let model = ReciprocalGaussianTransition::new(&space, Some(1.0)).unwrap();
        assert_abs_diff_eq!(model.matrix()[[0, 0]], 1.0);
    }

    #[test]
    fn test_mirrors_random_walk_ordering() {
        use super::super::RandomWalkTransition;
        let space = line_space(4);
        let walk = RandomWalkTransition::new(&space, Some(2.0)).unwrap();
        let jump = ReciprocalGaussianTransition::new(&space, Some(2.0)).unwrap();
        // Where the walk prefers near states, the jump prefers far ones.
        assert!(walk.matrix()[[0, 1]] > walk.matrix()[[0, 3]]);
        assert!(jump.matrix()[[0, 1]] < jump.matrix()[[0, 3]]);
    }
}
