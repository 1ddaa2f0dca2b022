//! Recursive Bayesian forward filter over the state space.

use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rd_math::nan_to_num;
use thiserror::Error;
use tracing::trace;

use crate::state_space::StateSpace;
use crate::transitions::TransitionModel;

/// Errors from forward filtering.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("transition matrix covers {transition} states but the space has {states}")]
    TransitionSizeMismatch { transition: usize, states: usize },

    #[error("likelihood rows cover {got} states, expected {expected}")]
    LikelihoodSizeMismatch { expected: usize, got: usize },
}

/// Forward filter tracking a single continuous trajectory.
///
/// Each step predicts by applying the transition matrix to the running
/// posterior, multiplies in the likelihood row, floors the result at
/// machine epsilon, and renormalizes. The floor keeps a degenerate
/// (all-zero) evidence row from collapsing the posterior to NaN; such a
/// step simply relaxes toward uniform and recovery is immediate.
///
/// The posterior is seeded lazily: the first `decode` call after
/// construction or [`reset`](Self::reset) treats the uniform initial
/// state as the prediction for its first row.
pub struct StateSpaceDecoder {
    space: Arc<StateSpace>,
    transition: Box<dyn TransitionModel>,
    initial: Array1<f64>,
    posterior: Option<Array1<f64>>,
}

impl StateSpaceDecoder {
    pub fn new(
        space: Arc<StateSpace>,
        transition: Box<dyn TransitionModel>,
    ) -> Result<Self, DecodeError> {
        if transition.len() != space.len() {
            return Err(DecodeError::TransitionSizeMismatch {
                transition: transition.len(),
                states: space.len(),
            });
        }
        let n = space.len();
        Ok(Self {
            space,
            transition,
            initial: Array1::from_elem(n, 1.0 / n as f64),
            posterior: None,
        })
    }

    /// The grid the posterior is defined over. Flat posterior rows can be
    /// reshaped with [`StateSpace::to_grid`].
    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    /// Posterior carried over from the last decoded bin, if any.
    pub fn posterior(&self) -> Option<ArrayView1<'_, f64>> {
        self.posterior.as_ref().map(|p| p.view())
    }

    /// Forget the carried posterior; the next decode seeds fresh.
    pub fn reset(&mut self) {
        self.posterior = None;
    }

    /// Filter a block of likelihood rows, returning one posterior row per
    /// bin. Splitting a block across calls yields identical output, so
    /// streaming and batch decoding agree.
    pub fn decode(
        &mut self,
        likelihoods: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, DecodeError> {
        let n = self.space.len();
        if likelihoods.ncols() != n {
            return Err(DecodeError::LikelihoodSizeMismatch {
                expected: n,
                got: likelihoods.ncols(),
            });
        }

        let bins = likelihoods.nrows();
        let transition = self.transition.matrix();
        let mut out = Array2::zeros((bins, n));

        for (t, likelihood) in likelihoods.rows().into_iter().enumerate() {
            let predicted = match &self.posterior {
                Some(previous) => transition.dot(previous),
                None => self.initial.clone(),
            };

            let mut updated = &predicted * &likelihood;
            updated.mapv_inplace(|v| nan_to_num(v).max(f64::EPSILON));
            let total = updated.sum();
            updated /= total;

            out.row_mut(t).assign(&updated);
            self.posterior = Some(updated);
        }

        trace!(bins, states = n, "decoded likelihood block");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transitions::{
        RandomWalkTransition, StationaryTransition, UniformTransition,
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, Array2};

    fn space(n: usize) -> Arc<StateSpace> {
        Arc::new(StateSpace::new(&[0.0], &[10.0], &[n]).unwrap())
    }

    fn uniform_decoder(n: usize) -> StateSpaceDecoder {
        let space = space(n);
        let transition = Box::new(UniformTransition::new(&space));
        StateSpaceDecoder::new(space, transition).unwrap()
    }

    fn argmax(row: ndarray::ArrayView1<'_, f64>) -> usize {
        row.iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_posterior_tracks_moving_likelihood_peak() {
        let mut decoder = uniform_decoder(5);
        // Peak moves across the grid one state per bin.
        let mut likelihoods = Array2::from_elem((5, 5), 0.1);
        for t in 0..5 {
            likelihoods[[t, t]] = 1.0;
        }
        let posteriors = decoder.decode(likelihoods.view()).unwrap();
        for t in 0..5 {
            assert_eq!(argmax(posteriors.row(t)), t);
            assert_abs_diff_eq!(posteriors.row(t).sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_stationary_transition_freezes_posterior() {
        let s = space(4);
        let transition = Box::new(StationaryTransition::new(&s));
        let mut decoder = StateSpaceDecoder::new(s, transition).unwrap();

        // Informative first bin, uninformative afterwards.
        let mut likelihoods = Array2::ones((6, 4));
        likelihoods[[0, 0]] = 0.1;
        likelihoods[[0, 1]] = 5.0;
        likelihoods[[0, 2]] = 0.1;
        likelihoods[[0, 3]] = 0.1;

        let posteriors = decoder.decode(likelihoods.view()).unwrap();
        for t in 1..6 {
            for i in 0..4 {
                assert_abs_diff_eq!(
                    posteriors[[t, i]],
                    posteriors[[0, i]],
                    epsilon = 1e-9
                );
            }
        }
    }

    #[test]
    fn test_all_zero_likelihood_relaxes_to_uniform_and_recovers() {
        let mut decoder = uniform_decoder(4);
        let likelihoods = arr2(&[
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ]);
        let posteriors = decoder.decode(likelihoods.view()).unwrap();

        for t in 0..3 {
            assert_abs_diff_eq!(posteriors.row(t).sum(), 1.0, epsilon = 1e-9);
            assert!(posteriors.row(t).iter().all(|v| v.is_finite() && *v >= 0.0));
        }
        // Zero evidence washes out to uniform.
        for i in 0..4 {
            assert_abs_diff_eq!(posteriors[[1, i]], 0.25, epsilon = 1e-9);
        }
        // And the next informative bin takes hold again.
        assert_eq!(argmax(posteriors.row(2)), 2);
    }

    #[test]
    fn test_streaming_matches_batch_decoding() {
        let likelihoods = arr2(&[
            [1.0, 0.2, 0.1, 0.1],
            [0.2, 1.0, 0.3, 0.1],
            [0.1, 0.3, 1.0, 0.2],
        ]);

        let mut batch = uniform_decoder(4);
        let expected = batch.decode(likelihoods.view()).unwrap();

        let mut streaming = uniform_decoder(4);
        for t in 0..3 {
            let row = streaming
                .decode(likelihoods.slice(ndarray::s![t..t + 1, ..]))
                .unwrap();
            for i in 0..4 {
                assert_abs_diff_eq!(row[[0, i]], expected[[t, i]], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_reset_reseeds_the_posterior() {
        let mut decoder = uniform_decoder(3);
        let likelihoods = arr2(&[[1.0, 0.5, 0.1], [0.1, 1.0, 0.5]]);

        let first = decoder.decode(likelihoods.view()).unwrap();
        assert!(decoder.posterior().is_some());

        decoder.reset();
        assert!(decoder.posterior().is_none());

        let second = decoder.decode(likelihoods.view()).unwrap();
        for (a, b) in first.iter().zip(second.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_random_walk_diffuses_a_peak() {
        let s = space(5);
        let transition = Box::new(RandomWalkTransition::new(&s, Some(1.0)).unwrap());
        let mut decoder = StateSpaceDecoder::new(s, transition).unwrap();

        // Pin the posterior to state 0, then observe nothing informative.
        let mut likelihoods = Array2::ones((4, 5));
        likelihoods
            .row_mut(0)
            .assign(&ndarray::arr1(&[1.0, 1e-6, 1e-6, 1e-6, 1e-6]));

        let posteriors = decoder.decode(likelihoods.view()).unwrap();
        // Mass at the pinned state decays as the walk spreads it out.
        assert!(posteriors[[1, 0]] < posteriors[[0, 0]]);
        assert!(posteriors[[2, 0]] < posteriors[[1, 0]]);
        assert!(posteriors[[3, 0]] < posteriors[[2, 0]]);
    }

    #[test]
    fn test_mismatched_likelihood_width_is_rejected() {
        let mut decoder = uniform_decoder(4);
        let likelihoods = Array2::ones((2, 3));
        assert!(matches!(
            decoder.decode(likelihoods.view()),
            Err(DecodeError::LikelihoodSizeMismatch { .. })
        ));
    }

    #[test]
    fn test_transition_size_must_match_space() {
        let s = space(4);
        let other = space(5);
        let transition = Box::new(UniformTransition::new(&other));
        assert!(matches!(
            StateSpaceDecoder::new(s, transition),
            Err(DecodeError::TransitionSizeMismatch { .. })
        ));
    }
}
