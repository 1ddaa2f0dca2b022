//! Hybrid discrete-continuous forward filter.
//!
//! Classifies each time bin into one of three trajectory regimes while
//! simultaneously tracking the continuous latent state. The joint
//! posterior lives over (regime, state); marginalizing out the state
//! gives per-bin regime probabilities, marginalizing out the regime
//! recovers the spatial posterior a plain decoder would produce.
//!
//! Regime switching follows a sticky discrete chain (stay probability on
//! the diagonal, the remainder spread evenly), and movement within each
//! switch is governed by the destination regime: arriving in the
//! stationary regime pins the state, the continuous regime diffuses it
//! as a random walk, and the fragmented regime teleports it uniformly.

use std::fmt;
use std::sync::Arc;

use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use rd_math::nan_to_num;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::ConfigError;
use crate::state_space::StateSpace;
use crate::transitions::{
    RandomWalkTransition, StationaryTransition, TransitionError, TransitionModel,
    UniformTransition,
};

/// Trajectory regimes the classifier distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    /// The trajectory holds still.
    Stationary,
    /// The trajectory moves smoothly through neighboring states.
    Continuous,
    /// The trajectory jumps between distant states.
    Fragmented,
}

impl Regime {
    /// Number of regimes in the hybrid model.
    pub const COUNT: usize = 3;

    /// All regimes in index order.
    pub const ALL: [Regime; Regime::COUNT] =
        [Regime::Stationary, Regime::Continuous, Regime::Fragmented];

    /// Index of this regime for matrix addressing.
    pub fn index(&self) -> usize {
        match self {
            Regime::Stationary => 0,
            Regime::Continuous => 1,
            Regime::Fragmented => 2,
        }
    }

    /// Regime for a matrix index, if in range.
    pub fn from_index(index: usize) -> Option<Regime> {
        Regime::ALL.get(index).copied()
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Regime::Stationary => "stationary",
            Regime::Continuous => "continuous",
            Regime::Fragmented => "fragmented",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors from the hybrid filter.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("likelihood rows cover {got} states, expected {expected}")]
    LikelihoodSizeMismatch { expected: usize, got: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Configuration for the hybrid filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Probability of staying in the current regime each bin. The
    /// remainder is split evenly across the other regimes.
    #[serde(default = "default_stay_probability")]
    pub stay_probability: f64,

    /// Distance scale for the continuous regime's random walk. When
    /// absent, inferred from the state space as half the mean pairwise
    /// distance.
    #[serde(default)]
    pub random_walk_bandwidth: Option<f64>,
}

fn default_stay_probability() -> f64 {
    0.98
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            stay_probability: default_stay_probability(),
            random_walk_bandwidth: None,
        }
    }
}

impl ClassifierConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.stay_probability.is_finite()
            || self.stay_probability <= 0.0
            || self.stay_probability >= 1.0
        {
            return Err(ConfigError::InvalidValue {
                field: "classifier.stay_probability",
                message: format!("must be in (0, 1), got {}", self.stay_probability),
            });
        }
        if let Some(b) = self.random_walk_bandwidth {
            if !b.is_finite() || b <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    field: "classifier.random_walk_bandwidth",
                    message: format!("must be finite and > 0, got {}", b),
                });
            }
        }
        Ok(())
    }
}

/// Hybrid forward filter over (regime, state).
///
/// Each step forms the predicted joint mass
/// `predicted[r', i] = sum_r D[r, r'] * sum_j C[r, r'][i, j] * posterior[r, j]`
/// with discrete chain `D` and per-pair continuous matrices `C`, then
/// multiplies in the shared likelihood row and renormalizes over the
/// full joint.
///
/// If the predicted mass sums to exactly zero (which happens one step
/// after a fully degenerate evidence row zeroed the posterior), the
/// uniform initial state is substituted before the likelihood is
/// applied, so the filter re-locks onto the evidence instead of
/// dividing by zero.
pub struct HybridStateSpaceClassifier {
    space: Arc<StateSpace>,
    /// Regime chain, `[from, to]`, rows summing to 1.
    discrete: Array2<f64>,
    /// Continuous movement per (from, to) regime pair, indexed
    /// `from * COUNT + to`. Shared: the movement depends only on the
    /// destination regime.
    continuous: Vec<Arc<Array2<f64>>>,
    /// Uniform joint initial state, `[regimes, states]`.
    initial: Array2<f64>,
    posterior: Option<Array2<f64>>,
}

impl HybridStateSpaceClassifier {
    pub fn new(
        space: Arc<StateSpace>,
        config: &ClassifierConfig,
    ) -> Result<Self, ClassifierError> {
        config.validate()?;
        let r = Regime::COUNT;
        let n = space.len();

        let stay = config.stay_probability;
        let switch = (1.0 - stay) / (r - 1) as f64;
        let mut discrete = Array2::from_elem((r, r), switch);
        for i in 0..r {
            discrete[[i, i]] = stay;
        }

        let pinned: Arc<Array2<f64>> =
            Arc::new(StationaryTransition::new(&space).matrix().to_owned());
        let walking: Arc<Array2<f64>> = Arc::new(
            RandomWalkTransition::new(&space, config.random_walk_bandwidth)?
                .matrix()
                .to_owned(),
        );
        let jumping: Arc<Array2<f64>> =
            Arc::new(UniformTransition::new(&space).matrix().to_owned());
        let by_destination = [pinned, walking, jumping];
        let continuous = (0..r * r)
            .map(|index| by_destination[index % r].clone())
            .collect();

        Ok(Self {
            space,
            discrete,
            continuous,
            initial: Array2::from_elem((r, n), 1.0 / (r * n) as f64),
            posterior: None,
        })
    }

    /// The grid the state axis is defined over.
    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    /// Regime chain in use, `[from, to]`.
    pub fn discrete_transitions(&self) -> &Array2<f64> {
        &self.discrete
    }

    /// Joint posterior carried from the last decoded bin, if any.
    pub fn posterior(&self) -> Option<&Array2<f64>> {
        self.posterior.as_ref()
    }

    /// Forget the carried posterior; the next decode seeds fresh.
    pub fn reset(&mut self) {
        self.posterior = None;
    }

    /// Joint prediction step across both the regime chain and the
    /// per-pair continuous movement.
    fn predict(&self, previous: &Array2<f64>) -> Array2<f64> {
        let r = Regime::COUNT;
        let n = self.space.len();
        let mut predicted = Array2::zeros((r, n));
        for to in 0..r {
            let mut acc = Array1::zeros(n);
            for from in 0..r {
                let moved = self.continuous[from * r + to].dot(&previous.row(from));
                acc.scaled_add(self.discrete[[from, to]], &moved);
            }
            predicted.row_mut(to).assign(&acc);
        }
        predicted
    }

    /// Filter a block of likelihood rows, returning the joint posterior
    /// per bin. Splitting a block across calls yields identical output.
    pub fn decode(
        &mut self,
        likelihoods: ArrayView2<'_, f64>,
    ) -> Result<ClassifiedPosterior, ClassifierError> {
        let n = self.space.len();
        if likelihoods.ncols() != n {
            return Err(ClassifierError::LikelihoodSizeMismatch {
                expected: n,
                got: likelihoods.ncols(),
            });
        }

        let r = Regime::COUNT;
        let bins = likelihoods.nrows();
        let mut joint = Array3::zeros((bins, r, n));
        let mut fallbacks = 0usize;

        for (t, likelihood) in likelihoods.rows().into_iter().enumerate() {
            let mut predicted = match &self.posterior {
                Some(previous) => self.predict(previous),
                None => self.initial.clone(),
            };
            if predicted.sum() == 0.0 {
                fallbacks += 1;
                predicted = self.initial.clone();
            }

            let mut updated = predicted;
            for mut row in updated.rows_mut() {
                row *= &likelihood;
            }
            updated.mapv_inplace(nan_to_num);
            let total = updated.sum();
            if total > 0.0 && total.is_finite() {
                updated /= total;
            } else {
                // Fully degenerate evidence: leave this bin empty and let
                // the fallback reseed the next one.
                updated.fill(0.0);
            }

            joint.slice_mut(s![t, .., ..]).assign(&updated);
            self.posterior = Some(updated);
        }

        if fallbacks > 0 {
            warn!(
                fallbacks,
                bins, "prediction mass vanished; reseeded from the initial state"
            );
        }
        trace!(bins, states = n, "classified likelihood block");
        Ok(ClassifiedPosterior { joint })
    }
}

/// Joint posterior over (regime, state) for a decoded block.
#[derive(Debug, Clone)]
pub struct ClassifiedPosterior {
    joint: Array3<f64>,
}

impl ClassifiedPosterior {
    /// Full joint posterior, `[bins, regimes, states]`.
    pub fn joint(&self) -> &Array3<f64> {
        &self.joint
    }

    /// Number of decoded bins.
    pub fn bins(&self) -> usize {
        self.joint.shape()[0]
    }

    /// Regime marginal per bin, `[bins, regimes]`.
    pub fn regime_probabilities(&self) -> Array2<f64> {
        self.joint.sum_axis(Axis(2))
    }

    /// State marginal per bin, `[bins, states]`.
    pub fn state_posteriors(&self) -> Array2<f64> {
        self.joint.sum_axis(Axis(1))
    }

    /// Most probable regime per bin.
    pub fn map_regimes(&self) -> Vec<Regime> {
        self.regime_probabilities()
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = Regime::Stationary;
                let mut best_mass = f64::NEG_INFINITY;
                for (regime, &mass) in Regime::ALL.iter().zip(row.iter()) {
                    if mass > best_mass {
                        best_mass = mass;
                        best = *regime;
                    }
                }
                best
            })
            .collect()
    }
}
