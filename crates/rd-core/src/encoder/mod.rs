//! Observation encoders.
//!
//! An encoder learns, from paired covariates and spiking observations,
//! a per-channel intensity surface over the state space: the expected
//! event rate at each grid point, normalized by how much time was spent
//! there (occupancy). Decoding inverts these surfaces into likelihoods.
//!
//! Two encoders are provided: [`SortedUnitEncoder`] for spike counts from
//! already-sorted units, and [`ClusterlessEncoder`] for unsorted waveform
//! marks, which folds the mark features into a joint density per channel.

mod clusterless;
mod sorted_units;

pub use clusterless::ClusterlessEncoder;
pub use sorted_units::SortedUnitEncoder;

use ndarray::{Array1, Array2, ArrayView2};
use thiserror::Error;

use crate::config::ConfigError;
use crate::estimation::EstimatorError;

/// Errors from encoding and intensity evaluation.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("dimension mismatch for {field}: expected {expected}, got {got}")]
    DimensionMismatch {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("observation kind does not match this encoder: expected {expected}")]
    ObservationKind { expected: &'static str },

    #[error("non-finite covariate value in row {row}")]
    NonFiniteCovariate { row: usize },

    #[error("non-finite mark value in event {event} on channel {channel}")]
    NonFiniteMark { channel: usize, event: usize },

    #[error("event index {index} out of range for {bins} bins on channel {channel}")]
    EventIndexOutOfRange {
        channel: usize,
        index: usize,
        bins: usize,
    },

    #[error("clusterless encoding requires the kernel compression estimator")]
    UnsupportedEstimator,

    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Events on one channel, aligned to the rows (time bins) of the
/// covariate matrix passed alongside them. `samples[e]` is the row the
/// event fell in; `marks` holds one waveform feature vector per event.
#[derive(Debug, Clone)]
pub struct ChannelMarks {
    pub samples: Vec<usize>,
    pub marks: Array2<f64>,
}

impl ChannelMarks {
    /// A channel that saw no events.
    pub fn empty(mark_dims: usize) -> Self {
        Self {
            samples: Vec::new(),
            marks: Array2::zeros((0, mark_dims)),
        }
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when the channel saw no events.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Spiking observations over a block of time bins.
#[derive(Debug, Clone)]
pub enum Observations {
    /// Per-bin spike counts from sorted units, `[bins, units]`.
    Sorted { counts: Array2<u32> },

    /// Per-channel waveform marks from unsorted threshold crossings.
    Clusterless {
        /// Number of time bins the events are aligned to.
        bins: usize,
        /// One entry per recording channel.
        channels: Vec<ChannelMarks>,
    },
}

impl Observations {
    /// Number of time bins covered.
    pub fn bins(&self) -> usize {
        match self {
            Observations::Sorted { counts } => counts.nrows(),
            Observations::Clusterless { bins, .. } => *bins,
        }
    }
}

/// Learns per-channel intensity surfaces from covariates and spikes.
///
/// `fit` may be called repeatedly; each call folds more data into the
/// underlying estimators. `evaluate` returns the `[channels, states]`
/// log-intensity surfaces over the model's state space, recomputing them
/// only when new data has arrived since the last call. An encoder that
/// has seen no data reports fully negative-infinite surfaces, which
/// downstream likelihoods turn into uninformative (uniform) evidence.
pub trait Encoder: Send {
    /// Number of channels (sorted units or recording electrodes).
    fn channels(&self) -> usize;

    /// Fold a block of covariates and aligned observations into the
    /// estimators.
    fn fit(
        &mut self,
        covariates: ArrayView2<'_, f64>,
        observations: &Observations,
    ) -> Result<(), EncoderError>;

    /// Log-intensity surfaces over the state space grid, `[channels, states]`.
    fn evaluate(&mut self) -> Result<ArrayView2<'_, f64>, EncoderError>;

    /// Log-intensity surfaces at arbitrary query points, uncached.
    fn evaluate_at(&self, points: ArrayView2<'_, f64>) -> Result<Array2<f64>, EncoderError>;
}

/// Log of the occupancy-normalized intensity `rate * density / occupancy`.
///
/// Occupancy is clamped away from zero so the ratio is never 0/0; states
/// with zero estimated density come out as negative infinity, which the
/// Poisson likelihood treats as "no events expected here".
pub(crate) fn log_intensity_surface(
    rate: f64,
    density: &Array1<f64>,
    occupancy: &Array1<f64>,
) -> Array1<f64> {
    let mut out = Array1::zeros(density.len());
    for i in 0..density.len() {
        let pi = occupancy[i].max(f64::MIN_POSITIVE);
        out[i] = (rate * density[i] / pi).ln();
    }
    out
}

/// Covariate rows must be fully finite before they reach an estimator.
pub(crate) fn validate_covariates(
    covariates: ArrayView2<'_, f64>,
    dims: usize,
) -> Result<(), EncoderError> {
    if covariates.ncols() != dims {
        return Err(EncoderError::DimensionMismatch {
            field: "covariates",
            expected: dims,
            got: covariates.ncols(),
        });
    }
    for (row, values) in covariates.rows().into_iter().enumerate() {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EncoderError::NonFiniteCovariate { row });
        }
    }
    Ok(())
}
