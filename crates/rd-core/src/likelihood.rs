//! Observation likelihoods over the state space.
//!
//! The filters consume one linear-domain likelihood row per time bin.
//! Those rows are produced here from log-domain evidence: a Poisson
//! point-process term for sorted counts, or the clusterless encoder's
//! mark-conditioned rows, both converted with a per-row max shift so a
//! confident bin never underflows to all zeros.

use ndarray::{Array2, ArrayView2};
use rd_math::{log_factorial, nan_to_num};
use thiserror::Error;

/// Errors from likelihood assembly.
#[derive(Debug, Error)]
pub enum LikelihoodError {
    #[error("channel mismatch: {counts} count columns vs {surfaces} intensity surfaces")]
    ChannelMismatch { counts: usize, surfaces: usize },
}

/// Per-bin Poisson log likelihood from sorted spike counts, `[bins, states]`.
///
/// For counts `k` and intensity `lambda_c(x)` per channel:
/// `sum_c k * ln(lambda_c(x)) - lambda_c(x) - ln(k!)`, with the count
/// term skipped when `k` is zero so silent channels with zero intensity
/// contribute nothing instead of NaN.
pub fn poisson_log_likelihood(
    counts: ArrayView2<'_, u32>,
    log_intensities: ArrayView2<'_, f64>,
) -> Result<Array2<f64>, LikelihoodError> {
    let channels = counts.ncols();
    if channels != log_intensities.nrows() {
        return Err(LikelihoodError::ChannelMismatch {
            counts: channels,
            surfaces: log_intensities.nrows(),
        });
    }
    let bins = counts.nrows();
    let states = log_intensities.ncols();

    let mut out = Array2::zeros((bins, states));
    for t in 0..bins {
        for i in 0..states {
            let mut acc = 0.0;
            for c in 0..channels {
                let log_lambda = log_intensities[[c, i]];
                let k = counts[[t, c]];
                if k > 0 {
                    acc += f64::from(k) * log_lambda - log_factorial(u64::from(k));
                }
                acc -= log_lambda.exp();
            }
            out[[t, i]] = acc;
        }
    }
    Ok(out)
}

/// Convert log-likelihood rows to linear likelihoods with a per-row max
/// shift. The shift cancels in the filter's renormalization, so only the
/// relative mass within a row matters; without it long log rows underflow
/// to zero across the board.
///
/// Rows whose maximum is not finite carry no usable evidence and come
/// back as all zeros; the filters' degeneracy handling absorbs them.
/// NaN entries also collapse to zero.
pub fn likelihoods_from_log(log_likelihood: ArrayView2<'_, f64>) -> Array2<f64> {
    let mut out = Array2::zeros(log_likelihood.raw_dim());
    for (t, row) in log_likelihood.rows().into_iter().enumerate() {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max.is_finite() {
            continue;
        }
        for (i, &l) in row.iter().enumerate() {
            out[[t, i]] = nan_to_num((l - max).exp());
        }
    }
    out
}
