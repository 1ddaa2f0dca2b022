//! Numerically stable primitives for log-domain Bayesian math.

/// Largest argument handled by the exact running-sum path of `log_factorial`.
const FACTORIAL_EXACT_MAX: u64 = 64;

const LOG_2PI: f64 = 1.837_877_066_409_345_4; // ln(2*pi)

/// Stable log(sum(exp(values))).
///
/// Returns NEG_INFINITY for empty input or all -inf inputs.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + sum.ln()
}

/// Stable log(exp(a) + exp(b)).
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a == f64::INFINITY || b == f64::INFINITY {
        return f64::INFINITY;
    }
    let m = a.max(b);
    m + (-(a - b).abs()).exp().ln_1p()
}

/// Convert a slice of log-probabilities into normalized linear-domain
/// probabilities.
///
/// The result sums to 1. If every entry is -inf (zero total mass) the
/// result is uniform, which keeps downstream recursions well defined.
pub fn normalize_log_probs(log_probs: &[f64]) -> Vec<f64> {
    let n = log_probs.len();
    if n == 0 {
        return Vec::new();
    }
    let lse = log_sum_exp(log_probs);
    if lse == f64::NEG_INFINITY || lse.is_nan() {
        return vec![1.0 / n as f64; n];
    }
    log_probs.iter().map(|&lp| (lp - lse).exp()).collect()
}

/// log(n!) without overflow.
///
/// Exact running sum of ln(k) for small n, Stirling's series beyond that.
/// Only integer arguments ever occur in this crate (Poisson counts), so no
/// Gamma-function machinery is needed.
pub fn log_factorial(n: u64) -> f64 {
    if n < 2 {
        return 0.0;
    }
    if n <= FACTORIAL_EXACT_MAX {
        return (2..=n).map(|k| (k as f64).ln()).sum();
    }
    let x = n as f64;
    // Stirling: ln n! = n ln n - n + 0.5 ln(2*pi*n) + 1/(12n) - 1/(360n^3) + ...
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    x * x.ln() - x + 0.5 * (LOG_2PI + x.ln()) + inv * (1.0 / 12.0)
        - inv * inv2 * (1.0 / 360.0)
        + inv * inv2 * inv2 * (1.0 / 1260.0)
}

/// Replace non-finite values the way a tensor runtime's `nan_to_num` does:
/// NaN becomes 0, +inf becomes `f64::MAX`, -inf becomes `f64::MIN`.
pub fn nan_to_num(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else if x == f64::INFINITY {
        f64::MAX
    } else if x == f64::NEG_INFINITY {
        f64::MIN
    } else {
        x
    }
}
