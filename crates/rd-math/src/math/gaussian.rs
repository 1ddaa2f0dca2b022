//! Diagonal-covariance Gaussian kernel math.
//!
//! Every density in the decoder is built from axis-aligned Gaussians, so
//! only the diagonal forms are provided. Inputs are plain slices; the
//! engine crate adapts its ndarray views at the call sites.

/// Floor applied to per-dimension variances before division.
const MIN_VAR: f64 = 1e-12;

/// Squared Mahalanobis distance under a diagonal covariance.
///
/// `sum((x - mean)^2 / var)`. Slices must share a length; this is the hot
/// inner loop of both density estimators, so the caller checks dimensions
/// once up front rather than per sample.
pub fn mahalanobis_sq_diag(x: &[f64], mean: &[f64], var: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), mean.len());
    debug_assert_eq!(x.len(), var.len());
    let mut acc = 0.0;
    for d in 0..x.len() {
        let diff = x[d] - mean[d];
        acc += diff * diff / var[d].max(MIN_VAR);
    }
    acc
}

/// Unnormalized diagonal-Gaussian kernel value:
/// `exp(-0.5 * mahalanobis^2) / prod(sqrt(var))`.
///
/// The `(2*pi)^(-D/2)` constant is deliberately omitted; consumers
/// renormalize over a point set, so only relative mass matters.
pub fn gaussian_kernel_diag(x: &[f64], mean: &[f64], var: &[f64]) -> f64 {
    let mahal = mahalanobis_sq_diag(x, mean, var);
    let mut scale = 1.0;
    for &v in var {
        scale *= v.max(MIN_VAR).sqrt();
    }
    (-0.5 * mahal).exp() / scale
}

/// Log of [`gaussian_kernel_diag`], for accumulating products of many
/// kernels without underflow.
pub fn log_gaussian_kernel_diag(x: &[f64], mean: &[f64], var: &[f64]) -> f64 {
    let mahal = mahalanobis_sq_diag(x, mean, var);
    let mut log_scale = 0.0;
    for &v in var {
        log_scale += 0.5 * v.max(MIN_VAR).ln();
    }
    -0.5 * mahal - log_scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mahalanobis_at_mean_is_zero() {
        let x = [1.0, -2.0];
        assert_eq!(mahalanobis_sq_diag(&x, &x, &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn mahalanobis_scales_with_variance() {
        // One unit away in a unit-variance dimension: distance^2 = 1.
        let d1 = mahalanobis_sq_diag(&[1.0], &[0.0], &[1.0]);
        assert!((d1 - 1.0).abs() < 1e-12);
        // Same offset with variance 4 shrinks the distance by 4.
        let d2 = mahalanobis_sq_diag(&[1.0], &[0.0], &[4.0]);
        assert!((d2 - 0.25).abs() < 1e-12);
    }

    #[test]
    fn kernel_peak_is_inverse_bandwidth_product() {
        // At the mean the exponential is 1, leaving 1/prod(sqrt(var)).
        let v = gaussian_kernel_diag(&[0.0, 0.0], &[0.0, 0.0], &[4.0, 9.0]);
        assert!((v - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn log_kernel_matches_linear_kernel() {
        let x = [0.3, -1.2, 2.0];
        let mean = [0.0, -1.0, 1.5];
        let var = [1.0, 0.5, 2.0];
        let lin = gaussian_kernel_diag(&x, &mean, &var);
        let log = log_gaussian_kernel_diag(&x, &mean, &var);
        assert!((lin.ln() - log).abs() < 1e-12);
    }

    #[test]
    fn zero_variance_is_floored_not_infinite() {
        let v = gaussian_kernel_diag(&[0.0], &[0.0], &[0.0]);
        assert!(v.is_finite());
    }
}
