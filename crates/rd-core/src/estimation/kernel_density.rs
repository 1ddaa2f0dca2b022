//! Exact Gaussian kernel density estimation.

use ndarray::{Array1, ArrayView2};
use rd_math::{mahalanobis_sq_diag, nan_to_num};

use super::{DensityEstimator, EstimatorError};

/// Exact kernel density estimator with a diagonal Gaussian kernel.
///
/// Every fitted sample is retained, so evaluation cost grows linearly
/// with the number of samples. Use [`super::KernelCompression`] when the
/// sample stream is unbounded.
#[derive(Debug, Clone)]
pub struct KernelDensity {
    bandwidth: Vec<f64>,
    /// Squared bandwidth, the diagonal of the kernel covariance.
    variance: Vec<f64>,
    /// Product of bandwidths, the kernel volume normalizer.
    volume: f64,
    /// Retained samples, flattened row-major.
    samples: Vec<f64>,
}

impl KernelDensity {
    /// Create an estimator with the given per-dimension bandwidth.
    pub fn new(bandwidth: &[f64]) -> Result<Self, EstimatorError> {
        validate_bandwidth(bandwidth)?;
        Ok(Self {
            bandwidth: bandwidth.to_vec(),
            variance: bandwidth.iter().map(|b| b * b).collect(),
            volume: bandwidth.iter().product(),
            samples: Vec::new(),
        })
    }

    /// Per-dimension kernel bandwidth.
    pub fn bandwidth(&self) -> &[f64] {
        &self.bandwidth
    }

    /// Drop all retained samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Bandwidths must be finite and strictly positive in every dimension.
pub(super) fn validate_bandwidth(bandwidth: &[f64]) -> Result<(), EstimatorError> {
    if bandwidth.is_empty() {
        return Err(EstimatorError::InvalidBandwidth(
            "at least one dimension is required".to_string(),
        ));
    }
    for (d, b) in bandwidth.iter().enumerate() {
        if !b.is_finite() || *b <= 0.0 {
            return Err(EstimatorError::InvalidBandwidth(format!(
                "must be finite and > 0, got {} in dimension {}",
                b, d
            )));
        }
    }
    Ok(())
}

impl DensityEstimator for KernelDensity {
    fn dims(&self) -> usize {
        self.bandwidth.len()
    }

    fn fit(&mut self, data: ArrayView2<'_, f64>) -> Result<(), EstimatorError> {
        if data.ncols() != self.dims() {
            return Err(EstimatorError::DimensionMismatch {
                expected: self.dims(),
                got: data.ncols(),
            });
        }
        self.samples.reserve(data.nrows() * self.dims());
        for row in data.rows() {
            self.samples.extend(row.iter());
        }
        Ok(())
    }

    fn evaluate(&self, points: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        let dims = self.dims();
        if points.ncols() != dims {
            return Err(EstimatorError::DimensionMismatch {
                expected: dims,
                got: points.ncols(),
            });
        }
        let mut out = Array1::zeros(points.nrows());
        let count = self.len();
        if count == 0 {
            return Ok(out);
        }

        let scale = 1.0 / (count as f64 * self.volume);
        let mut query = vec![0.0; dims];
        for (i, row) in points.rows().into_iter().enumerate() {
            for (q, v) in query.iter_mut().zip(row.iter()) {
                *q = *v;
            }
            let mut acc = 0.0;
            for sample in self.samples.chunks_exact(dims) {
                acc += (-0.5 * mahalanobis_sq_diag(&query, sample, &self.variance)).exp();
            }
            out[i] = nan_to_num(acc * scale);
        }

        let total = out.sum();
        if total > 0.0 {
            out /= total;
        }
        Ok(out)
    }

    fn len(&self) -> usize {
        self.samples.len() / self.dims()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_rejects_invalid_bandwidth() {
        assert!(KernelDensity::new(&[]).is_err());
        assert!(KernelDensity::new(&[0.0]).is_err());
        assert!(KernelDensity::new(&[-1.0]).is_err());
        assert!(KernelDensity::new(&[f64::NAN]).is_err());
    }

    #[test]
    fn test_empty_estimator_evaluates_to_zeros() {
        let est = KernelDensity::new(&[1.0]).unwrap();
        let out = est.evaluate(arr2(&[[0.0], [1.0]]).view()).unwrap();
        assert_eq!(out.len(), 2);
        assert_abs_diff_eq!(out[0], 0.0);
        assert_abs_diff_eq!(out[1], 0.0);
    }

    #[test]
    fn test_single_sample_single_query_normalizes_to_one() {
        let mut est = KernelDensity::new(&[1.0]).unwrap();
        est.fit(arr2(&[[5.0]]).view()).unwrap();
        let out = est.evaluate(arr2(&[[5.0]]).view()).unwrap();
        assert_abs_diff_eq!(out[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_density_peaks_at_sample_and_sums_to_one() {
        let mut est = KernelDensity::new(&[1.0]).unwrap();
        est.fit(arr2(&[[0.0]]).view()).unwrap();

        let grid = arr2(&[[-2.0], [-1.0], [0.0], [1.0], [2.0]]);
        let out = est.evaluate(grid.view()).unwrap();

        assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 2);
        // Symmetric grid around the sample gives symmetric densities.
        assert_abs_diff_eq!(out[0], out[4], epsilon = 1e-12);
        assert_abs_diff_eq!(out[1], out[3], epsilon = 1e-12);
    }

    #[test]
    fn test_incremental_fit_matches_batch_fit() {
        let grid = arr2(&[[-1.0], [0.0], [1.0], [2.0], [3.0]]);

        let mut batch = KernelDensity::new(&[0.8]).unwrap();
        batch
            .fit(arr2(&[[0.0], [1.0], [2.0], [2.5]]).view())
            .unwrap();

        let mut incremental = KernelDensity::new(&[0.8]).unwrap();
        incremental.fit(arr2(&[[0.0], [1.0]]).view()).unwrap();
        incremental.fit(arr2(&[[2.0], [2.5]]).view()).unwrap();

        let a = batch.evaluate(grid.view()).unwrap();
        let b = incremental.evaluate(grid.view()).unwrap();
        for i in 0..a.len() {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut est = KernelDensity::new(&[1.0, 1.0]).unwrap();
        assert!(est.fit(arr2(&[[0.0]]).view()).is_err());
        est.fit(arr2(&[[0.0, 0.0]]).view()).unwrap();
        assert!(est.evaluate(arr2(&[[0.0]]).view()).is_err());
    }

    #[test]
    fn test_distant_queries_underflow_to_zero_without_nan() {
        let mut est = KernelDensity::new(&[1e-3]).unwrap();
        est.fit(arr2(&[[0.0]]).view()).unwrap();
        let out = est.evaluate(arr2(&[[1e6], [2e6]]).view()).unwrap();
        for v in out.iter() {
            assert!(v.is_finite());
            assert_abs_diff_eq!(*v, 0.0);
        }
    }

    #[test]
    fn test_two_dimensional_density() {
        let mut est = KernelDensity::new(&[0.5, 0.5]).unwrap();
        est.fit(arr2(&[[0.0, 0.0], [1.0, 1.0]]).view()).unwrap();
        let out = est
            .evaluate(arr2(&[[0.0, 0.0], [0.5, 0.5], [1.0, 1.0]]).view())
            .unwrap();
        assert_abs_diff_eq!(out.sum(), 1.0, epsilon = 1e-12);
        // Narrow kernels keep the modes above the saddle between them.
        assert!(out[1] < out[0]);
        assert_abs_diff_eq!(out[0], out[2], epsilon = 1e-12);
    }

    #[test]
    fn test_clear_resets_to_empty() {
        let mut est = KernelDensity::new(&[1.0]).unwrap();
        est.fit(arr2(&[[0.0], [1.0]]).view()).unwrap();
        assert_eq!(est.len(), 2);
        est.clear();
        assert!(est.is_empty());
        let out = est.evaluate(arr2(&[[0.0]]).view()).unwrap();
        assert_abs_diff_eq!(out[0], 0.0);
    }
}
