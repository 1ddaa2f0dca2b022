//! Memory-bounded kernel density via moment-matched merging.

use ndarray::{Array1, Array2, ArrayView2};
use rd_math::{gaussian_kernel_diag, mahalanobis_sq_diag, nan_to_num};
use tracing::debug;

use super::kernel_density::validate_bandwidth;
use super::{DensityEstimator, EstimatorError};

/// One weighted Gaussian component of the compressed estimate.
#[derive(Debug, Clone)]
struct Kernel {
    /// Number of samples absorbed into this component.
    weight: f64,
    mean: Vec<f64>,
    /// Diagonal covariance. Starts at bandwidth^2 and widens as samples
    /// are merged in.
    variance: Vec<f64>,
}

impl Kernel {
    fn seed(sample: &[f64], seed_variance: &[f64]) -> Self {
        Self {
            weight: 1.0,
            mean: sample.to_vec(),
            variance: seed_variance.to_vec(),
        }
    }

    /// Absorb a unit-weight sample, matching the population moments of
    /// the combined pair: the merged mean is the weighted mean, and the
    /// merged variance preserves E[x^2] of both parts.
    fn merge(&mut self, sample: &[f64], sample_variance: &[f64]) {
        let w1 = self.weight;
        let w2 = 1.0;
        let w = w1 + w2;
        for d in 0..self.mean.len() {
            let m1 = self.mean[d];
            let m2 = sample[d];
            let v1 = self.variance[d];
            let v2 = sample_variance[d];
            let mean = (m1 * w1 + m2 * w2) / w;
            let var = ((v1 + m1 * m1) * w1 + (v2 + m2 * m2) * w2) / w - mean * mean;
            self.mean[d] = mean;
            // Catastrophic cancellation can drive this a hair below zero.
            self.variance[d] = var.max(0.0);
        }
        self.weight = w;
    }
}

/// Compressed kernel density estimator.
///
/// Instead of retaining every sample, nearby samples are merged into
/// weighted Gaussian kernels. A sample opens a new kernel only when its
/// Mahalanobis distance to every existing kernel exceeds
/// `distance_threshold` and the kernel count is under `kernel_limit`;
/// otherwise it merges into the closest kernel. The defaults (threshold
/// negative infinity, no limit) retain every sample and reproduce the
/// exact estimator.
///
/// Kernel weights record how many samples each component absorbed. They
/// steer the merge arithmetic but do not enter evaluation, which averages
/// plainly across kernels.
#[derive(Debug, Clone)]
pub struct KernelCompression {
    bandwidth: Vec<f64>,
    /// Bandwidth squared, the variance each new kernel starts from.
    seed_variance: Vec<f64>,
    distance_threshold: f64,
    kernel_limit: usize,
    kernels: Vec<Kernel>,
}

impl KernelCompression {
    /// Create an estimator with the given bandwidth and compression knobs.
    ///
    /// `distance_threshold` of `None` means "always open a new kernel
    /// while under the limit"; `kernel_limit` of `None` means unbounded.
    pub fn new(
        bandwidth: &[f64],
        distance_threshold: Option<f64>,
        kernel_limit: Option<usize>,
    ) -> Result<Self, EstimatorError> {
        validate_bandwidth(bandwidth)?;
        let threshold = distance_threshold.unwrap_or(f64::NEG_INFINITY);
        if threshold.is_nan() {
            return Err(EstimatorError::InvalidDistanceThreshold);
        }
        let limit = match kernel_limit {
            Some(0) => return Err(EstimatorError::InvalidKernelLimit),
            Some(k) => k,
            None => usize::MAX,
        };
        Ok(Self {
            bandwidth: bandwidth.to_vec(),
            seed_variance: bandwidth.iter().map(|b| b * b).collect(),
            distance_threshold: threshold,
            kernel_limit: limit,
            kernels: Vec::new(),
        })
    }

    /// Per-dimension kernel bandwidth.
    pub fn bandwidth(&self) -> &[f64] {
        &self.bandwidth
    }

    /// Number of retained kernels.
    pub fn kernel_count(&self) -> usize {
        self.kernels.len()
    }

    /// Sum of kernel weights. Equals the number of samples fitted.
    pub fn total_weight(&self) -> f64 {
        self.kernels.iter().map(|k| k.weight).sum()
    }

    /// Drop all retained kernels.
    pub fn clear(&mut self) {
        self.kernels.clear();
    }

    /// Per-kernel Gaussian values at each query point, `[points, kernels]`.
    /// Returns `None` before any sample has been fitted.
    pub fn estimate(
        &self,
        points: ArrayView2<'_, f64>,
    ) -> Result<Option<Array2<f64>>, EstimatorError> {
        self.estimate_dims(points, 0, self.dims())
    }

    /// As [`estimate`](Self::estimate), but against the dimension subrange
    /// `start..end` of each kernel. Query points must have `end - start`
    /// columns. This is how a joint covariate-by-mark estimate is queried
    /// for its covariate marginal.
    pub fn estimate_dims(
        &self,
        points: ArrayView2<'_, f64>,
        start: usize,
        end: usize,
    ) -> Result<Option<Array2<f64>>, EstimatorError> {
        let dims = self.dims();
        if start >= end || end > dims {
            return Err(EstimatorError::InvalidDimensionRange { start, end, dims });
        }
        let width = end - start;
        if points.ncols() != width {
            return Err(EstimatorError::DimensionMismatch {
                expected: width,
                got: points.ncols(),
            });
        }
        if self.kernels.is_empty() {
            return Ok(None);
        }

        let mut out = Array2::zeros((points.nrows(), self.kernels.len()));
        let mut query = vec![0.0; width];
        for (i, row) in points.rows().into_iter().enumerate() {
            for (q, v) in query.iter_mut().zip(row.iter()) {
                *q = *v;
            }
            for (j, kernel) in self.kernels.iter().enumerate() {
                out[[i, j]] = gaussian_kernel_diag(
                    &query,
                    &kernel.mean[start..end],
                    &kernel.variance[start..end],
                );
            }
        }
        Ok(Some(out))
    }

    /// Collapse a per-kernel estimate to a relative density per point:
    /// mean across the kernel axis, guarded against NaN, normalized to
    /// sum to 1. Matches the exact estimator's output contract.
    pub fn normalize(estimate: ArrayView2<'_, f64>) -> Array1<f64> {
        let rows = estimate.nrows();
        let cols = estimate.ncols();
        let mut out = Array1::zeros(rows);
        if cols == 0 {
            return out;
        }
        for (i, row) in estimate.rows().into_iter().enumerate() {
            out[i] = nan_to_num(row.sum() / cols as f64);
        }
        let total = out.sum();
        if total > 0.0 {
            out /= total;
        }
        out
    }
}

impl DensityEstimator for KernelCompression {
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

        let mut sample = vec![0.0; self.dims()];
        for row in data.rows() {
            for (s, v) in sample.iter_mut().zip(row.iter()) {
                *s = *v;
            }

            if self.kernels.is_empty() {
                self.kernels.push(Kernel::seed(&sample, &self.seed_variance));
                continue;
            }

            // Distance to each kernel under that kernel's own variance;
            // ties resolve to the earliest kernel.
            let mut best_index = 0;
            let mut best_distance = f64::INFINITY;
            for (j, kernel) in self.kernels.iter().enumerate() {
                let distance =
                    mahalanobis_sq_diag(&sample, &kernel.mean, &kernel.variance).sqrt();
                if distance < best_distance {
                    best_distance = distance;
                    best_index = j;
                }
            }

            if best_distance > self.distance_threshold && self.kernels.len() < self.kernel_limit
            {
                self.kernels.push(Kernel::seed(&sample, &self.seed_variance));
            } else {
                self.kernels[best_index].merge(&sample, &self.seed_variance);
            }
        }

        debug!(
            kernels = self.kernels.len(),
            total_weight = self.total_weight(),
            "compressed fit complete"
        );
        Ok(())
    }

    fn evaluate(&self, points: ArrayView2<'_, f64>) -> Result<Array1<f64>, EstimatorError> {
        match self.estimate(points)? {
            Some(estimate) => Ok(Self::normalize(estimate.view())),
            None => Ok(Array1::zeros(points.nrows())),
        }
    }

    fn len(&self) -> usize {
        self.kernels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    #[test]
    fn test_first_sample_seeds_unit_weight_kernel() {
        let mut est = KernelCompression::new(&[2.0], None, None).unwrap();
        est.fit(arr2(&[[3.0]]).view()).unwrap();
        assert_eq!(est.kernel_count(), 1);
        assert_abs_diff_eq!(est.kernels[0].weight, 1.0);
        assert_abs_diff_eq!(est.kernels[0].mean[0], 3.0);
        assert_abs_diff_eq!(est.kernels[0].variance[0], 4.0);
    }

    #[test]
    fn test_kernel_limit_forces_merge_into_closest() {
        // Limit 2: the third sample must merge into the nearer kernel.
        let mut est = KernelCompression::new(&[1.0], None, Some(2)).unwrap();
        est.fit(arr2(&[[0.0], [10.0], [20.0]]).view()).unwrap();

        assert_eq!(est.kernel_count(), 2);
        assert_abs_diff_eq!(est.total_weight(), 3.0);

        // Kernel 0 untouched.
        assert_abs_diff_eq!(est.kernels[0].mean[0], 0.0);
        assert_abs_diff_eq!(est.kernels[0].weight, 1.0);

        // Kernel 1 absorbed 20.0: mean (10 + 20) / 2, population variance
        // ((1 + 100) + (1 + 400)) / 2 - 15^2 = 26.
        assert_abs_diff_eq!(est.kernels[1].weight, 2.0);
        assert_abs_diff_eq!(est.kernels[1].mean[0], 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(est.kernels[1].variance[0], 26.0, epsilon = 1e-12);
    }

    #[test]
    fn test_infinite_threshold_collapses_to_single_kernel() {
        let mut est = KernelCompression::new(&[1.0], Some(f64::INFINITY), None).unwrap();
        let samples: Vec<[f64; 1]> = (0..100).map(|i| [i as f64]).collect();
        est.fit(arr2(&samples).view()).unwrap();

        assert_eq!(est.kernel_count(), 1);
        assert_abs_diff_eq!(est.total_weight(), 100.0);
        assert_abs_diff_eq!(est.kernels[0].mean[0], 49.5, epsilon = 1e-9);
    }

    #[test]
    fn test_kernel_count_never_exceeds_limit() {
        let mut est = KernelCompression::new(&[0.5], None, Some(8)).unwrap();
        let samples: Vec<[f64; 1]> = (0..200).map(|i| [(i % 37) as f64]).collect();
        est.fit(arr2(&samples).view()).unwrap();
        assert!(est.kernel_count() <= 8);
        assert_abs_diff_eq!(est.total_weight(), 200.0);
    }

    #[test]
    fn test_default_knobs_reproduce_exact_estimator() {
        // Threshold -inf with no limit: every sample keeps its own kernel,
        // so evaluation matches the exact estimator on the same data.
        let data = arr2(&[[0.0], [1.5], [3.0], [4.5]]);
        let grid = arr2(&[[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]]);

        let mut compressed = KernelCompression::new(&[1.0], None, None).unwrap();
        compressed.fit(data.view()).unwrap();
        assert_eq!(compressed.kernel_count(), 4);

        let mut exact = super::super::KernelDensity::new(&[1.0]).unwrap();
        exact.fit(data.view()).unwrap();

        let a = compressed.evaluate(grid.view()).unwrap();
        let b = exact.evaluate(grid.view()).unwrap();
        for i in 0..a.len() {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_empty_estimate_is_none_and_evaluate_zeros() {
        let est = KernelCompression::new(&[1.0], None, None).unwrap();
        assert!(est.estimate(arr2(&[[0.0]]).view()).unwrap().is_none());
        let out = est.evaluate(arr2(&[[0.0], [1.0]]).view()).unwrap();
        assert_abs_diff_eq!(out.sum(), 0.0);
    }

    #[test]
    fn test_estimate_dims_queries_marginal_slice() {
        let mut est = KernelCompression::new(&[1.0, 2.0], Some(f64::INFINITY), None).unwrap();
        est.fit(arr2(&[[1.0, 5.0]]).view()).unwrap();

        // Query only the first dimension of the single kernel.
        let est_first = est
            .estimate_dims(arr2(&[[1.0]]).view(), 0, 1)
            .unwrap()
            .unwrap();
        assert_eq!(est_first.shape(), &[1, 1]);
        // At the mean of a variance-1 slice the kernel value is 1/sqrt(1).
        assert_abs_diff_eq!(est_first[[0, 0]], 1.0, epsilon = 1e-12);

        // Second dimension has variance 4, peak value 1/2.
        let est_second = est
            .estimate_dims(arr2(&[[5.0]]).view(), 1, 2)
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(est_second[[0, 0]], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_estimate_dims_rejects_bad_ranges() {
        let est = KernelCompression::new(&[1.0, 1.0], None, None).unwrap();
        let points = arr2(&[[0.0]]);
        assert!(est.estimate_dims(points.view(), 1, 1).is_err());
        assert!(est.estimate_dims(points.view(), 0, 3).is_err());
        assert!(est.estimate_dims(points.view(), 2, 1).is_err());
    }

    #[test]
    fn test_merge_variance_never_negative() {
        // Repeated identical samples: population variance of identical
        // points collapses toward the seed variance, never below zero.
        let mut est = KernelCompression::new(&[1e-3], Some(f64::INFINITY), None).unwrap();
        let samples: Vec<[f64; 1]> = (0..50).map(|_| [7.0]).collect();
        est.fit(arr2(&samples).view()).unwrap();
        assert_eq!(est.kernel_count(), 1);
        assert!(est.kernels[0].variance[0] >= 0.0);
        assert_abs_diff_eq!(est.kernels[0].mean[0], 7.0, epsilon = 1e-9);
    }

    #[test]
    fn test_streaming_matches_batch_fit() {
        let grid = arr2(&[[0.0], [2.0], [4.0], [6.0]]);

        let mut batch = KernelCompression::new(&[1.0], Some(2.5), Some(16)).unwrap();
        batch
            .fit(arr2(&[[0.0], [0.5], [4.0], [4.5], [8.0]]).view())
            .unwrap();

        let mut stream = KernelCompression::new(&[1.0], Some(2.5), Some(16)).unwrap();
        for s in [[0.0], [0.5], [4.0], [4.5], [8.0]] {
            stream.fit(arr2(&[s]).view()).unwrap();
        }

        assert_eq!(batch.kernel_count(), stream.kernel_count());
        let a = batch.evaluate(grid.view()).unwrap();
        let b = stream.evaluate(grid.view()).unwrap();
        for i in 0..a.len() {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
        }
    }
}
