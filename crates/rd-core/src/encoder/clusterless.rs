//! Encoder for unsorted threshold crossings with waveform marks.

use std::sync::Arc;

use ndarray::{s, Array1, Array2, ArrayView2};
use tracing::debug;

use super::{
    log_intensity_surface, validate_covariates, ChannelMarks, Encoder, EncoderError,
    Observations,
};
use crate::config::EstimationSpec;
use crate::estimation::{DensityEstimator, KernelCompression};
use crate::state_space::StateSpace;

/// Joint covariate-by-mark intensity model per recording channel.
///
/// Each channel's estimator lives in `dims + mark_dims` space: the
/// covariate at the moment of a threshold crossing concatenated with the
/// crossing's waveform features. Decoding queries the joint density at
/// every grid point paired with an observed mark, so spikes with
/// distinctive waveforms localize sharply without any spike sorting.
///
/// Only the compressed estimator supports the dimension-subrange queries
/// the covariate marginal needs, so this encoder requires
/// [`EstimationSpec::KernelCompression`].
pub struct ClusterlessEncoder {
    space: Arc<StateSpace>,
    mark_dims: usize,
    occupancy: KernelCompression,
    channels: Vec<KernelCompression>,
    event_counts: Vec<u64>,
    total_samples: u64,
    cache: Option<Cache>,
    stale: bool,
}

/// Grid-dependent products of the fitted estimators.
struct Cache {
    /// Occupancy density over the grid, normalized.
    occupancy: Array1<f64>,
    /// Ground-process log intensities, `[channels, states]`.
    surfaces: Array2<f64>,
}

impl ClusterlessEncoder {
    pub fn new(
        space: Arc<StateSpace>,
        estimation: &EstimationSpec,
        channels: usize,
        mark_dims: usize,
    ) -> Result<Self, EncoderError> {
        if channels == 0 {
            return Err(EncoderError::DimensionMismatch {
                field: "encoder.channels",
                expected: 1,
                got: 0,
            });
        }
        if mark_dims == 0 {
            return Err(EncoderError::DimensionMismatch {
                field: "encoder.mark_dims",
                expected: 1,
                got: 0,
            });
        }
        let (bandwidth, distance_threshold, kernel_limit) = match estimation {
            EstimationSpec::KernelCompression {
                bandwidth,
                distance_threshold,
                kernel_limit,
            } => (bandwidth, *distance_threshold, *kernel_limit),
            EstimationSpec::KernelDensity { .. } => {
                return Err(EncoderError::UnsupportedEstimator)
            }
        };
        let joint_dims = space.dims() + mark_dims;
        if bandwidth.len() != joint_dims {
            return Err(EncoderError::DimensionMismatch {
                field: "estimation.bandwidth",
                expected: joint_dims,
                got: bandwidth.len(),
            });
        }

        let occupancy = KernelCompression::new(
            &bandwidth[..space.dims()],
            distance_threshold,
            kernel_limit,
        )?;
        let channels = (0..channels)
            .map(|_| KernelCompression::new(bandwidth, distance_threshold, kernel_limit))
            .collect::<Result<Vec<_>, _>>()?;
        let event_counts = vec![0; channels.len()];

        Ok(Self {
            space,
            mark_dims,
            occupancy,
            channels,
            event_counts,
            total_samples: 0,
            cache: None,
            stale: false,
        })
    }

    /// Waveform feature dimensions per event.
    pub fn mark_dims(&self) -> usize {
        self.mark_dims
    }

    /// Mean event rate per channel, in events per time bin.
    pub fn rates(&self) -> Vec<f64> {
        self.event_counts
            .iter()
            .map(|&events| {
                if self.total_samples == 0 {
                    0.0
                } else {
                    events as f64 / self.total_samples as f64
                }
            })
            .collect()
    }

    fn expect_clusterless<'a>(
        &self,
        observations: &'a Observations,
    ) -> Result<(usize, &'a [ChannelMarks]), EncoderError> {
        match observations {
            Observations::Clusterless { bins, channels } => Ok((*bins, channels.as_slice())),
            Observations::Sorted { .. } => Err(EncoderError::ObservationKind {
                expected: "clusterless marks",
            }),
        }
    }

    fn validate_events(
        &self,
        channel: usize,
        events: &ChannelMarks,
        bins: usize,
    ) -> Result<(), EncoderError> {
        if events.marks.nrows() != events.samples.len() {
            return Err(EncoderError::DimensionMismatch {
                field: "marks.rows",
                expected: events.samples.len(),
                got: events.marks.nrows(),
            });
        }
        if events.marks.ncols() != self.mark_dims {
            return Err(EncoderError::DimensionMismatch {
                field: "marks.dims",
                expected: self.mark_dims,
                got: events.marks.ncols(),
            });
        }
        for (event, &index) in events.samples.iter().enumerate() {
            if index >= bins {
                return Err(EncoderError::EventIndexOutOfRange {
                    channel,
                    index,
                    bins,
                });
            }
            if events.marks.row(event).iter().any(|v| !v.is_finite()) {
                return Err(EncoderError::NonFiniteMark { channel, event });
            }
        }
        Ok(())
    }

    fn ensure_cache(&mut self) -> Result<(), EncoderError> {
        if self.cache.is_none() || self.stale {
            let points = self.space.points();
            let occupancy = self.occupancy.evaluate(points)?;
            let rates = self.rates();
            let dims = self.space.dims();
            let mut surfaces = Array2::zeros((self.channels.len(), points.nrows()));
            for (c, channel) in self.channels.iter().enumerate() {
                let density = match channel.estimate_dims(points, 0, dims)? {
                    Some(estimate) => KernelCompression::normalize(estimate.view()),
                    None => Array1::zeros(points.nrows()),
                };
                surfaces
                    .row_mut(c)
                    .assign(&log_intensity_surface(rates[c], &density, &occupancy));
            }
            self.cache = Some(Cache {
                occupancy,
                surfaces,
            });
            self.stale = false;
        }
        Ok(())
    }

    /// Per-bin log likelihood over the grid for a block of decode-time
    /// events, `[bins, states]`.
    ///
    /// Each row starts from the no-event term `-sum_c intensity_c(x)` and
    /// gains, per observed event, the log of the occupancy-normalized
    /// joint density at (grid point, event mark).
    pub fn log_likelihood(
        &mut self,
        observations: &Observations,
    ) -> Result<Array2<f64>, EncoderError> {
        let (bins, events) = self.expect_clusterless(observations)?;
        if events.len() != self.channels.len() {
            return Err(EncoderError::DimensionMismatch {
                field: "observations.channels",
                expected: self.channels.len(),
                got: events.len(),
            });
        }
        for (c, channel_events) in events.iter().enumerate() {
            self.validate_events(c, channel_events, bins)?;
        }
        self.ensure_cache()?;
        let cache = self.cache.as_ref().expect("cache populated above");

        let points = self.space.points();
        let n = points.nrows();
        let dims = self.space.dims();
        let rates = self.rates();

        // No-event term, shared by every bin.
        let mut base = Array1::zeros(n);
        for c in 0..self.channels.len() {
            for i in 0..n {
                base[i] -= cache.surfaces[[c, i]].exp();
            }
        }

        let mut out = Array2::zeros((bins, n));
        for mut row in out.rows_mut() {
            row.assign(&base);
        }

        // Joint query buffer: grid points on the left, the current mark
        // broadcast on the right.
        let mut joint = Array2::zeros((n, dims + self.mark_dims));
        joint.slice_mut(s![.., ..dims]).assign(&points);

        for (c, channel_events) in events.iter().enumerate() {
            for (e, &bin) in channel_events.samples.iter().enumerate() {
                for d in 0..self.mark_dims {
                    joint
                        .slice_mut(s![.., dims + d])
                        .fill(channel_events.marks[[e, d]]);
                }
                let density = match self.channels[c].estimate(joint.view())? {
                    Some(estimate) => KernelCompression::normalize(estimate.view()),
                    None => Array1::zeros(n),
                };
                let contribution =
                    log_intensity_surface(rates[c], &density, &cache.occupancy);
                let mut row = out.row_mut(bin);
                row += &contribution;
            }
        }
        Ok(out)
    }
}

impl Encoder for ClusterlessEncoder {
    fn channels(&self) -> usize {
        self.channels.len()
    }

    fn fit(
        &mut self,
        covariates: ArrayView2<'_, f64>,
        observations: &Observations,
    ) -> Result<(), EncoderError> {
        let (bins, events) = self.expect_clusterless(observations)?;
        validate_covariates(covariates, self.space.dims())?;
        if bins != covariates.nrows() {
            return Err(EncoderError::DimensionMismatch {
                field: "observations.bins",
                expected: covariates.nrows(),
                got: bins,
            });
        }
        if events.len() != self.channels.len() {
            return Err(EncoderError::DimensionMismatch {
                field: "observations.channels",
                expected: self.channels.len(),
                got: events.len(),
            });
        }
        for (c, channel_events) in events.iter().enumerate() {
            self.validate_events(c, channel_events, covariates.nrows())?;
        }

        let dims = self.space.dims();
        for (c, channel_events) in events.iter().enumerate() {
            if channel_events.is_empty() {
                continue;
            }
            let mut rows: Vec<f64> = Vec::with_capacity(
                channel_events.len() * (dims + self.mark_dims),
            );
            for (e, &sample) in channel_events.samples.iter().enumerate() {
                rows.extend(covariates.row(sample).iter());
                rows.extend(channel_events.marks.row(e).iter());
            }
            let joint = Array2::from_shape_vec(
                (channel_events.len(), dims + self.mark_dims),
                rows,
            )
            .expect("joint event buffer matches its declared shape");
            self.channels[c].fit(joint.view())?;
            self.event_counts[c] += channel_events.len() as u64;
        }

        self.occupancy.fit(covariates)?;
        self.total_samples += covariates.nrows() as u64;
        self.stale = true;
        debug!(
            samples = covariates.nrows(),
            total = self.total_samples,
            channels = self.channels.len(),
            "encoded clusterless mark block"
        );
        Ok(())
    }

    fn evaluate(&mut self) -> Result<ArrayView2<'_, f64>, EncoderError> {
        self.ensure_cache()?;
        let cache = self.cache.as_ref().expect("cache populated above");
        Ok(cache.surfaces.view())
    }

    fn evaluate_at(&self, points: ArrayView2<'_, f64>) -> Result<Array2<f64>, EncoderError> {
        let dims = self.space.dims();
        if points.ncols() != dims {
            return Err(EncoderError::DimensionMismatch {
                field: "points",
                expected: dims,
                got: points.ncols(),
            });
        }
        let occupancy = self.occupancy.evaluate(points)?;
        let rates = self.rates();
        let mut out = Array2::zeros((self.channels.len(), points.nrows()));
        for (c, channel) in self.channels.iter().enumerate() {
            let density = match channel.estimate_dims(points, 0, dims)? {
                Some(estimate) => KernelCompression::normalize(estimate.view()),
                None => Array1::zeros(points.nrows()),
            };
            out.row_mut(c)
                .assign(&log_intensity_surface(rates[c], &density, &occupancy));
        }
        Ok(out)
    }
}
