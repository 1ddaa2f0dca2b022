//! Encoder for spike counts from sorted units.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use tracing::debug;

use super::{
    log_intensity_surface, validate_covariates, Encoder, EncoderError, Observations,
};
use crate::config::EstimationSpec;
use crate::estimation::{build_estimator, DensityEstimator};
use crate::state_space::StateSpace;

/// Per-unit intensity surfaces from sorted spike counts.
///
/// One density estimator per unit accumulates the covariate values at
/// which that unit fired (weighted by spike count), and a shared
/// occupancy estimator accumulates all covariates. The intensity for a
/// unit is its mean rate scaled by the ratio of its spiking density to
/// the occupancy.
pub struct SortedUnitEncoder {
    space: Arc<StateSpace>,
    occupancy: Box<dyn DensityEstimator>,
    units: Vec<Box<dyn DensityEstimator>>,
    spike_counts: Vec<u64>,
    total_samples: u64,
    surfaces: Option<Array2<f64>>,
    stale: bool,
}

impl SortedUnitEncoder {
    pub fn new(
        space: Arc<StateSpace>,
        estimation: &EstimationSpec,
        units: usize,
    ) -> Result<Self, EncoderError> {
        if units == 0 {
            return Err(EncoderError::DimensionMismatch {
                field: "encoder.units",
                expected: 1,
                got: 0,
            });
        }
        if estimation.bandwidth().len() != space.dims() {
            return Err(EncoderError::DimensionMismatch {
                field: "estimation.bandwidth",
                expected: space.dims(),
                got: estimation.bandwidth().len(),
            });
        }

        let occupancy = build_estimator(estimation)?;
        let units = (0..units)
            .map(|_| build_estimator(estimation))
            .collect::<Result<Vec<_>, _>>()?;
        let spike_counts = vec![0; units.len()];

        Ok(Self {
            space,
            occupancy,
            units,
            spike_counts,
            total_samples: 0,
            surfaces: None,
            stale: false,
        })
    }

    /// Mean firing rate per unit, in spikes per time bin.
    pub fn rates(&self) -> Vec<f64> {
        self.spike_counts
            .iter()
            .map(|&spikes| {
                if self.total_samples == 0 {
                    0.0
                } else {
                    spikes as f64 / self.total_samples as f64
                }
            })
            .collect()
    }

    fn compute_surfaces(&self, points: ArrayView2<'_, f64>) -> Result<Array2<f64>, EncoderError> {
        let occupancy = self.occupancy.evaluate(points)?;
        let rates = self.rates();
        let mut out = Array2::zeros((self.units.len(), points.nrows()));
        for (c, unit) in self.units.iter().enumerate() {
            let density = unit.evaluate(points)?;
            out.row_mut(c)
                .assign(&log_intensity_surface(rates[c], &density, &occupancy));
        }
        Ok(out)
    }
}

impl Encoder for SortedUnitEncoder {
    fn channels(&self) -> usize {
        self.units.len()
    }

    fn fit(
        &mut self,
        covariates: ArrayView2<'_, f64>,
        observations: &Observations,
    ) -> Result<(), EncoderError> {
        let counts = match observations {
            Observations::Sorted { counts } => counts,
            Observations::Clusterless { .. } => {
                return Err(EncoderError::ObservationKind {
                    expected: "sorted spike counts",
                })
            }
        };
        validate_covariates(covariates, self.space.dims())?;
        if counts.nrows() != covariates.nrows() {
            return Err(EncoderError::DimensionMismatch {
                field: "counts.rows",
                expected: covariates.nrows(),
                got: counts.nrows(),
            });
        }
        if counts.ncols() != self.units.len() {
            return Err(EncoderError::DimensionMismatch {
                field: "counts.units",
                expected: self.units.len(),
                got: counts.ncols(),
            });
        }

        self.occupancy.fit(covariates)?;

        let dims = self.space.dims();
        for (c, unit) in self.units.iter_mut().enumerate() {
            // Each spike contributes one copy of the covariate row where
            // it occurred, so multi-spike bins weigh proportionally.
            let mut rows: Vec<f64> = Vec::new();
            let mut spikes = 0u64;
            for (t, row) in covariates.rows().into_iter().enumerate() {
                let k = counts[[t, c]];
                for _ in 0..k {
                    rows.extend(row.iter());
                }
                spikes += u64::from(k);
            }
            if spikes > 0 {
                let data = Array2::from_shape_vec((spikes as usize, dims), rows)
                    .expect("spike row buffer matches its declared shape");
                unit.fit(data.view())?;
            }
            self.spike_counts[c] += spikes;
        }

        self.total_samples += covariates.nrows() as u64;
        self.stale = true;
        debug!(
            samples = covariates.nrows(),
            total = self.total_samples,
            units = self.units.len(),
            "encoded sorted spike block"
        );
        Ok(())
    }

    fn evaluate(&mut self) -> Result<ArrayView2<'_, f64>, EncoderError> {
        if self.surfaces.is_none() || self.stale {
            let surfaces = self.compute_surfaces(self.space.points())?;
            self.surfaces = Some(surfaces);
            self.stale = false;
        }
        let surfaces = self.surfaces.as_ref().expect("surfaces computed above");
        Ok(surfaces.view())
    }

    fn evaluate_at(&self, points: ArrayView2<'_, f64>) -> Result<Array2<f64>, EncoderError> {
        if points.ncols() != self.space.dims() {
            return Err(EncoderError::DimensionMismatch {
                field: "points",
                expected: self.space.dims(),
                got: points.ncols(),
            });
        }
        self.compute_surfaces(points)
    }
}
