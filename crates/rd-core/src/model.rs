//! End-to-end decoding model.
//!
//! `DecoderModel` wires the full pipeline behind two calls: `encode`
//! folds covariate and spiking blocks into the intensity estimators,
//! and `decode` turns observation blocks into posteriors via the
//! configured forward filter. Construction is driven entirely by a
//! serializable [`ModelConfig`], validated up front.

use std::sync::Arc;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::classifier::{
    ClassifiedPosterior, ClassifierConfig, ClassifierError, HybridStateSpaceClassifier,
};
use crate::config::{ConfigError, EstimationSpec, GridSpec, TransitionSpec};
use crate::decoder::{DecodeError, StateSpaceDecoder};
use crate::encoder::{
    ClusterlessEncoder, Encoder, EncoderError, Observations, SortedUnitEncoder,
};
use crate::estimation::EstimatorError;
use crate::likelihood::{likelihoods_from_log, poisson_log_likelihood, LikelihoodError};
use crate::state_space::StateSpace;
use crate::transitions::{build_transition, TransitionError};

/// Errors from model construction and use.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Estimator(#[from] EstimatorError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Classifier(#[from] ClassifierError),

    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
}

/// Which encoder the model runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderSpec {
    /// Spike counts from already-sorted units.
    SortedUnits {
        /// Number of sorted units.
        units: usize,
    },

    /// Unsorted threshold crossings with waveform marks.
    Clusterless {
        /// Number of recording channels.
        channels: usize,
        /// Waveform feature dimensions per event.
        mark_dims: usize,
    },
}

/// Which forward filter the model runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterSpec {
    /// Single-trajectory filter with one transition structure.
    Decoder {
        #[serde(default)]
        transition: TransitionSpec,
    },

    /// Hybrid regime classifier.
    Classifier {
        #[serde(default)]
        classifier: ClassifierConfig,
    },
}

/// Complete model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub grid: GridSpec,
    pub estimation: EstimationSpec,
    pub encoder: EncoderSpec,
    pub filter: FilterSpec,
}

impl ModelConfig {
    /// Validate every section and their cross-cutting constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.estimation.validate()?;

        match &self.encoder {
            EncoderSpec::SortedUnits { units } => {
                if *units == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "encoder.units",
                        message: "at least one unit is required".to_string(),
                    });
                }
                if self.estimation.bandwidth().len() != self.grid.dims() {
                    return Err(ConfigError::DimensionMismatch {
                        field: "estimation.bandwidth",
                        expected: self.grid.dims(),
                        got: self.estimation.bandwidth().len(),
                    });
                }
            }
            EncoderSpec::Clusterless {
                channels,
                mark_dims,
            } => {
                if *channels == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "encoder.channels",
                        message: "at least one channel is required".to_string(),
                    });
                }
                if *mark_dims == 0 {
                    return Err(ConfigError::InvalidValue {
                        field: "encoder.mark_dims",
                        message: "at least one mark dimension is required".to_string(),
                    });
                }
                if matches!(self.estimation, EstimationSpec::KernelDensity { .. }) {
                    return Err(ConfigError::InvalidValue {
                        field: "estimation.method",
                        message: "clusterless encoding requires kernel_compression"
                            .to_string(),
                    });
                }
                let joint = self.grid.dims() + mark_dims;
                if self.estimation.bandwidth().len() != joint {
                    return Err(ConfigError::DimensionMismatch {
                        field: "estimation.bandwidth",
                        expected: joint,
                        got: self.estimation.bandwidth().len(),
                    });
                }
            }
        }

        match &self.filter {
            FilterSpec::Decoder { transition } => transition.validate()?,
            FilterSpec::Classifier { classifier } => classifier.validate()?,
        }
        Ok(())
    }
}

enum EncoderKind {
    Sorted(SortedUnitEncoder),
    Clusterless(ClusterlessEncoder),
}

enum FilterKind {
    Decoder(StateSpaceDecoder),
    Classifier(HybridStateSpaceClassifier),
}

/// Posterior output of a decode call, shaped by the configured filter.
#[derive(Debug, Clone)]
pub enum DecodeOutput {
    /// Single-trajectory posterior, `[bins, states]`.
    Posterior(Array2<f64>),

    /// Joint regime-by-state posterior.
    Classified(ClassifiedPosterior),
}

impl DecodeOutput {
    /// State marginal per bin regardless of filter kind, `[bins, states]`.
    pub fn state_posteriors(&self) -> Array2<f64> {
        match self {
            DecodeOutput::Posterior(posteriors) => posteriors.clone(),
            DecodeOutput::Classified(classified) => classified.state_posteriors(),
        }
    }
}

/// The assembled pipeline: state space, encoder, and forward filter.
pub struct DecoderModel {
    space: Arc<StateSpace>,
    encoder: EncoderKind,
    filter: FilterKind,
}

impl DecoderModel {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let space = Arc::new(StateSpace::from_spec(&config.grid)?);

        let encoder = match &config.encoder {
            EncoderSpec::SortedUnits { units } => EncoderKind::Sorted(
                SortedUnitEncoder::new(space.clone(), &config.estimation, *units)?,
            ),
            EncoderSpec::Clusterless {
                channels,
                mark_dims,
            } => EncoderKind::Clusterless(ClusterlessEncoder::new(
                space.clone(),
                &config.estimation,
                *channels,
                *mark_dims,
            )?),
        };

        let filter = match &config.filter {
            FilterSpec::Decoder { transition } => {
                let transition = build_transition(transition, &space)?;
                FilterKind::Decoder(StateSpaceDecoder::new(space.clone(), transition)?)
            }
            FilterSpec::Classifier { classifier } => FilterKind::Classifier(
                HybridStateSpaceClassifier::new(space.clone(), classifier)?,
            ),
        };

        info!(
            states = space.len(),
            dims = space.dims(),
            "assembled decoder model"
        );
        Ok(Self {
            space,
            encoder,
            filter,
        })
    }

    /// The grid posteriors are reported over.
    pub fn state_space(&self) -> &StateSpace {
        &self.space
    }

    /// Number of observation channels the encoder expects.
    pub fn channels(&self) -> usize {
        match &self.encoder {
            EncoderKind::Sorted(encoder) => encoder.channels(),
            EncoderKind::Clusterless(encoder) => encoder.channels(),
        }
    }

    /// Fold a block of covariates and aligned observations into the
    /// encoder. May be called repeatedly.
    pub fn encode(
        &mut self,
        covariates: ArrayView2<'_, f64>,
        observations: &Observations,
    ) -> Result<(), ModelError> {
        match &mut self.encoder {
            EncoderKind::Sorted(encoder) => encoder.fit(covariates, observations)?,
            EncoderKind::Clusterless(encoder) => encoder.fit(covariates, observations)?,
        }
        Ok(())
    }

    /// Linear-domain likelihood rows for a block of observations,
    /// `[bins, states]`.
    pub fn likelihoods(
        &mut self,
        observations: &Observations,
    ) -> Result<Array2<f64>, ModelError> {
        let log_likelihood = match (&mut self.encoder, observations) {
            (EncoderKind::Sorted(encoder), Observations::Sorted { counts }) => {
                let surfaces = encoder.evaluate()?;
                poisson_log_likelihood(counts.view(), surfaces)?
            }
            (EncoderKind::Clusterless(encoder), observations @ Observations::Clusterless { .. }) => {
                encoder.log_likelihood(observations)?
            }
            (EncoderKind::Sorted(_), _) => {
                return Err(EncoderError::ObservationKind {
                    expected: "sorted spike counts",
                }
                .into())
            }
            (EncoderKind::Clusterless(_), _) => {
                return Err(EncoderError::ObservationKind {
                    expected: "clusterless marks",
                }
                .into())
            }
        };
        Ok(likelihoods_from_log(log_likelihood.view()))
    }

    /// Decode a block of observations through the forward filter.
    pub fn decode(&mut self, observations: &Observations) -> Result<DecodeOutput, ModelError> {
        let likelihoods = self.likelihoods(observations)?;
        match &mut self.filter {
            FilterKind::Decoder(filter) => {
                Ok(DecodeOutput::Posterior(filter.decode(likelihoods.view())?))
            }
            FilterKind::Classifier(filter) => Ok(DecodeOutput::Classified(
                filter.decode(likelihoods.view())?,
            )),
        }
    }

    /// Clear the filter's carried posterior; the next decode seeds
    /// fresh. Fitted encoder state is kept.
    pub fn reset(&mut self) {
        match &mut self.filter {
            FilterKind::Decoder(filter) => filter.reset(),
            FilterKind::Classifier(filter) => filter.reset(),
        }
    }
}
