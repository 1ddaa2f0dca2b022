//! Replay Decoder Core Library
//!
//! This library provides state-space decoding of neural spiking activity:
//! - Incremental kernel density estimation, exact and compressed
//! - Discretized state spaces and movement transition models
//! - Encoders turning spikes into occupancy-normalized intensity surfaces
//! - Poisson and clusterless likelihoods over the state grid
//! - Forward filters: a single continuous decoder and a hybrid
//!   regime-by-state classifier
//!
//! [`model::DecoderModel`] assembles the full pipeline from a
//! serializable [`model::ModelConfig`].

pub mod classifier;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod estimation;
pub mod likelihood;
pub mod logging;
pub mod model;
pub mod state_space;
pub mod transitions;
