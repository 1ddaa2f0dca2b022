//! Numerical building blocks shared by the estimation and filtering layers.

pub mod gaussian;
pub mod stable;
