//! Replay decoder math utilities.

pub mod math;

pub use math::gaussian::*;
pub use math::stable::*;
