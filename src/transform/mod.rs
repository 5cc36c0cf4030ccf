//! Pixel ↔ geographic transforms and resampling.

mod affine;
mod resample;

pub use affine::AffineTransform;
pub use resample::{resample, TargetGrid};
