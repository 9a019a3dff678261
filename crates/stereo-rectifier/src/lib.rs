//! Rectification stage for the stereo pipeline
//!
//! Resamples camera images so that corresponding points land on the same
//! scanline, using per-row tables of integer source coordinates plus 7-bit
//! fractional offsets precomputed from a homography and the camera
//! intrinsics.

pub mod intrinsic;
pub mod warp;

pub use intrinsic::{mat_mul3, Intrinsic, Matrix3, IDENTITY3};
pub use warp::{FracRow, Interpolate, Rectifier, INTERP_LANES};

#[derive(thiserror::Error, Debug)]
pub enum RectifyError {
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("image error: {0}")]
    Image(#[from] stereo_image::ImageError),
}
