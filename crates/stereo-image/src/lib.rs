//! Raster images and pixel formats for the stereo pipeline
//!
//! Owned and borrowed image buffers, the pixel types produced by the
//! supported cameras (gray, RGB, YUV family), BT.601 color conversion and
//! the PBM/BMP file subsets used to exchange rectified images, disparity
//! maps and the calibration comment header.

pub mod error;
pub mod format;
pub mod image;
pub mod pixel;

pub use error::ImageError;
pub use format::{
    restore_float, restore_gray, restore_rgb, save_float, save_gray, save_rgb, Calibration,
    DataType, ImageHeader,
};
pub use image::{Image, ImageView, Raster};
pub use pixel::{Luma, Rgb24, Yuv411, Yuv422, Yuv444, Yuyv422};
