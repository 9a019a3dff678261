//! Per-pixel matching cost
//!
//! The cost of pairing two pixels is their absolute difference saturated at
//! a threshold, summed over channels for color; the cap keeps occlusions
//! and specular highlights from dominating a window sum.

use stereo_image::Rgb24;

/// Pixel types the engines can match on.
pub trait MatchPixel: Copy + Default + Send + Sync {
    fn capped_diff(self, other: Self, thresh: i32) -> i32;
    /// Luminance used as the guided-filter guide.
    fn luma(self) -> f32;
}

impl MatchPixel for u8 {
    #[inline]
    fn capped_diff(self, other: Self, thresh: i32) -> i32 {
        (self as i32 - other as i32).abs().min(thresh)
    }

    #[inline]
    fn luma(self) -> f32 {
        self as f32
    }
}

impl MatchPixel for Rgb24 {
    #[inline]
    fn capped_diff(self, other: Self, thresh: i32) -> i32 {
        (self.r as i32 - other.r as i32).abs().min(thresh)
            + (self.g as i32 - other.g as i32).abs().min(thresh)
            + (self.b as i32 - other.b as i32).abs().min(thresh)
    }

    #[inline]
    fn luma(self) -> f32 {
        stereo_image::Luma::luma(self) as f32
    }
}

/// Difference metric anchored at one reference pixel.
#[derive(Debug, Clone, Copy)]
pub struct PixelDiff<T> {
    x: T,
    thresh: i32,
}

impl<T: MatchPixel> PixelDiff<T> {
    #[inline]
    pub fn new(x: T, thresh: i32) -> Self {
        Self { x, thresh }
    }

    #[inline]
    pub fn diff(&self, y: T) -> i32 {
        self.x.capped_diff(y, self.thresh)
    }

    /// Combined horizontal and vertical contribution of the trinocular
    /// case, evaluated in a single pass.
    #[inline]
    pub fn diff2(&self, y: T, z: T) -> i32 {
        self.diff(y) + self.diff(z)
    }
}
