//! Owned and borrowed raster buffers
//!
//! Every raster is a single contiguous allocation addressed with one row
//! stride; `Image` owns its storage, `ImageView` borrows caller memory for
//! the caller-guaranteed lifetime.

use crate::error::ImageError;

/// Read access to a rectangular pixel buffer.
pub trait Raster<T>: Sync {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn stride(&self) -> usize;
    /// Row `v` as a slice of exactly `width` pixels.
    fn row(&self, v: usize) -> &[T];
}

/// Owned image buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: usize,
    height: usize,
    stride: usize,
    data: Vec<T>,
}

impl<T: Copy + Default> Image<T> {
    /// Zero-initialized image with `stride == width`.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_stride(width, height, width)
    }

    pub fn with_stride(width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width, "stride {} < width {}", stride, width);
        Self {
            width,
            height,
            stride,
            data: vec![T::default(); stride * height],
        }
    }

    /// Wrap an existing buffer; `data` must hold `width * height` pixels.
    pub fn from_vec(data: Vec<T>, width: usize, height: usize) -> Result<Self, ImageError> {
        if data.len() != width * height {
            return Err(ImageError::Format(format!(
                "buffer of {} pixels cannot hold {}x{} image",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            stride: width,
            data,
        })
    }

    pub fn row_mut(&mut self, v: usize) -> &mut [T] {
        let off = v * self.stride;
        &mut self.data[off..off + self.width]
    }

    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn as_view(&self) -> ImageView<'_, T> {
        ImageView {
            width: self.width,
            height: self.height,
            stride: self.stride,
            data: &self.data,
        }
    }
}

impl<T: Copy + Default + Sync> Raster<T> for Image<T> {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn row(&self, v: usize) -> &[T] {
        let off = v * self.stride;
        &self.data[off..off + self.width]
    }
}

/// Non-owning view over caller memory.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a, T> {
    width: usize,
    height: usize,
    stride: usize,
    data: &'a [T],
}

impl<'a, T> ImageView<'a, T> {
    pub fn from_raw(
        data: &'a [T],
        width: usize,
        height: usize,
        stride: usize,
    ) -> Result<Self, ImageError> {
        if stride < width {
            return Err(ImageError::Format(format!(
                "stride {} < width {}",
                stride, width
            )));
        }
        let needed = if height == 0 {
            0
        } else {
            stride * (height - 1) + width
        };
        if data.len() < needed {
            return Err(ImageError::Format(format!(
                "buffer of {} pixels too small for {}x{} view with stride {}",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }
}

impl<T: Sync> Raster<T> for ImageView<'_, T> {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn row(&self, v: usize) -> &[T] {
        let off = v * self.stride;
        &self.data[off..off + self.width]
    }
}
