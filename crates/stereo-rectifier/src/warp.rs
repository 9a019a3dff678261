//! Rectification tables and the resampling warp
//!
//! `Rectifier::initialize` walks every output pixel through the composed
//! homography and intrinsics and tabulates integer source coordinates with
//! 7-bit fractional offsets. `apply` then resamples with fixed-point
//! bilinear interpolation; fractions live in 0..127 so `(d * span) >> 7`
//! stays inside 16-bit lanes.

use std::ops::Range;

use stereo_image::{Image, Raster, Rgb24};

use crate::intrinsic::{mat_mul3, Intrinsic, Matrix3};
use crate::RectifyError;

/// Pixels the warp can resample.
pub trait Interpolate: Copy + Default + Send + Sync {
    fn bilinear(p00: Self, p01: Self, p10: Self, p11: Self, du: u8, dv: u8) -> Self;
}

#[inline]
fn lerp_fixed(a: i32, b: i32, d: i32) -> i32 {
    a + ((d * (b - a)) >> 7)
}

impl Interpolate for u8 {
    #[inline]
    fn bilinear(p00: Self, p01: Self, p10: Self, p11: Self, du: u8, dv: u8) -> Self {
        let (du, dv) = (du as i32, dv as i32);
        let top = lerp_fixed(p00 as i32, p01 as i32, du);
        let bot = lerp_fixed(p10 as i32, p11 as i32, du);
        lerp_fixed(top, bot, dv) as u8
    }
}

impl Interpolate for Rgb24 {
    #[inline]
    fn bilinear(p00: Self, p01: Self, p10: Self, p11: Self, du: u8, dv: u8) -> Self {
        Rgb24 {
            r: u8::bilinear(p00.r, p01.r, p10.r, p11.r, du, dv),
            g: u8::bilinear(p00.g, p01.g, p10.g, p11.g, du, dv),
            b: u8::bilinear(p00.b, p01.b, p10.b, p11.b, du, dv),
        }
    }
}

impl Interpolate for f32 {
    #[inline]
    fn bilinear(p00: Self, p01: Self, p10: Self, p11: Self, du: u8, dv: u8) -> Self {
        let fu = du as f32 / 128.0;
        let fv = dv as f32 / 128.0;
        let top = p00 + fu * (p01 - p00);
        let bot = p10 + fu * (p11 - p10);
        top + fv * (bot - top)
    }
}

/// Pixels interpolated per blocked inner-loop iteration; the fixed trip
/// count lets the compiler keep `INTERP_LANES` 16-bit lanes in flight.
pub const INTERP_LANES: usize = 8;

/// Fractional source coordinates for one output row, valid on the
/// contiguous span `[lmost, lmost + len)`.
#[derive(Debug, Clone, Default)]
pub struct FracRow {
    lmost: usize,
    us: Vec<i16>,
    vs: Vec<i16>,
    du: Vec<u8>,
    dv: Vec<u8>,
}

impl FracRow {
    pub fn lmost(&self) -> usize {
        self.lmost
    }

    pub fn len(&self) -> usize {
        self.us.len()
    }

    pub fn is_empty(&self) -> bool {
        self.us.is_empty()
    }
}

/// Precomputed per-row resampling tables for one camera.
pub struct Rectifier {
    in_width: usize,
    in_height: usize,
    out_width: usize,
    out_height: usize,
    fracs: Vec<FracRow>,
}

impl Rectifier {
    /// Build the tables for the transform `v ~ H u` with the camera's
    /// nonlinear distortion removed first; `h_tinv` is the transposed
    /// inverse of H. Source points are kept only when they lie at least one
    /// pixel inside the input.
    pub fn initialize(
        h_tinv: &Matrix3,
        intrinsic: &Intrinsic,
        in_width: usize,
        in_height: usize,
        out_width: usize,
        out_height: usize,
    ) -> Result<Self, RectifyError> {
        if in_width < 2 || in_height < 2 {
            return Err(RectifyError::Invalid(format!(
                "input size {}x{} too small to interpolate",
                in_width, in_height
            )));
        }
        if out_width == 0 || out_height == 0 {
            return Err(RectifyError::Invalid(format!(
                "invalid output size: {}x{}",
                out_width, out_height
            )));
        }

        let hk = mat_mul3(h_tinv, &intrinsic.k_tinv());
        let mut fracs = Vec::with_capacity(out_height);
        let mut leftmost = hk[2];
        for _v in 0..out_height {
            let mut frac = FracRow::default();
            let mut xc = leftmost;
            let mut started = false;
            for u in 0..out_width {
                let (x, y) = (xc[0] / xc[2], xc[1] / xc[2]);
                let (mu, mv) = intrinsic.project(x, y);
                let inside = mu >= 0.0
                    && mu <= (in_width - 2) as f64
                    && mv >= 0.0
                    && mv <= (in_height - 2) as f64;
                if inside {
                    if !started {
                        frac.lmost = u;
                        started = true;
                    }
                    let (ui, vi) = (mu.floor(), mv.floor());
                    frac.us.push(ui as i16);
                    frac.vs.push(vi as i16);
                    frac.du.push(((mu - ui) * 128.0).floor() as u8);
                    frac.dv.push(((mv - vi) * 128.0).floor() as u8);
                } else if started {
                    break;
                }
                xc[0] += hk[0][0];
                xc[1] += hk[0][1];
                xc[2] += hk[0][2];
            }
            fracs.push(frac);
            leftmost[0] += hk[1][0];
            leftmost[1] += hk[1][1];
            leftmost[2] += hk[1][2];
        }

        let tabulated: usize = fracs.iter().map(FracRow::len).sum();
        log::debug!(
            "rectify table {}x{} -> {}x{}: {} of {} pixels tabulated",
            in_width,
            in_height,
            out_width,
            out_height,
            tabulated,
            out_width * out_height
        );

        Ok(Self {
            in_width,
            in_height,
            out_width,
            out_height,
            fracs,
        })
    }

    pub fn width(&self) -> usize {
        self.out_width
    }

    pub fn height(&self) -> usize {
        self.out_height
    }

    /// Valid output span of row `v`.
    pub fn row_span(&self, v: usize) -> Range<usize> {
        let f = &self.fracs[v];
        f.lmost..f.lmost + f.len()
    }

    /// Resample `input` into `out`. `rows` restricts the output rows
    /// produced (the whole image when `None`) so callers can parallelize by
    /// band; columns outside the tabulated span are zeroed.
    pub fn apply<T, R>(
        &self,
        input: &R,
        out: &mut Image<T>,
        rows: Option<Range<usize>>,
    ) -> Result<(), RectifyError>
    where
        T: Interpolate,
        R: Raster<T>,
    {
        if input.width() != self.in_width || input.height() != self.in_height {
            return Err(RectifyError::Invalid(format!(
                "input size mismatch: got {}x{}, expect {}x{}",
                input.width(),
                input.height(),
                self.in_width,
                self.in_height
            )));
        }
        if out.width() != self.out_width || out.height() != self.out_height {
            *out = Image::new(self.out_width, self.out_height);
        }
        let rows = rows.unwrap_or(0..self.out_height);
        if rows.end > self.out_height {
            return Err(RectifyError::Invalid(format!(
                "row range {}..{} exceeds output height {}",
                rows.start, rows.end, self.out_height
            )));
        }

        for v in rows {
            let frac = &self.fracs[v];
            let dst = out.row_mut(v);
            dst.fill(T::default());
            let n = frac.len();
            let dst = &mut dst[frac.lmost..frac.lmost + n];
            let mut i = 0;
            // blocked so the fixed-trip inner loop vectorizes
            while i + INTERP_LANES <= n {
                for j in i..i + INTERP_LANES {
                    dst[j] = self.sample(input, frac, j);
                }
                i += INTERP_LANES;
            }
            while i < n {
                dst[i] = self.sample(input, frac, i);
                i += 1;
            }
        }
        Ok(())
    }

    #[inline]
    fn sample<T, R>(&self, input: &R, frac: &FracRow, j: usize) -> T
    where
        T: Interpolate,
        R: Raster<T>,
    {
        let us = frac.us[j] as usize;
        let vs = frac.vs[j] as usize;
        let top = input.row(vs);
        let bot = input.row(vs + 1);
        T::bilinear(
            top[us],
            top[us + 1],
            bot[us],
            bot[us + 1],
            frac.du[j],
            frac.dv[j],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intrinsic::IDENTITY3;

    fn ramp(width: usize, height: usize) -> Image<u8> {
        let mut img = Image::new(width, height);
        for v in 0..height {
            for u in 0..width {
                img.row_mut(v)[u] = (7 * v + 3 * u) as u8;
            }
        }
        img
    }

    #[test]
    fn test_identity_round_trip() {
        let input = ramp(16, 8);
        let rect =
            Rectifier::initialize(&IDENTITY3, &Intrinsic::default(), 16, 8, 16, 8).unwrap();
        let mut out = Image::new(16, 8);
        rect.apply(&input, &mut out, None).unwrap();
        for v in 0..7 {
            for u in 0..15 {
                assert_eq!(out.row(v)[u], input.row(v)[u], "({}, {})", u, v);
            }
            // the last column maps outside the one-pixel interior margin
            assert_eq!(out.row(v)[15], 0);
        }
    }

    #[test]
    fn test_half_pixel_shift_interpolates() {
        let mut input: Image<u8> = Image::new(8, 4);
        for v in 0..4 {
            for u in 0..8 {
                input.row_mut(v)[u] = (u * 20) as u8;
            }
        }
        // source = output + (0.5, 0)
        let h_tinv = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.0, 1.0]];
        let rect =
            Rectifier::initialize(&h_tinv, &Intrinsic::default(), 8, 4, 8, 4).unwrap();
        let mut out = Image::new(8, 4);
        rect.apply(&input, &mut out, None).unwrap();
        // du = 64: out = p0 + (64 * (p1 - p0)) >> 7 = midpoint
        assert_eq!(out.row(1)[2], 50);
    }

    #[test]
    fn test_float_path_uses_ieee() {
        let mut input: Image<f32> = Image::new(4, 4);
        for v in 0..4 {
            for u in 0..4 {
                input.row_mut(v)[u] = u as f32;
            }
        }
        let h_tinv = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.25, 0.0, 1.0]];
        let rect =
            Rectifier::initialize(&h_tinv, &Intrinsic::default(), 4, 4, 4, 4).unwrap();
        let mut out = Image::new(4, 4);
        rect.apply(&input, &mut out, None).unwrap();
        // du = 32 -> 0.25
        assert!((out.row(0)[1] - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_rgb_channels_independent() {
        let mut input: Image<Rgb24> = Image::new(4, 3);
        for v in 0..3 {
            for u in 0..4 {
                input.row_mut(v)[u] = Rgb24::new((40 * u) as u8, 0, (10 * v) as u8);
            }
        }
        let h_tinv = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.5, 0.0, 1.0]];
        let rect =
            Rectifier::initialize(&h_tinv, &Intrinsic::default(), 4, 3, 4, 3).unwrap();
        let mut out = Image::new(4, 3);
        rect.apply(&input, &mut out, None).unwrap();
        let p = out.row(1)[1];
        assert_eq!(p.r, 60); // midpoint of 40 and 80
        assert_eq!(p.g, 0);
        assert_eq!(p.b, 10);
    }

    #[test]
    fn test_row_range_limits_output() {
        let input = ramp(8, 6);
        let rect =
            Rectifier::initialize(&IDENTITY3, &Intrinsic::default(), 8, 6, 8, 6).unwrap();
        let mut out = Image::new(8, 6);
        rect.apply(&input, &mut out, Some(2..4)).unwrap();
        assert_eq!(out.row(0), &[0; 8]);
        assert_eq!(out.row(2)[3], input.row(2)[3]);
        assert_eq!(out.row(5), &[0; 8]);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let input = ramp(8, 6);
        let rect =
            Rectifier::initialize(&IDENTITY3, &Intrinsic::default(), 10, 6, 8, 6).unwrap();
        let mut out = Image::new(8, 6);
        assert!(rect.apply(&input, &mut out, None).is_err());
    }

    #[test]
    fn test_offsets_are_seven_bit() {
        let h_tinv = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.3, 0.7, 1.0]];
        let rect =
            Rectifier::initialize(&h_tinv, &Intrinsic::default(), 32, 32, 32, 32).unwrap();
        for v in 0..rect.height() {
            let f = &rect.fracs[v];
            for j in 0..f.len() {
                assert!(f.du[j] < 128);
                assert!(f.dv[j] < 128);
                assert!((f.us[j] as usize) < 31);
                assert!((f.vs[j] as usize) < 31);
            }
        }
    }
}
