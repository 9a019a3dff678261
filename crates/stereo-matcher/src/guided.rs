//! Edge-preserving guided cost smoother
//!
//! Within each window the cost plane C is fit against the guide G by
//! `a = (E[GC] - muG muC) / (Var G + eps)`, `b = muC - a muG`; the smoothed
//! value at a pixel is the window mean of `a G + b`. Both stages are box
//! sums, so the full support of one output row is `2w - 1` input rows and
//! nothing wider than a handful of row buffers is ever materialized.
//!
//! `GuidedRows` holds those buffers and smooths one output row at a time;
//! `GuidedFilter::filter_plane` drives it over a whole plane.

use std::ops::Range;

use crate::boxfilter::{accumulate_row, box_filter_row, grow};
use crate::error::Result;

fn grow_f32(buf: &mut Vec<f32>, len: usize) -> Result<()> {
    grow(buf, len, 0.0)
}

/// Row buffers for guided smoothing of one output row.
#[derive(Default)]
pub struct GuidedRows {
    width: usize,
    window: usize,
    guide: Vec<f32>,
    g_h: Vec<f32>,
    gg_h: Vec<f32>,
    c_h: Vec<f32>,
    gc_h: Vec<f32>,
    sg: Vec<f32>,
    sgg: Vec<f32>,
    cost: Vec<f32>,
    prod: Vec<f32>,
    sc: Vec<f32>,
    sgc: Vec<f32>,
    a_row: Vec<f32>,
    b_row: Vec<f32>,
    asum: Vec<f32>,
    bsum: Vec<f32>,
}

impl GuidedRows {
    pub fn ensure(&mut self, width: usize, window: usize) -> Result<()> {
        let support = 2 * window - 1;
        grow_f32(&mut self.guide, support * width)?;
        grow_f32(&mut self.g_h, support * width)?;
        grow_f32(&mut self.gg_h, support * width)?;
        grow_f32(&mut self.c_h, support * width)?;
        grow_f32(&mut self.gc_h, support * width)?;
        grow_f32(&mut self.sg, window * width)?;
        grow_f32(&mut self.sgg, window * width)?;
        for buf in [
            &mut self.cost,
            &mut self.prod,
            &mut self.sc,
            &mut self.sgc,
            &mut self.a_row,
            &mut self.b_row,
            &mut self.asum,
            &mut self.bsum,
        ] {
            grow_f32(buf, width)?;
        }
        self.width = width;
        self.window = window;
        Ok(())
    }

    /// Number of input rows feeding one output row.
    pub fn support(window: usize) -> usize {
        2 * window - 1
    }

    /// Load the guide rows supporting output row `v` and precompute their
    /// window statistics (shared by every disparity step of the row).
    /// `fill` writes the guide luminance of an absolute input row.
    pub fn load_guide<F: FnMut(usize, &mut [f32])>(&mut self, v: usize, mut fill: F) {
        let (w, width) = (self.window, self.width);
        let half = w / 2;
        let support = Self::support(w);

        for idx in 0..support {
            let r = v + idx + 1 - w;
            fill(r, &mut self.guide[idx * width..][..width]);
        }
        let m = width - w + 1;
        for idx in 0..support {
            let base = idx * width;
            box_filter_row(
                &self.guide[base..base + width],
                w,
                &mut self.g_h[base + half..][..m],
            );
            for i in 0..width {
                self.cost[i] = self.guide[base + i] * self.guide[base + i];
            }
            box_filter_row(&self.cost[..width], w, &mut self.gg_h[base + half..][..m]);
        }
        // window sums per coefficient row, refilled so the arithmetic is
        // identical however the image was banded
        let centers = half..width - half;
        for t in 0..w {
            self.sg[t * width..][..width].fill(0.0);
            self.sgg[t * width..][..width].fill(0.0);
            for idx in t..t + w {
                let (sg_row, g_row) = (&mut self.sg[t * width..][..width], &self.g_h);
                accumulate_row(
                    &mut sg_row[centers.clone()],
                    &g_row[idx * width + centers.start..idx * width + centers.end],
                );
                let (sgg_row, gg_row) = (&mut self.sgg[t * width..][..width], &self.gg_h);
                accumulate_row(
                    &mut sgg_row[centers.clone()],
                    &gg_row[idx * width + centers.start..idx * width + centers.end],
                );
            }
        }
    }

    /// Smooth the cost plane of one (row, disparity) pair. `fill_cost`
    /// writes the raw cost of an absolute input row, valid from column
    /// `c0`; smoothed values are written to `out` on
    /// `[c0 + w - 1, width - w + 1)` and the rest of `out` is untouched.
    pub fn smooth<F: FnMut(usize, &mut [f32])>(
        &mut self,
        v: usize,
        c0: usize,
        epsilon: f32,
        mut fill_cost: F,
        out: &mut [f32],
    ) -> Range<usize> {
        let (w, width) = (self.window, self.width);
        let half = w / 2;
        let support = Self::support(w);
        let n = (w * w) as f32;
        let out_span = c0 + w - 1..width + 1 - w;
        if width < c0 + support {
            return out_span.start..out_span.start;
        }

        let m = width - c0 - w + 1;
        for idx in 0..support {
            let r = v + idx + 1 - w;
            fill_cost(r, &mut self.cost[..width]);
            let base = idx * width;
            for i in c0..width {
                self.prod[i] = self.guide[base + i] * self.cost[i];
            }
            box_filter_row(
                &self.cost[c0..width],
                w,
                &mut self.c_h[base + c0 + half..][..m],
            );
            box_filter_row(
                &self.prod[c0..width],
                w,
                &mut self.gc_h[base + c0 + half..][..m],
            );
        }

        self.asum[..width].fill(0.0);
        self.bsum[..width].fill(0.0);
        let centers = c0 + half..width - half;
        let m2 = centers.len() - w + 1;
        for t in 0..w {
            self.sc[..width].fill(0.0);
            self.sgc[..width].fill(0.0);
            for idx in t..t + w {
                accumulate_row(
                    &mut self.sc[centers.clone()],
                    &self.c_h[idx * width + centers.start..idx * width + centers.end],
                );
                accumulate_row(
                    &mut self.sgc[centers.clone()],
                    &self.gc_h[idx * width + centers.start..idx * width + centers.end],
                );
            }
            for u in centers.clone() {
                let s_g = self.sg[t * width + u];
                let s_gg = self.sgg[t * width + u];
                let mu_g = s_g / n;
                let var_g = (s_gg / n - mu_g * mu_g).max(0.0);
                let num = self.sgc[u] / n - mu_g * (self.sc[u] / n);
                let denom = var_g + epsilon;
                let a = if denom > 0.0 { num / denom } else { 0.0 };
                self.a_row[u] = a;
                self.b_row[u] = (self.sc[u] - a * s_g) / n;
            }
            box_filter_row(
                &self.a_row[centers.clone()],
                w,
                &mut self.cost[centers.start + half..][..m2],
            );
            accumulate_row(
                &mut self.asum[out_span.clone()],
                &self.cost[out_span.clone()],
            );
            box_filter_row(
                &self.b_row[centers.clone()],
                w,
                &mut self.prod[centers.start + half..][..m2],
            );
            accumulate_row(
                &mut self.bsum[out_span.clone()],
                &self.prod[out_span.clone()],
            );
        }

        let center_guide = &self.guide[(w - 1) * width..][..width];
        for u in out_span.clone() {
            out[u] = (self.asum[u] * center_guide[u] + self.bsum[u]) / n;
        }
        out_span
    }
}

/// Whole-plane guided filter, for callers outside the matching loop.
pub struct GuidedFilter {
    pub window: usize,
    pub epsilon: f32,
}

impl GuidedFilter {
    pub fn new(window: usize, epsilon: f32) -> Self {
        Self { window, epsilon }
    }

    /// Smooth `cost` under `guide` (same dimensions). Rows and columns
    /// without full support are zero.
    pub fn filter_plane(
        &self,
        guide: &stereo_image::Image<f32>,
        cost: &stereo_image::Image<f32>,
    ) -> Result<stereo_image::Image<f32>> {
        use stereo_image::Raster;

        let (width, height) = (guide.width(), guide.height());
        let w = self.window;
        let mut rows = GuidedRows::default();
        rows.ensure(width, w)?;
        let mut out = stereo_image::Image::new(width, height);
        if height < 2 * w - 1 || width < 2 * w - 1 {
            return Ok(out);
        }
        for v in w - 1..height + 1 - w {
            rows.load_guide(v, |r, buf| buf.copy_from_slice(guide.row(r)));
            rows.smooth(
                v,
                0,
                self.epsilon,
                |r, buf| buf.copy_from_slice(cost.row(r)),
                out.row_mut(v),
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_image::{Image, Raster};

    fn plane(width: usize, height: usize, f: impl Fn(usize, usize) -> f32) -> Image<f32> {
        let mut img = Image::new(width, height);
        for v in 0..height {
            for u in 0..width {
                img.row_mut(v)[u] = f(u, v);
            }
        }
        img
    }

    #[test]
    fn test_constant_guide_and_cost_is_identity() {
        let guide = plane(16, 12, |_, _| 50.0);
        let cost = plane(16, 12, |_, _| 7.5);
        let out = GuidedFilter::new(3, 4.0).filter_plane(&guide, &cost).unwrap();
        for v in 2..10 {
            for u in 2..14 {
                assert!((out.row(v)[u] - 7.5).abs() < 1e-4, "({}, {})", u, v);
            }
        }
    }

    #[test]
    fn test_constant_guide_degenerates_to_mean_cascade() {
        // a = 0 everywhere, so the output is the window mean of the window
        // means of the cost
        let w = 3usize;
        let guide = plane(14, 10, |_, _| 100.0);
        let cost = plane(14, 10, |u, v| (u * 3 + v * 5) as f32);
        let out = GuidedFilter::new(w, 1.0).filter_plane(&guide, &cost).unwrap();
        let n = (w * w) as f32;
        let mean = |img: &Image<f32>, u: usize, v: usize| {
            let mut s = 0.0;
            for dv in 0..w {
                for du in 0..w {
                    s += img.row(v + dv - 1)[u + du - 1];
                }
            }
            s / n
        };
        for v in 2..8 {
            for u in 2..12 {
                let mut s = 0.0;
                for dv in 0..w {
                    for du in 0..w {
                        s += mean(&cost, u + du - 1, v + dv - 1);
                    }
                }
                let expect = s / n;
                assert!(
                    (out.row(v)[u] - expect).abs() < 1e-3,
                    "({}, {}): {} vs {}",
                    u,
                    v,
                    out.row(v)[u],
                    expect
                );
            }
        }
    }

    #[test]
    fn test_cost_following_guide_is_preserved() {
        // when C == G and every window has variance, a == 1 and b == 0, so
        // the filter reproduces the input instead of blurring it
        let img = plane(16, 12, |u, v| (u * 7 + v * 3) as f32);
        let out = GuidedFilter::new(3, 0.0).filter_plane(&img, &img).unwrap();
        for v in 2..10 {
            for u in 2..14 {
                assert!(
                    (out.row(v)[u] - img.row(v)[u]).abs() < 1e-2,
                    "({}, {}): {} vs {}",
                    u,
                    v,
                    out.row(v)[u],
                    img.row(v)[u]
                );
            }
        }
    }

    #[test]
    fn test_unsupported_border_stays_zero() {
        let guide = plane(10, 8, |_, _| 1.0);
        let cost = plane(10, 8, |_, _| 5.0);
        let out = GuidedFilter::new(3, 1.0).filter_plane(&guide, &cost).unwrap();
        for u in 0..10 {
            assert_eq!(out.row(0)[u], 0.0);
            assert_eq!(out.row(1)[u], 0.0);
            assert_eq!(out.row(6)[u], 0.0);
            assert_eq!(out.row(7)[u], 0.0);
        }
        for v in 0..8 {
            assert_eq!(out.row(v)[0], 0.0);
            assert_eq!(out.row(v)[9], 0.0);
        }
    }
}
