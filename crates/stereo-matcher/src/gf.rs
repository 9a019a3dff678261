//! Guided-filter disparity engine
//!
//! Same outer structure as the SAD engine, but the window aggregation is
//! replaced by guided smoothing of each cost plane with the reference
//! image as the guide, which keeps cost edges aligned with intensity
//! edges. Costs are float; the support of one output row is `2w - 1`
//! input rows, so valid rows and columns are narrower than the SAD
//! engine's by `w/2` on each side.

use stereo_image::{Image, Raster};

use crate::boxfilter::{grow, Cost};
use crate::diff::{MatchPixel, PixelDiff};
use crate::error::Result;
use crate::guided::GuidedRows;
use crate::params::GfParameters;
use crate::pool::BufferPool;
use crate::sad::check_dims;
use crate::scheduler::dispatch_rows;
use crate::tracker::{MatchTracker, VerticalTracker};

/// Scratch set of one guided-filter band worker.
#[derive(Default)]
pub struct GfScratch {
    rows: GuidedRows,
    agg: Vec<f32>,
    prev: Vec<f32>,
    tracker: MatchTracker<f32>,
    vertical: VerticalTracker<f32>,
}

impl GfScratch {
    fn ensure(&mut self, width: usize, search_width: usize, window: usize) -> Result<()> {
        self.rows.ensure(width, window)?;
        grow(&mut self.agg, width, 0.0)?;
        grow(&mut self.prev, width, 0.0)?;
        self.tracker.ensure(width, search_width)?;
        self.vertical.ensure(width, search_width)?;
        Ok(())
    }
}

pub struct GfEngine {
    params: GfParameters,
}

impl GfEngine {
    pub fn new(params: GfParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn parameters(&self) -> &GfParameters {
        &self.params
    }

    pub fn compute<T, R>(
        &self,
        left: &R,
        right: &R,
        out: &mut Image<f32>,
        pool: &BufferPool<GfScratch>,
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        self.run(left, right, None, out, pool)
    }

    pub fn compute_trinocular<T, R>(
        &self,
        left: &R,
        right: &R,
        top: &R,
        out: &mut Image<f32>,
        pool: &BufferPool<GfScratch>,
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        self.run(left, right, Some(top), out, pool)
    }

    fn run<T, R>(
        &self,
        left: &R,
        right: &R,
        top: Option<&R>,
        out: &mut Image<f32>,
        pool: &BufferPool<GfScratch>,
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        let (width, height) = (left.width(), left.height());
        let p = &self.params.matching;
        p.validate_for(width, height)?;
        check_dims(width, height, right)?;
        if let Some(top) = top {
            check_dims(width, height, top)?;
        }
        if out.width() != width || out.height() != height {
            *out = Image::new(width, height);
        }
        log::debug!(
            "GF matching {}x{}, disparity {}..={}, window {}, epsilon {}, blend {}",
            width,
            height,
            p.disparity_min(),
            p.disparity_max,
            p.window_size,
            self.params.epsilon,
            self.params.blend,
        );
        dispatch_rows(out, p.grain_size, pool, |row0, scratch, band| {
            self.match_band(left, right, top, row0, scratch, band)
        })
    }

    fn match_band<T, R>(
        &self,
        left: &R,
        right: &R,
        top: Option<&R>,
        row0: usize,
        s: &mut GfScratch,
        band: &mut [&mut [f32]],
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        let p = &self.params.matching;
        let (width, height) = (left.width(), left.height());
        let w = p.window_size;
        let ws = p.disparity_search_width;
        let dmax = p.disparity_max;
        let dmin = p.disparity_min();
        let tau = p.intensity_diff_max;
        let epsilon = self.params.epsilon;

        s.ensure(width, ws, w)?;
        let vertical_active = p.do_vertical_back_match && top.is_some();
        if vertical_active {
            s.vertical.reset_all();
        }

        for (i, out_row) in band.iter_mut().enumerate() {
            let v = row0 + i;
            out_row.fill(0.0);
            if v + 1 < w || v + w > height {
                continue;
            }
            // the full 2w-1 row support must have vertical partners
            let tri = top.filter(|_| v + 1 >= dmax + w);
            let vert = vertical_active && tri.is_some();
            if vert {
                s.vertical.reset_slot((v - dmin) % ws);
            }

            s.rows.load_guide(v, |r, buf| {
                for (dst, &px) in buf.iter_mut().zip(left.row(r)) {
                    *dst = px.luma();
                }
            });

            s.tracker.begin_row();
            s.prev[..width].fill(f32::SATURATED);
            for k in 0..ws {
                let disparity = dmax - k;
                s.agg[..width].fill(f32::SATURATED);
                let span = s.rows.smooth(
                    v,
                    disparity,
                    epsilon,
                    |r, buf| match tri {
                        Some(top_img) => {
                            let lrow = left.row(r);
                            let rrow = right.row(r);
                            let trow = top_img.row(r - disparity);
                            for u in disparity..width {
                                let d = PixelDiff::new(lrow[u], tau);
                                buf[u] = d.diff2(rrow[u - disparity], trow[u]) as f32;
                            }
                        }
                        None => {
                            let lrow = left.row(r);
                            let rrow = right.row(r);
                            for u in disparity..width {
                                let d = PixelDiff::new(lrow[u], tau);
                                buf[u] = d.diff(rrow[u - disparity]) as f32;
                            }
                        }
                    },
                    &mut s.agg[..width],
                );
                if !span.is_empty() {
                    let vertical = if vert {
                        Some((&mut s.vertical, (v - disparity) % ws))
                    } else {
                        None
                    };
                    s.tracker.update_row(
                        k as u32,
                        span,
                        &s.agg[..width],
                        &s.prev[..width],
                        p.back_match_alignment,
                        p.do_horizontal_back_match,
                        vertical,
                    );
                }
                std::mem::swap(&mut s.agg, &mut s.prev);
            }
            let vertical = if vert { Some(&s.vertical) } else { None };
            s.tracker
                .finalize_row(out_row, v, p, self.params.blend, vertical);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameters;

    fn textured_pair(width: usize, height: usize, shift: usize) -> (Image<u8>, Image<u8>) {
        let mut left: Image<u8> = Image::new(width, height);
        let mut right: Image<u8> = Image::new(width, height);
        for v in 0..height {
            for u in 0..width {
                left.row_mut(v)[u] = (u * 5) as u8;
                right.row_mut(v)[u] = ((u + shift) * 5) as u8;
            }
        }
        (left, right)
    }

    fn gf_params(window: usize, dmin: usize, dmax: usize) -> GfParameters {
        GfParameters {
            matching: Parameters {
                window_size: window,
                disparity_search_width: dmax - dmin + 1,
                disparity_max: dmax,
                intensity_diff_max: 4,
                do_horizontal_back_match: false,
                do_vertical_back_match: false,
                ..Parameters::default()
            },
            epsilon: 1.0,
            blend: 0.0,
        }
    }

    #[test]
    fn test_flat_disparity_plateau() {
        let (left, right) = textured_pair(32, 20, 4);
        let engine = GfEngine::new(gf_params(3, 1, 6)).unwrap();
        let pool = BufferPool::new();
        let mut out = Image::new(32, 20);
        engine.compute(&left, &right, &mut out, &pool).unwrap();
        // valid columns start at disparity + 2(w-1); coefficient math is
        // float, so allow rounding residue in the subpixel term
        for v in 4..16 {
            for u in 10..26 {
                assert!((out.row(v)[u] - 4.0).abs() < 1e-3, "({}, {})", u, v);
            }
        }
    }

    #[test]
    fn test_support_rows_zeroed() {
        let (left, right) = textured_pair(32, 20, 4);
        let engine = GfEngine::new(gf_params(5, 1, 6)).unwrap();
        let pool = BufferPool::new();
        let mut out = Image::new(32, 20);
        engine.compute(&left, &right, &mut out, &pool).unwrap();
        for v in [0, 1, 2, 3, 16, 17, 18, 19] {
            assert!(out.row(v).iter().all(|&x| x == 0.0), "row {}", v);
        }
    }

    #[test]
    fn test_constant_scene_matches_sad_selection() {
        // constant guide and constant cost planes degrade the filter to a
        // mean, so the selection equals the SAD engine's
        let left: Image<u8> = {
            let mut img = Image::new(24, 18);
            img.fill(100);
            img
        };
        let right = left.clone();
        let gf = GfEngine::new(gf_params(3, 1, 5)).unwrap();
        let sad = crate::sad::SadEngine::new(gf_params(3, 1, 5).matching).unwrap();
        let gf_pool = BufferPool::new();
        let sad_pool = BufferPool::new();
        let mut gf_out = Image::new(24, 18);
        let mut sad_out = Image::new(24, 18);
        gf.compute(&left, &right, &mut gf_out, &gf_pool).unwrap();
        sad.compute(&left, &right, &mut sad_out, &sad_pool).unwrap();
        // compare on the guided engine's (narrower) valid region
        for v in 2..16 {
            for u in 9..22 {
                assert_eq!(gf_out.row(v)[u], sad_out.row(v)[u], "({}, {})", u, v);
            }
        }
    }

    #[test]
    fn test_blend_shifts_toward_second_best() {
        let (left, right) = textured_pair(32, 20, 4);
        let mut p = gf_params(3, 1, 6);
        p.blend = 0.3;
        let plain = GfEngine::new(gf_params(3, 1, 6)).unwrap();
        let blended = GfEngine::new(p).unwrap();
        let pool_a = BufferPool::new();
        let pool_b = BufferPool::new();
        let mut out_a = Image::new(32, 20);
        let mut out_b = Image::new(32, 20);
        plain.compute(&left, &right, &mut out_a, &pool_a).unwrap();
        blended.compute(&left, &right, &mut out_b, &pool_b).unwrap();
        // the blended map differs where a second-best hypothesis exists
        let mut differs = false;
        for v in 4..16 {
            for u in 10..26 {
                if (out_a.row(v)[u] - out_b.row(v)[u]).abs() > 1e-3 {
                    differs = true;
                }
            }
        }
        assert!(differs);
    }
}
