//! SAD disparity engine
//!
//! Aggregates capped pixel differences over the square window with the
//! separable box filter. Per (row, search index) the column-sums row is
//! refilled from the window's horizontal sums, so the arithmetic of every
//! output row is independent of how the image was banded and results are
//! bitwise reproducible for any grain size. Cost arithmetic is integer
//! throughout.

use stereo_image::{Image, Raster};

use crate::boxfilter::{accumulate_row, box_filter_row, grow, Cost};
use crate::diff::{MatchPixel, PixelDiff};
use crate::error::{MatchError, Result};
use crate::params::Parameters;
use crate::pool::BufferPool;
use crate::scheduler::dispatch_rows;
use crate::tracker::{MatchTracker, VerticalTracker};

/// Scratch set of one SAD band worker.
#[derive(Default)]
pub struct SadScratch {
    diff: Vec<i32>,
    hsum: Vec<i32>,
    agg: Vec<i32>,
    prev: Vec<i32>,
    tracker: MatchTracker<i32>,
    vertical: VerticalTracker<i32>,
}

impl SadScratch {
    fn ensure(&mut self, width: usize, search_width: usize) -> Result<()> {
        grow(&mut self.diff, width, 0)?;
        grow(&mut self.hsum, width, 0)?;
        grow(&mut self.agg, width, 0)?;
        grow(&mut self.prev, width, 0)?;
        self.tracker.ensure(width, search_width)?;
        self.vertical.ensure(width, search_width)?;
        Ok(())
    }
}

pub struct SadEngine {
    params: Parameters,
}

impl SadEngine {
    pub fn new(params: Parameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn parameters(&self) -> &Parameters {
        &self.params
    }

    /// Binocular matching; disparity rows are written in place.
    pub fn compute<T, R>(
        &self,
        left: &R,
        right: &R,
        out: &mut Image<f32>,
        pool: &BufferPool<SadScratch>,
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        self.run(left, right, None, out, pool)
    }

    /// Trinocular matching with an additional image above the reference.
    pub fn compute_trinocular<T, R>(
        &self,
        left: &R,
        right: &R,
        top: &R,
        out: &mut Image<f32>,
        pool: &BufferPool<SadScratch>,
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
        pool: &BufferPool<SadScratch>,
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        let (width, height) = (left.width(), left.height());
        self.params.validate_for(width, height)?;
        check_dims(width, height, right)?;
        if let Some(top) = top {
            check_dims(width, height, top)?;
        }
        if out.width() != width || out.height() != height {
            *out = Image::new(width, height);
        }
        log::debug!(
            "SAD matching {}x{}, disparity {}..={}, window {}, {}",
            width,
            height,
            self.params.disparity_min(),
            self.params.disparity_max,
            self.params.window_size,
            if top.is_some() { "trinocular" } else { "binocular" },
        );
        dispatch_rows(out, self.params.grain_size, pool, |row0, scratch, band| {
            self.match_band(left, right, top, row0, scratch, band)
        })
    }

    fn match_band<T, R>(
        &self,
        left: &R,
        right: &R,
        top: Option<&R>,
        row0: usize,
        s: &mut SadScratch,
        band: &mut [&mut [f32]],
    ) -> Result<()>
    where
        T: MatchPixel,
        R: Raster<T>,
    {
        let p = &self.params;
        let (width, height) = (left.width(), left.height());
        let w = p.window_size;
        let half = w / 2;
        let ws = p.disparity_search_width;
        let dmax = p.disparity_max;
        let dmin = p.disparity_min();
        let tau = p.intensity_diff_max;

        s.ensure(width, ws)?;
        let vertical_active = p.do_vertical_back_match && top.is_some();
        if vertical_active {
            s.vertical.reset_all();
        }

        for (i, out_row) in band.iter_mut().enumerate() {
            let v = row0 + i;
            out_row.fill(0.0);
            if v < half || v + half >= height {
                continue;
            }
            // rows whose vertical partner would fall above the image are
            // matched binocularly
            let tri = top.filter(|_| v >= dmax + half);
            let vert = vertical_active && tri.is_some();
            if vert {
                s.vertical.reset_slot((v - dmin) % ws);
            }

            s.tracker.begin_row();
            s.prev[..width].fill(i32::SATURATED);
            for k in 0..ws {
                let disparity = dmax - k;
                s.agg[..width].fill(i32::SATURATED);
                if width >= disparity + w {
                    let span = disparity + half..width - half;
                    s.agg[span.clone()].fill(0);
                    let m = width - disparity - w + 1;
                    for r in v - half..=v + half {
                        let lrow = left.row(r);
                        let rrow = right.row(r);
                        match tri {
                            Some(top_img) => {
                                let trow = top_img.row(r - disparity);
                                for u in disparity..width {
                                    let d = PixelDiff::new(lrow[u], tau);
                                    s.diff[u] = d.diff2(rrow[u - disparity], trow[u]);
                                }
                            }
                            None => {
                                for u in disparity..width {
                                    let d = PixelDiff::new(lrow[u], tau);
                                    s.diff[u] = d.diff(rrow[u - disparity]);
                                }
                            }
                        }
                        box_filter_row(&s.diff[disparity..width], w, &mut s.hsum[..m]);
                        accumulate_row(&mut s.agg[span.clone()], &s.hsum[..m]);
                    }
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
            s.tracker.finalize_row(out_row, v, p, 0.0, vertical);
        }
        Ok(())
    }
}

pub(crate) fn check_dims<T, R: Raster<T>>(width: usize, height: usize, img: &R) -> Result<()> {
    if img.width() != width || img.height() != height {
        return Err(MatchError::Config(format!(
            "image size mismatch: got {}x{}, expect {}x{}",
            img.width(),
            img.height(),
            width,
            height
        )));
    }
    Ok(())
}
