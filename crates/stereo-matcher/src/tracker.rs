//! Running-minimum trackers for disparity selection
//!
//! One `MatchTracker` lives for the duration of a scanline. Aggregated
//! costs arrive once per search index in increasing order; ties keep the
//! first index seen. Alongside the forward minimum the tracker maintains
//! the right-column minima for the horizontal back match (keyed by
//! `column + index`, so one slot collects every pairing of a fixed right
//! column) and feeds the per-band `VerticalTracker` ring for the top-image
//! back match.
//!
//! With `BackMatchAlignment::OneStepBehind` the back trackers are updated
//! from the previous step's cost plane instead, reproducing the one-step
//! delay line of the classic formulation; the final step's costs then never
//! reach them.

use std::ops::Range;

use crate::boxfilter::{grow, Cost};
use crate::error::Result;
use crate::params::{BackMatchAlignment, Parameters};

/// Search-index sentinel for "no candidate seen".
pub const NO_MATCH: u32 = u32::MAX;

/// Per-column state for one scanline.
pub struct MatchTracker<C: Cost> {
    width: usize,
    search_width: usize,
    r_best: Vec<C>,
    k_best: Vec<u32>,
    /// Cost one step before the best (for the subpixel parabola).
    r_prev: Vec<C>,
    /// Cost one step after the best.
    r_next: Vec<C>,
    r_second: Vec<C>,
    k_second: Vec<u32>,
    /// Right-column minima, indexed by `column + index`.
    hor_r: Vec<C>,
    hor_k: Vec<u32>,
}

impl<C: Cost> Default for MatchTracker<C> {
    fn default() -> Self {
        Self {
            width: 0,
            search_width: 0,
            r_best: Vec::new(),
            k_best: Vec::new(),
            r_prev: Vec::new(),
            r_next: Vec::new(),
            r_second: Vec::new(),
            k_second: Vec::new(),
            hor_r: Vec::new(),
            hor_k: Vec::new(),
        }
    }
}

impl<C: Cost> MatchTracker<C> {
    pub fn ensure(&mut self, width: usize, search_width: usize) -> Result<()> {
        grow(&mut self.r_best, width, C::SATURATED)?;
        grow(&mut self.k_best, width, NO_MATCH)?;
        grow(&mut self.r_prev, width, C::SATURATED)?;
        grow(&mut self.r_next, width, C::SATURATED)?;
        grow(&mut self.r_second, width, C::SATURATED)?;
        grow(&mut self.k_second, width, NO_MATCH)?;
        grow(&mut self.hor_r, width + search_width, C::SATURATED)?;
        grow(&mut self.hor_k, width + search_width, NO_MATCH)?;
        self.width = width;
        self.search_width = search_width;
        Ok(())
    }

    /// Reset for a new scanline.
    pub fn begin_row(&mut self) {
        self.r_best.fill(C::SATURATED);
        self.k_best.fill(NO_MATCH);
        self.r_prev.fill(C::SATURATED);
        self.r_next.fill(C::SATURATED);
        self.r_second.fill(C::SATURATED);
        self.k_second.fill(NO_MATCH);
        self.hor_r.fill(C::SATURATED);
        self.hor_k.fill(NO_MATCH);
    }

    /// Present the aggregated costs of search index `k`. `costs` and
    /// `prev` are full-width planes holding `C::SATURATED` outside their
    /// valid spans; `span` is the valid span of `costs`.
    pub fn update_row(
        &mut self,
        k: u32,
        span: Range<usize>,
        costs: &[C],
        prev: &[C],
        align: BackMatchAlignment,
        do_horizontal: bool,
        mut vertical: Option<(&mut VerticalTracker<C>, usize)>,
    ) {
        for u in span.clone() {
            let r = costs[u];
            if self.k_best[u] != NO_MATCH && self.k_best[u] + 1 == k {
                self.r_next[u] = r;
            }
            if r < self.r_best[u] {
                self.r_second[u] = self.r_best[u];
                self.k_second[u] = self.k_best[u];
                self.r_prev[u] = prev[u];
                self.r_best[u] = r;
                self.k_best[u] = k;
                self.r_next[u] = C::SATURATED;
            } else if r < self.r_second[u] {
                self.r_second[u] = r;
                self.k_second[u] = k;
            }
        }

        // Back trackers observe either this step or, one step behind, the
        // previous plane attributed to the previous index.
        let (bk, plane) = match align {
            BackMatchAlignment::SameDisparity => (k, costs),
            BackMatchAlignment::OneStepBehind => {
                if k == 0 {
                    return;
                }
                (k - 1, prev)
            }
        };
        if do_horizontal {
            for u in span.clone() {
                let r = plane[u];
                let s = u + k as usize;
                if r < self.hor_r[s] {
                    self.hor_r[s] = r;
                    self.hor_k[s] = bk;
                }
            }
        }
        if let Some((vert, slot)) = vertical.as_mut() {
            vert.update(*slot, span, plane, bk);
        }
    }

    /// Emit the disparity of every column into `out` (one output row).
    /// `v` is the output row index, used to address the vertical ring.
    pub fn finalize_row(
        &self,
        out: &mut [f32],
        v: usize,
        params: &Parameters,
        blend: f32,
        vertical: Option<&VerticalTracker<C>>,
    ) {
        let tol = params.disparity_inconsistency as u32;
        for (u, slot) in out.iter_mut().enumerate().take(self.width) {
            let k = self.k_best[u];
            if k == NO_MATCH {
                *slot = 0.0;
                continue;
            }
            if params.do_horizontal_back_match {
                let kr = self.hor_k[u + k as usize];
                if kr == NO_MATCH || k.abs_diff(kr) > tol {
                    *slot = 0.0;
                    continue;
                }
            }
            if let Some(vert) = vertical {
                let disparity = params.disparity_max - k as usize;
                if v >= disparity {
                    let kv = vert.best_index((v - disparity) % self.search_width, u);
                    if kv == NO_MATCH || k.abs_diff(kv) > tol {
                        *slot = 0.0;
                        continue;
                    }
                }
            }
            let delta = parabolic_offset(self.r_prev[u], self.r_best[u], self.r_next[u]);
            let kf = if blend > 0.0 && self.k_second[u] != NO_MATCH {
                (1.0 - blend) * k as f32 + blend * self.k_second[u] as f32
            } else {
                k as f32
            };
            *slot = params.disparity_max as f32 - kf - delta;
        }
    }
}

/// Subpixel offset from the cost triple around the minimum; zero for
/// boundary or non-convex triples.
fn parabolic_offset<C: Cost>(r_prev: C, r_best: C, r_next: C) -> f32 {
    if !(r_prev < C::SATURATED) || !(r_next < C::SATURATED) {
        return 0.0;
    }
    let rm = r_prev.to_f32();
    let r0 = r_best.to_f32();
    let rp = r_next.to_f32();
    let denom = 2.0 * (rm - 2.0 * r0 + rp);
    if denom <= 0.0 {
        0.0
    } else {
        ((rm - rp) / denom).clamp(-0.5, 0.5)
    }
}

/// Top-image minima maintained across the rows of one band. Slot `t %
/// search_width` collects the candidates of top row `t`; a top row's slot
/// is reset when it enters the active window and read when forward matches
/// referencing it are emitted.
pub struct VerticalTracker<C: Cost> {
    width: usize,
    search_width: usize,
    r_min: Vec<C>,
    k_min: Vec<u32>,
}

impl<C: Cost> Default for VerticalTracker<C> {
    fn default() -> Self {
        Self {
            width: 0,
            search_width: 0,
            r_min: Vec::new(),
            k_min: Vec::new(),
        }
    }
}

impl<C: Cost> VerticalTracker<C> {
    pub fn ensure(&mut self, width: usize, search_width: usize) -> Result<()> {
        grow(&mut self.r_min, width * search_width, C::SATURATED)?;
        grow(&mut self.k_min, width * search_width, NO_MATCH)?;
        self.width = width;
        self.search_width = search_width;
        Ok(())
    }

    /// Band start: no top row has been observed yet.
    pub fn reset_all(&mut self) {
        self.r_min.fill(C::SATURATED);
        self.k_min.fill(NO_MATCH);
    }

    /// A new top row enters the active window.
    pub fn reset_slot(&mut self, slot: usize) {
        let base = slot * self.width;
        self.r_min[base..base + self.width].fill(C::SATURATED);
        self.k_min[base..base + self.width].fill(NO_MATCH);
    }

    fn update(&mut self, slot: usize, span: Range<usize>, costs: &[C], k: u32) {
        let base = slot * self.width;
        for u in span {
            let r = costs[u];
            if r < self.r_min[base + u] {
                self.r_min[base + u] = r;
                self.k_min[base + u] = k;
            }
        }
    }

    fn best_index(&self, slot: usize, u: usize) -> u32 {
        self.k_min[slot * self.width + u]
    }
}
