//! Dense disparity engine for rectified stereo rigs
//!
//! Consumes two (binocular) or three (trinocular) rectified images and
//! produces a float disparity map with subpixel refinement, optional
//! left/right and top/bottom consistency pruning, and bounded scratch
//! memory independent of image height. Aggregation is either plain window
//! sums (`SadEngine`) or guided smoothing against the reference image
//! (`GfEngine`); rows are processed in parallel bands drawing scratch sets
//! from a shared pool.
//!
//! A disparity of 0.0 marks "no match": the parameter contract keeps the
//! smallest searchable disparity at 1, so 0 is never a valid result.

pub mod boxfilter;
pub mod diff;
pub mod error;
pub mod gf;
pub mod guided;
pub mod params;
pub mod pool;
pub mod sad;
pub mod scheduler;
pub mod tracker;

pub use boxfilter::{accumulate_row, box_filter_row, Cost};
pub use diff::{MatchPixel, PixelDiff};
pub use error::{MatchError, Result};
pub use gf::{GfEngine, GfScratch};
pub use guided::GuidedFilter;
pub use params::{BackMatchAlignment, GfParameters, Parameters};
pub use pool::{BufferPool, PoolGuard};
pub use sad::{SadEngine, SadScratch};
pub use tracker::{MatchTracker, VerticalTracker, NO_MATCH};
