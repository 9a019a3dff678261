//! Parallel row-band dispatch
//!
//! The output rows are split into bands of at most `grain_size` rows and
//! each band runs on a worker with a pooled scratch set. Workers write
//! only their own output rows; the inputs are shared read-only and the
//! engines read up to `window_size - 1` rows past a band's end, so no
//! cross-worker synchronization is needed beyond the pool lock.

use rayon::prelude::*;
use std::sync::Mutex;

use stereo_image::{Image, Raster};

use crate::error::{MatchError, Result};
use crate::pool::BufferPool;

/// Run `worker(first_row, scratch, band_rows)` over every band. The first
/// error reported by any band is propagated after all bands finish.
pub fn dispatch_rows<S, F>(
    out: &mut Image<f32>,
    grain_size: usize,
    pool: &BufferPool<S>,
    worker: F,
) -> Result<()>
where
    S: Default + Send,
    F: Fn(usize, &mut S, &mut [&mut [f32]]) -> Result<()> + Sync,
{
    let width = out.width();
    let stride = out.stride();
    let height = out.height();
    let mut rows: Vec<&mut [f32]> = out
        .data_mut()
        .chunks_mut(stride)
        .map(|r| &mut r[..width])
        .collect();
    debug_assert_eq!(rows.len(), height);

    log::debug!(
        "dispatching {} output rows in bands of <= {} rows",
        height,
        grain_size
    );

    let first_error: Mutex<Option<MatchError>> = Mutex::new(None);
    rows.par_chunks_mut(grain_size)
        .enumerate()
        .for_each(|(band, band_rows)| {
            let mut scratch = pool.acquire();
            if let Err(e) = worker(band * grain_size, &mut *scratch, band_rows) {
                // first error wins; later bands still run to completion
                let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                if slot.is_none() {
                    *slot = Some(e);
                }
            }
        });

    match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
