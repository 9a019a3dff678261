//! Warp a synthetic image through a small homography and report the valid
//! spans per row.

use anyhow::Result;
use stereo_image::{Image, Raster};
use stereo_rectifier::{Intrinsic, Rectifier};

fn main() -> Result<()> {
    env_logger::init();

    let (w, h) = (64usize, 48usize);
    let mut input: Image<u8> = Image::new(w, h);
    for v in 0..h {
        for u in 0..w {
            input.row_mut(v)[u] = ((u * 4) ^ (v * 4)) as u8;
        }
    }

    // mild shear with a half-pixel shift
    let h_tinv = [[1.0, 0.01, 0.0], [0.0, 1.0, 0.0], [0.5, 0.25, 1.0]];
    let intrinsic = Intrinsic {
        fx: 1.0,
        fy: 1.0,
        d1: 1e-6,
        ..Intrinsic::default()
    };

    let rect = Rectifier::initialize(&h_tinv, &intrinsic, w, h, w, h)?;
    let mut out: Image<u8> = Image::new(w, h);
    rect.apply(&input, &mut out, None)?;

    for v in (0..h).step_by(8) {
        let span = rect.row_span(v);
        if span.is_empty() {
            continue;
        }
        println!(
            "row {:2}: valid span {:?}, first pixel {}",
            v,
            span.clone(),
            out.row(v)[span.start]
        );
    }
    Ok(())
}
