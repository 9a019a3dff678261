//! Rectify a synthetic stereo pair and compute its disparity map with both
//! engines, saving the SAD result as a float PBM.

use anyhow::Result;
use stereo_image::{save_float, Calibration, Image, Raster};
use stereo_matcher::{BufferPool, GfEngine, GfParameters, Parameters, SadEngine};
use stereo_rectifier::{Intrinsic, Rectifier, IDENTITY3};

fn main() -> Result<()> {
    env_logger::init();

    let (w, h) = (96usize, 72usize);
    let shift = 6usize;
    let mut left: Image<u8> = Image::new(w, h);
    let mut right: Image<u8> = Image::new(w, h);
    for v in 0..h {
        for u in 0..w {
            let texture = ((u * 13 + v * 7) % 61) as u8;
            left.row_mut(v)[u] = texture;
            right.row_mut(v)[u] = (((u + shift) * 13 + v * 7) % 61) as u8;
        }
    }

    // the inputs are already row-aligned, so rectification is the identity
    let rect = Rectifier::initialize(&IDENTITY3, &Intrinsic::default(), w, h, w, h)?;
    let mut rect_left = Image::new(w, h);
    let mut rect_right = Image::new(w, h);
    rect.apply(&left, &mut rect_left, None)?;
    rect.apply(&right, &mut rect_right, None)?;

    let params = Parameters {
        window_size: 7,
        disparity_search_width: 12,
        disparity_max: 12,
        do_vertical_back_match: false,
        grain_size: 16,
        ..Parameters::default()
    };

    let sad = SadEngine::new(params.clone())?;
    let pool = BufferPool::new();
    let mut disparity = Image::new(w, h);
    sad.compute(&rect_left, &rect_right, &mut disparity, &pool)?;
    report("SAD", &disparity, shift);

    let gf = GfEngine::new(GfParameters {
        matching: params,
        epsilon: 16.0,
        blend: 0.1,
    })?;
    let gf_pool = BufferPool::new();
    let mut gf_disparity = Image::new(w, h);
    gf.compute(&rect_left, &rect_right, &mut gf_disparity, &gf_pool)?;
    report("GF", &gf_disparity, shift);

    let mut file = std::fs::File::create("disparity.pbm")?;
    save_float(&mut file, &disparity, &Calibration::default())?;
    println!("saved disparity.pbm");
    Ok(())
}

fn report(name: &str, map: &Image<f32>, shift: usize) {
    let mut valid = 0usize;
    let mut correct = 0usize;
    for v in 0..map.height() {
        for &d in map.row(v) {
            if d != 0.0 {
                valid += 1;
                if (d - shift as f32).abs() <= 0.5 {
                    correct += 1;
                }
            }
        }
    }
    println!(
        "{}: {} valid pixels, {} within half a disparity of the truth",
        name, valid, correct
    );
}
