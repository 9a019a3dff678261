//! PBM and BMP file subsets
//!
//! Rectified images and disparity maps travel as PBM P5/P6 with `# Key:
//! Value` comment lines carrying the pixel data type, endianness and the
//! pinhole calibration of the source camera. A small uncompressed BMP
//! subset (8-bit indexed, 24-bit BGR, 32-bit BGRA) is accepted for raw
//! captures.

use std::io::{BufRead, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::ImageError;
use crate::image::{Image, Raster};
use crate::pixel::{
    yuv411_row_to_rgb, yuv422_row_to_rgb, yuyv422_row_to_rgb, Luma, Rgb24, Yuv411, Yuv422, Yuv444,
    Yuyv422,
};

/// Pixel data type named by the `DataType:` header key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Char,
    Short,
    Int,
    Float,
    Double,
    Yuv444,
    Yuv422,
    Yuyv422,
    Yuv411,
    Rgb24,
    Bmp8,
    Bmp24,
    Bmp32,
}

impl DataType {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "Char" => Self::Char,
            "Short" => Self::Short,
            "Int" => Self::Int,
            "Float" => Self::Float,
            "Double" => Self::Double,
            "YUV444" => Self::Yuv444,
            "YUV422" => Self::Yuv422,
            "YUYV422" => Self::Yuyv422,
            "YUV411" => Self::Yuv411,
            "RGB24" => Self::Rgb24,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Self::Char => "Char",
            Self::Short => "Short",
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::Yuv444 => "YUV444",
            Self::Yuv422 => "YUV422",
            Self::Yuyv422 => "YUYV422",
            Self::Yuv411 => "YUV411",
            Self::Rgb24 => "RGB24",
            Self::Bmp8 => "BMP8",
            Self::Bmp24 => "BMP24",
            Self::Bmp32 => "BMP32",
        }
    }

    fn is_multi_byte(self) -> bool {
        matches!(self, Self::Short | Self::Int | Self::Float | Self::Double)
    }
}

/// Pinhole projection and radial distortion read from the comment header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// 3x4 projection matrix (`PinHoleParameterHij`).
    pub p: [[f64; 4]; 3],
    /// Second-order radial distortion.
    pub d1: f64,
    /// Fourth-order radial distortion.
    pub d2: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            p: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
            ],
            d1: 0.0,
            d2: 0.0,
        }
    }
}

impl Calibration {
    /// Focal-length scalar recovered from the projection matrix, used to
    /// convert the legacy distortion representation. The leading 3x3 block
    /// with the two focal rows halved is fitted by its closest rotation,
    /// and k is the ratio of those rows' overlap with the rotation to the
    /// third row's, so unequal row scales (fx != fy) blend into one value.
    /// `None` when the block is singular or no proper rotation fits it.
    pub fn focal(&self) -> Option<f64> {
        let mut nt = [[0.0f64; 3]; 3];
        for (row, prow) in nt.iter_mut().zip(&self.p) {
            row.copy_from_slice(&prow[..3]);
        }
        for j in 0..3 {
            nt[0][j] *= 0.5;
            nt[1][j] *= 0.5;
        }
        let rot = closest_rotation(&nt)?;
        let p = dot3(rot[0], nt[0]) + dot3(rot[1], nt[1]);
        let q = dot3(rot[2], nt[2]);
        Some(p / q)
    }
}

fn dot3(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Eigen-decomposition of a symmetric 3x3 by cyclic Jacobi rotations;
/// returns the eigenvalues and the matrix whose columns are eigenvectors.
fn jacobi_eigen(mut a: [[f64; 3]; 3]) -> ([f64; 3], [[f64; 3]; 3]) {
    let mut v = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    for _ in 0..64 {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        if off <= 1e-30 {
            break;
        }
        for &(p, q) in &[(0usize, 1usize), (0, 2), (1, 2)] {
            let apq = a[p][q];
            if apq == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;
            for k in 0..3 {
                let akp = a[k][p];
                let akq = a[k][q];
                a[k][p] = c * akp - s * akq;
                a[k][q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let apk = a[p][k];
                let aqk = a[q][k];
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for k in 0..3 {
                let vkp = v[k][p];
                let vkq = v[k][q];
                v[k][p] = c * vkp - s * vkq;
                v[k][q] = s * vkp + c * vkq;
            }
        }
    }
    ([a[0][0], a[1][1], a[2][2]], v)
}

/// Closest rotation to `n` in the least-squares sense, via the polar
/// factor `n (n^T n)^{-1/2}`. `None` for singular input or when only an
/// improper (reflecting) fit exists.
fn closest_rotation(n: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let mut ntn = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for row in n {
                ntn[i][j] += row[i] * row[j];
            }
        }
    }
    let (vals, vecs) = jacobi_eigen(ntn);
    let largest = vals.iter().cloned().fold(0.0f64, f64::max);
    if !vals.iter().all(|&x| x > largest * 1e-12) {
        return None;
    }
    let mut inv_sqrt = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                inv_sqrt[i][j] += vecs[i][k] * vecs[j][k] / vals[k].sqrt();
            }
        }
    }
    let mut rot = [[0.0f64; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                rot[i][j] += n[i][k] * inv_sqrt[k][j];
            }
        }
    }
    if det3(&rot) <= 0.0 {
        return None;
    }
    Some(rot)
}

#[derive(Debug, Clone)]
enum HeaderKind {
    Pbm,
    Bmp { bottom_up: bool, palette: Vec<Rgb24> },
}

/// Parsed file header, PBM or BMP.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    pub width: usize,
    pub height: usize,
    pub data_type: DataType,
    pub calib: Calibration,
    kind: HeaderKind,
}

fn read_byte<R: Read>(r: &mut R) -> Result<u8, ImageError> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

fn read_u16_le<R: Read>(r: &mut R) -> Result<u16, ImageError> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32_le<R: Read>(r: &mut R) -> Result<u32, ImageError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

fn read_line_string<R: BufRead>(r: &mut R) -> Result<String, ImageError> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Err(ImageError::Format("unexpected end of header".into()));
    }
    Ok(line)
}

/// Read a PBM or BMP header, leaving the reader at the first payload byte.
pub fn restore_header<R: BufRead>(r: &mut R) -> Result<ImageHeader, ImageError> {
    match read_byte(r)? {
        b'P' => restore_pbm_header(r),
        b'B' => restore_bmp_header(r),
        c => Err(ImageError::Format(format!(
            "neither PBM nor BMP file (magic byte 0x{:02x})",
            c
        ))),
    }
}

fn restore_pbm_header<R: BufRead>(r: &mut R) -> Result<ImageHeader, ImageError> {
    let mut data_type = match read_byte(r)? {
        b'5' => DataType::Char,
        b'6' => DataType::Rgb24,
        c => {
            return Err(ImageError::Format(format!(
                "unknown pbm type P{}",
                c as char
            )))
        }
    };
    read_line_string(r)?; // rest of the magic line

    let mut calib = Calibration::default();
    let mut endian: Option<String> = None;
    let mut legacy = false; // legacy style of dist. param. representation

    loop {
        let peek = r.fill_buf()?;
        if peek.first() != Some(&b'#') {
            break;
        }
        let line = read_line_string(r)?;
        let mut it = line.trim_start_matches('#').split_whitespace();
        let key = match it.next() {
            Some(k) => k,
            None => continue,
        };
        let val = it.next().unwrap_or("");
        if key == "DataType:" {
            if let Some(t) = DataType::parse(val) {
                data_type = t;
            }
        } else if key == "Endian:" {
            endian = Some(val.to_string());
        } else if let Some(ij) = key
            .strip_prefix("PinHoleParameterH")
            .and_then(|s| s.strip_suffix(':'))
        {
            let mut chars = ij.chars();
            let (i, j) = match (chars.next(), chars.next()) {
                (Some(i), Some(j)) if chars.next().is_none() => (i, j),
                _ => continue,
            };
            let (i, j) = match (i.to_digit(10), j.to_digit(10)) {
                (Some(i), Some(j)) if (1..=3).contains(&i) && (1..=4).contains(&j) => {
                    (i as usize - 1, j as usize - 1)
                }
                _ => continue,
            };
            calib.p[i][j] = parse_f64(val)?;
        } else if key == "DistortionParameterD1:" {
            calib.d1 = parse_f64(val)?;
        } else if key == "DistortionParameterD2:" {
            calib.d2 = parse_f64(val)?;
        } else if key == "DistortionParameterA:" {
            calib.d1 = parse_f64(val)?;
            legacy = true;
        } else if key == "DistortionParameterB:" {
            calib.d2 = parse_f64(val)?;
            legacy = true;
        }
    }

    if legacy {
        let k = calib.focal().ok_or_else(|| {
            ImageError::Format(
                "cannot extract camera rotation from legacy calibration header".into(),
            )
        })?;
        calib.d1 *= k * k;
        calib.d2 *= k * k * k * k;
    }

    if data_type.is_multi_byte() {
        let host = if cfg!(target_endian = "big") {
            "Big"
        } else {
            "Little"
        };
        if let Some(e) = &endian {
            if e != host {
                return Err(ImageError::Format(format!(
                    "{} endian data is not supported on this host",
                    e
                )));
            }
        }
    }

    let dims = read_line_string(r)?;
    let mut it = dims.split_whitespace();
    let width: usize = it
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ImageError::Format("missing image width".into()))?;
    let height: usize = it
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ImageError::Format("missing image height".into()))?;
    read_line_string(r)?; // MaxValue

    Ok(ImageHeader {
        width,
        height,
        data_type,
        calib,
        kind: HeaderKind::Pbm,
    })
}

fn parse_f64(s: &str) -> Result<f64, ImageError> {
    s.parse()
        .map_err(|_| ImageError::Format(format!("invalid number '{}'", s)))
}

fn restore_bmp_header<R: BufRead>(r: &mut R) -> Result<ImageHeader, ImageError> {
    if read_byte(r)? != b'M' {
        return Err(ImageError::Format("not a BMP file".into()));
    }
    read_u32_le(r)?; // bfSize
    read_u16_le(r)?; // bfReserved1
    read_u16_le(r)?; // bfReserved2
    let off_bits = read_u32_le(r)? as usize;

    let info_size = read_u32_le(r)?;
    let mut consumed = 14 + 4;
    let (width, height, depth, bottom_up, mut ncolors, core) = match info_size {
        12 => {
            let w = read_u16_le(r)? as usize;
            let h = read_u16_le(r)? as i32;
            read_u16_le(r)?; // bcPlanes
            let d = read_u16_le(r)?;
            consumed += 8;
            let ncolors = if d <= 8 { 1usize << d } else { 0 };
            (w, h, d, h > 0, ncolors, true)
        }
        40 => {
            let w = read_u32_le(r)? as i32;
            let h = read_u32_le(r)? as i32;
            read_u16_le(r)?; // biPlanes
            let d = read_u16_le(r)?;
            if read_u32_le(r)? != 0 {
                return Err(ImageError::Format(
                    "compressed BMP file not supported".into(),
                ));
            }
            read_u32_le(r)?; // biSizeImage
            read_u32_le(r)?; // biXPixPerMeter
            read_u32_le(r)?; // biYPixPerMeter
            let mut ncolors = read_u32_le(r)? as usize;
            read_u32_le(r)?; // biClrImportant
            consumed += 36;
            if ncolors == 0 && d <= 8 {
                ncolors = 1usize << d;
            }
            (w as usize, h, d, h > 0, ncolors, false)
        }
        _ => {
            return Err(ImageError::Format(
                "BMP information header corrupted".into(),
            ))
        }
    };
    let height_abs = height.unsigned_abs() as usize;

    let data_type = match depth {
        8 => DataType::Bmp8,
        24 => DataType::Bmp24,
        32 => DataType::Bmp32,
        d => {
            return Err(ImageError::Format(format!(
                "unsupported BMP depth {} bits",
                d
            )))
        }
    };
    if data_type != DataType::Bmp8 {
        ncolors = 0;
    }

    let mut palette = Vec::with_capacity(ncolors);
    for _ in 0..ncolors {
        let b = read_byte(r)?;
        let g = read_byte(r)?;
        let rr = read_byte(r)?;
        if !core {
            read_byte(r)?; // reserved
            consumed += 4;
        } else {
            consumed += 3;
        }
        palette.push(Rgb24::new(rr, g, b));
    }

    // Honor bfOffBits: some writers leave a gap before the pixel rows.
    if off_bits > consumed {
        let mut gap = vec![0u8; off_bits - consumed];
        r.read_exact(&mut gap)?;
    }

    Ok(ImageHeader {
        width,
        height: height_abs,
        data_type,
        calib: Calibration::default(),
        kind: HeaderKind::Bmp { bottom_up, palette },
    })
}

fn read_payload<R: Read>(r: &mut R, n: usize) -> Result<Vec<u8>, ImageError> {
    let mut buf = vec![0u8; n];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn bmp_row_order(header: &ImageHeader) -> (bool, &[Rgb24]) {
    match &header.kind {
        HeaderKind::Bmp { bottom_up, palette } => (*bottom_up, palette),
        HeaderKind::Pbm => (false, &[]),
    }
}

/// Restore any supported file as a grayscale image.
pub fn restore_gray<R: BufRead>(r: &mut R) -> Result<(Image<u8>, Calibration), ImageError> {
    let header = restore_header(r)?;
    let (rgb, calib) = restore_rgb_with_header(r, header)?;
    let mut out = Image::new(rgb.width(), rgb.height());
    for v in 0..rgb.height() {
        let src = rgb.row(v);
        for (dst, &p) in out.row_mut(v).iter_mut().zip(src) {
            *dst = p.luma();
        }
    }
    Ok((out, calib))
}

/// Restore any supported file as an RGB image.
pub fn restore_rgb<R: BufRead>(r: &mut R) -> Result<(Image<Rgb24>, Calibration), ImageError> {
    let header = restore_header(r)?;
    restore_rgb_with_header(r, header)
}

fn restore_rgb_with_header<R: BufRead>(
    r: &mut R,
    header: ImageHeader,
) -> Result<(Image<Rgb24>, Calibration), ImageError> {
    let (w, h) = (header.width, header.height);
    let mut out = Image::new(w, h);
    match header.data_type {
        DataType::Char => {
            let raw = read_payload(r, w * h)?;
            for v in 0..h {
                for (dst, &g) in out.row_mut(v).iter_mut().zip(&raw[v * w..v * w + w]) {
                    *dst = Rgb24::gray(g);
                }
            }
        }
        DataType::Rgb24 => {
            let raw = read_payload(r, 3 * w * h)?;
            for v in 0..h {
                let row = &raw[3 * v * w..3 * (v + 1) * w];
                for (dst, c) in out.row_mut(v).iter_mut().zip(row.chunks_exact(3)) {
                    *dst = Rgb24::new(c[0], c[1], c[2]);
                }
            }
        }
        DataType::Yuv444 => {
            let raw = read_payload(r, 3 * w * h)?;
            for v in 0..h {
                let row = &raw[3 * v * w..3 * (v + 1) * w];
                for (dst, c) in out.row_mut(v).iter_mut().zip(row.chunks_exact(3)) {
                    let p = Yuv444 {
                        u: c[0],
                        y: c[1],
                        v: c[2],
                    };
                    *dst = Rgb24::from(p);
                }
            }
        }
        DataType::Yuv422 => {
            let raw = read_payload(r, 2 * w * h)?;
            let mut row_px = vec![Yuv422::default(); w];
            for v in 0..h {
                let row = &raw[2 * v * w..2 * (v + 1) * w];
                for (px, c) in row_px.iter_mut().zip(row.chunks_exact(2)) {
                    *px = Yuv422 { x: c[0], y: c[1] };
                }
                yuv422_row_to_rgb(&row_px, out.row_mut(v));
            }
        }
        DataType::Yuyv422 => {
            let raw = read_payload(r, 2 * w * h)?;
            let mut row_px = vec![Yuyv422::default(); w];
            for v in 0..h {
                let row = &raw[2 * v * w..2 * (v + 1) * w];
                for (px, c) in row_px.iter_mut().zip(row.chunks_exact(2)) {
                    *px = Yuyv422 { y: c[0], x: c[1] };
                }
                yuyv422_row_to_rgb(&row_px, out.row_mut(v));
            }
        }
        DataType::Yuv411 => {
            if w % 2 != 0 {
                return Err(ImageError::Format(
                    "YUV411 image width must be even".into(),
                ));
            }
            let cells = w / 2;
            let raw = read_payload(r, 3 * cells * h)?;
            let mut row_px = vec![Yuv411::default(); cells];
            for v in 0..h {
                let row = &raw[3 * v * cells..3 * (v + 1) * cells];
                for (px, c) in row_px.iter_mut().zip(row.chunks_exact(3)) {
                    *px = Yuv411 {
                        x: c[0],
                        y0: c[1],
                        y1: c[2],
                    };
                }
                yuv411_row_to_rgb(&row_px, out.row_mut(v));
            }
        }
        DataType::Bmp8 | DataType::Bmp24 | DataType::Bmp32 => {
            let bpp = match header.data_type {
                DataType::Bmp8 => 1,
                DataType::Bmp24 => 3,
                _ => 4,
            };
            let row_bytes = (w * bpp + 3) / 4 * 4;
            let raw = read_payload(r, row_bytes * h)?;
            let (bottom_up, palette) = bmp_row_order(&header);
            for i in 0..h {
                let v = if bottom_up { h - 1 - i } else { i };
                let row = &raw[i * row_bytes..i * row_bytes + w * bpp];
                let dst = out.row_mut(v);
                match header.data_type {
                    DataType::Bmp8 => {
                        for (d, &idx) in dst.iter_mut().zip(row) {
                            *d = palette.get(idx as usize).copied().ok_or_else(|| {
                                ImageError::Format(format!(
                                    "palette index {} out of range",
                                    idx
                                ))
                            })?;
                        }
                    }
                    DataType::Bmp24 => {
                        for (d, c) in dst.iter_mut().zip(row.chunks_exact(3)) {
                            *d = Rgb24::new(c[2], c[1], c[0]);
                        }
                    }
                    _ => {
                        for (d, c) in dst.iter_mut().zip(row.chunks_exact(4)) {
                            *d = Rgb24::new(c[2], c[1], c[0]);
                        }
                    }
                }
            }
        }
        t => {
            return Err(ImageError::Format(format!(
                "cannot restore {} data as color image",
                t.name()
            )))
        }
    }
    log::debug!(
        "restored {}x{} {} image",
        w,
        h,
        header.data_type.name()
    );
    Ok((out, header.calib))
}

/// Restore a float raster (disparity maps, cost planes).
pub fn restore_float<R: BufRead>(r: &mut R) -> Result<(Image<f32>, Calibration), ImageError> {
    let header = restore_header(r)?;
    if header.data_type != DataType::Float {
        return Err(ImageError::Format(format!(
            "expected Float data, found {}",
            header.data_type.name()
        )));
    }
    let (w, h) = (header.width, header.height);
    let raw = read_payload(r, 4 * w * h)?;
    let mut out = Image::new(w, h);
    for v in 0..h {
        let row = &raw[4 * v * w..4 * (v + 1) * w];
        for (dst, c) in out.row_mut(v).iter_mut().zip(row.chunks_exact(4)) {
            *dst = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
        }
    }
    Ok((out, header.calib))
}

fn write_comment_header<W: Write>(
    w: &mut W,
    data_type: DataType,
    calib: &Calibration,
) -> Result<(), ImageError> {
    writeln!(w, "# DataType: {}", data_type.name())?;
    if data_type.is_multi_byte() {
        let host = if cfg!(target_endian = "big") {
            "Big"
        } else {
            "Little"
        };
        writeln!(w, "# Endian: {}", host)?;
    }
    for i in 0..3 {
        for j in 0..4 {
            writeln!(
                w,
                "# PinHoleParameterH{}{}: {}",
                i + 1,
                j + 1,
                calib.p[i][j]
            )?;
        }
    }
    writeln!(w, "# DistortionParameterD1: {}", calib.d1)?;
    writeln!(w, "# DistortionParameterD2: {}", calib.d2)?;
    Ok(())
}

/// Save a grayscale image as PBM P5.
pub fn save_gray<W: Write>(
    w: &mut W,
    img: &Image<u8>,
    calib: &Calibration,
) -> Result<(), ImageError> {
    writeln!(w, "P5")?;
    write_comment_header(w, DataType::Char, calib)?;
    writeln!(w, "{} {}", img.width(), img.height())?;
    writeln!(w, "255")?;
    for v in 0..img.height() {
        w.write_all(img.row(v))?;
    }
    Ok(())
}

/// Save an RGB image as PBM P6.
pub fn save_rgb<W: Write>(
    w: &mut W,
    img: &Image<Rgb24>,
    calib: &Calibration,
) -> Result<(), ImageError> {
    writeln!(w, "P6")?;
    write_comment_header(w, DataType::Rgb24, calib)?;
    writeln!(w, "{} {}", img.width(), img.height())?;
    writeln!(w, "255")?;
    for v in 0..img.height() {
        for p in img.row(v) {
            w.write_all(&[p.r, p.g, p.b])?;
        }
    }
    Ok(())
}

/// Save a float raster (disparity map) as PBM P5 with `DataType: Float`.
pub fn save_float<W: Write>(
    w: &mut W,
    img: &Image<f32>,
    calib: &Calibration,
) -> Result<(), ImageError> {
    writeln!(w, "P5")?;
    write_comment_header(w, DataType::Float, calib)?;
    writeln!(w, "{} {}", img.width(), img.height())?;
    writeln!(w, "255")?;
    for v in 0..img.height() {
        for x in img.row(v) {
            w.write_all(&x.to_ne_bytes())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_calib() -> Calibration {
        let mut c = Calibration::default();
        c.p[0][0] = 800.0;
        c.p[0][2] = 320.0;
        c.p[1][1] = 800.0;
        c.p[1][2] = 240.0;
        c.d1 = 0.1;
        c.d2 = -0.02;
        c
    }

    #[test]
    fn test_gray_pbm_round_trip() {
        let mut img: Image<u8> = Image::new(4, 3);
        for v in 0..3 {
            for u in 0..4 {
                img.row_mut(v)[u] = (16 * v + u) as u8;
            }
        }
        let calib = sample_calib();
        let mut buf = Vec::new();
        save_gray(&mut buf, &img, &calib).unwrap();
        let (back, calib2) = restore_gray(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, img);
        assert_eq!(calib2, calib);
    }

    #[test]
    fn test_float_pbm_round_trip() {
        let mut img: Image<f32> = Image::new(3, 2);
        img.row_mut(0).copy_from_slice(&[0.0, 1.5, -2.25]);
        img.row_mut(1).copy_from_slice(&[4.0, 5.5, 63.125]);
        let mut buf = Vec::new();
        save_float(&mut buf, &img, &Calibration::default()).unwrap();
        let (back, _) = restore_float(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_rgb_pbm_round_trip() {
        let mut img: Image<Rgb24> = Image::new(2, 2);
        img.row_mut(0)[0] = Rgb24::new(1, 2, 3);
        img.row_mut(1)[1] = Rgb24::new(200, 100, 50);
        let mut buf = Vec::new();
        save_rgb(&mut buf, &img, &Calibration::default()).unwrap();
        let (back, _) = restore_rgb(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn test_legacy_distortion_is_rescaled() {
        // focal k = 2, so A is scaled by k^2 and B by k^4
        let header = "P5\n\
                      # PinHoleParameterH11: 2\n\
                      # PinHoleParameterH22: 2\n\
                      # DistortionParameterA: 0.5\n\
                      # DistortionParameterB: 0.25\n\
                      2 1\n255\n";
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[7, 7]);
        let (_, calib) = restore_gray(&mut Cursor::new(&data)).unwrap();
        assert!((calib.focal().unwrap() - 2.0).abs() < 1e-12);
        assert!((calib.d1 - 2.0).abs() < 1e-12);
        assert!((calib.d2 - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_legacy_rescale_blends_unequal_row_scales() {
        // for diag(20, 10, 1) the halved focal rows give the rotation fit
        // N = diag(10, 5, 1), so k = (10 + 5) / 1 = 15
        let header = "P5\n\
                      # PinHoleParameterH11: 20\n\
                      # PinHoleParameterH22: 10\n\
                      # PinHoleParameterH33: 1\n\
                      # DistortionParameterA: 0.5\n\
                      # DistortionParameterB: 0.25\n\
                      2 1\n255\n";
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[7, 7]);
        let (_, calib) = restore_gray(&mut Cursor::new(&data)).unwrap();
        assert!((calib.focal().unwrap() - 15.0).abs() < 1e-9);
        assert!((calib.d1 - 0.5 * 225.0).abs() < 1e-6);
        assert!((calib.d2 - 0.25 * 50625.0).abs() < 1e-3);
    }

    #[test]
    fn test_focal_is_rotation_invariant() {
        // P = diag(k, k, 1) * Rz(30 deg): the rotation fit recovers Rz and
        // the blended scalar is exactly k
        let k = 8.0f64;
        let (c, s) = (30.0f64.to_radians().cos(), 30.0f64.to_radians().sin());
        let mut calib = Calibration::default();
        calib.p = [
            [k * c, -k * s, 0.0, 0.0],
            [k * s, k * c, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        assert!((calib.focal().unwrap() - k).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_legacy_calibration_is_rejected() {
        // a rank-deficient projection has no extractable rotation
        let header = "P5\n\
                      # PinHoleParameterH22: 0\n\
                      # DistortionParameterA: 0.5\n\
                      2 1\n255\n";
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[7, 7]);
        let err = restore_gray(&mut Cursor::new(&data)).unwrap_err();
        assert!(matches!(err, ImageError::Format(_)));
    }

    fn bmp24(width: usize, height: i32, pixels: &[u8]) -> Vec<u8> {
        let h = height.unsigned_abs() as usize;
        let row_bytes = (width * 3 + 3) / 4 * 4;
        let mut f = Vec::new();
        f.extend_from_slice(b"BM");
        f.extend_from_slice(&(54 + (row_bytes * h) as u32).to_le_bytes());
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&54u32.to_le_bytes());
        f.extend_from_slice(&40u32.to_le_bytes());
        f.extend_from_slice(&(width as i32).to_le_bytes());
        f.extend_from_slice(&height.to_le_bytes());
        f.extend_from_slice(&1u16.to_le_bytes());
        f.extend_from_slice(&24u16.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes()); // biCompression
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        for row in pixels.chunks(width * 3) {
            f.extend_from_slice(row);
            f.resize(f.len() + row_bytes - width * 3, 0);
        }
        f
    }

    #[test]
    fn test_bmp24_bottom_up() {
        // 2x2, rows stored bottom-up in BGR
        let pixels = [
            255, 0, 0, 0, 255, 0, // file row 0 = image row 1: blue, green
            0, 0, 255, 10, 20, 30, // file row 1 = image row 0: red, misc
        ];
        let file = bmp24(2, 2, &pixels);
        let (img, _) = restore_rgb(&mut Cursor::new(&file)).unwrap();
        assert_eq!(img.row(0)[0], Rgb24::new(255, 0, 0));
        assert_eq!(img.row(0)[1], Rgb24::new(30, 20, 10));
        assert_eq!(img.row(1)[0], Rgb24::new(0, 0, 255));
        assert_eq!(img.row(1)[1], Rgb24::new(0, 255, 0));
    }

    #[test]
    fn test_bmp_top_down() {
        let pixels = [1, 2, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let file = bmp24(2, -2, &pixels);
        let (img, _) = restore_rgb(&mut Cursor::new(&file)).unwrap();
        assert_eq!(img.row(0)[0], Rgb24::new(3, 2, 1));
    }

    #[test]
    fn test_compressed_bmp_rejected() {
        let mut file = bmp24(2, 2, &[0u8; 12]);
        file[30] = 1; // biCompression = BI_RLE8
        let err = restore_rgb(&mut Cursor::new(&file)).unwrap_err();
        assert!(matches!(err, ImageError::Format(_)));
    }

    #[test]
    fn test_bmp8_palette() {
        let mut f = Vec::new();
        f.extend_from_slice(b"BM");
        f.extend_from_slice(&0u32.to_le_bytes());
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&0u16.to_le_bytes());
        f.extend_from_slice(&(54u32 + 2 * 4).to_le_bytes());
        f.extend_from_slice(&40u32.to_le_bytes());
        f.extend_from_slice(&2i32.to_le_bytes());
        f.extend_from_slice(&1i32.to_le_bytes());
        f.extend_from_slice(&1u16.to_le_bytes());
        f.extend_from_slice(&8u16.to_le_bytes());
        f.extend_from_slice(&0u32.to_le_bytes());
        for _ in 0..3 {
            f.extend_from_slice(&0u32.to_le_bytes());
        }
        f.extend_from_slice(&2u32.to_le_bytes()); // biClrUsed
        f.extend_from_slice(&0u32.to_le_bytes());
        // palette: index 0 = blue, index 1 = white (BGRA quads)
        f.extend_from_slice(&[255, 0, 0, 0]);
        f.extend_from_slice(&[255, 255, 255, 0]);
        // one row of two indices, padded to 4 bytes
        f.extend_from_slice(&[0, 1, 0, 0]);
        let (img, _) = restore_rgb(&mut Cursor::new(&f)).unwrap();
        assert_eq!(img.row(0)[0], Rgb24::new(0, 0, 255));
        assert_eq!(img.row(0)[1], Rgb24::new(255, 255, 255));
    }

    #[test]
    fn test_yuv422_file_decodes() {
        let header = "P6\n# DataType: YUV422\n2 1\n255\n";
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[128, 50, 128, 50]); // neutral chroma, y=50
        let (img, _) = restore_rgb(&mut Cursor::new(&data)).unwrap();
        assert_eq!(img.row(0)[0], Rgb24::gray(50));
        assert_eq!(img.row(0)[1], Rgb24::gray(50));
    }

    #[test]
    fn test_save_to_tempfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.pbm");
        let img: Image<f32> = Image::new(8, 4);
        let mut f = std::fs::File::create(&path).unwrap();
        save_float(&mut f, &img, &Calibration::default()).unwrap();
        drop(f);
        let data = std::fs::read(&path).unwrap();
        let (back, _) = restore_float(&mut Cursor::new(&data)).unwrap();
        assert_eq!(back, img);
    }
}
