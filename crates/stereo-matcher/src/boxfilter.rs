//! Incremental 1-D box filter
//!
//! `out[i] = sum(in[i..i+w])` over a sliding window: one addition and one
//! subtraction per step. Two-dimensional aggregation is separable: the
//! engines run the horizontal pass with this filter and keep a column-sums
//! row as the vertical state.

/// Cost element of the aggregation pipelines: integer for SAD, float for
/// the guided filter.
pub trait Cost:
    Copy
    + PartialOrd
    + Send
    + Sync
    + std::ops::Add<Output = Self>
    + std::ops::Sub<Output = Self>
    + std::ops::AddAssign
{
    const ZERO: Self;
    /// Sentinel ordering above every real cost.
    const SATURATED: Self;
    fn to_f32(self) -> f32;
}

impl Cost for i32 {
    const ZERO: Self = 0;
    const SATURATED: Self = i32::MAX;

    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Cost for f32 {
    const ZERO: Self = 0.0;
    const SATURATED: Self = f32::MAX;

    fn to_f32(self) -> f32 {
        self
    }
}

/// Grow a scratch buffer, surfacing allocation failure as a
/// `ResourceError` instead of aborting.
pub(crate) fn grow<T: Clone>(
    buf: &mut Vec<T>,
    len: usize,
    fill: T,
) -> crate::error::Result<()> {
    if buf.len() < len {
        buf.try_reserve(len - buf.len()).map_err(|e| {
            crate::error::MatchError::Resource(format!("scratch allocation failed: {}", e))
        })?;
        buf.resize(len, fill);
    }
    Ok(())
}

/// Sliding-window sums of `input`; writes `input.len() - window + 1`
/// values into `out`.
pub fn box_filter_row<C: Cost>(input: &[C], window: usize, out: &mut [C]) {
    let n = input.len();
    debug_assert!(window >= 1 && n >= window);
    debug_assert!(out.len() >= n - window + 1);
    let mut acc = C::ZERO;
    for &x in &input[..window] {
        acc += x;
    }
    out[0] = acc;
    for i in 1..=n - window {
        acc += input[i + window - 1] - input[i - 1];
        out[i] = acc;
    }
}

/// Vertical accumulation step of the separable 2-D filter: `dst += src`.
pub fn accumulate_row<C: Cost>(dst: &mut [C], src: &[C]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, &s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive(input: &[i32], window: usize) -> Vec<i32> {
        (0..input.len() - window + 1)
            .map(|i| input[i..i + window].iter().sum())
            .collect()
    }

    #[test]
    fn test_uniform_input_sums_to_window_multiple() {
        // out[i] = c * w for uniform input c
        let input = [3i32; 17];
        let mut out = [0i32; 13];
        box_filter_row(&input, 5, &mut out);
        assert!(out.iter().all(|&x| x == 15));
    }

    #[test]
    fn test_matches_naive_sums() {
        let input: Vec<i32> = (0..23).map(|i| (i * i * 7 + 3) % 41).collect();
        for window in [1, 3, 7, 23] {
            let mut out = vec![0i32; input.len() - window + 1];
            box_filter_row(&input, window, &mut out);
            assert_eq!(out, naive(&input, window), "window {}", window);
        }
    }

    #[test]
    fn test_output_length_contract() {
        let input = [1i32; 9];
        let mut out = [0i32; 3];
        box_filter_row(&input, 7, &mut out);
        assert_eq!(&out[..3], &[7, 7, 7]);
    }

    #[test]
    fn test_float_accumulation() {
        let input = [0.5f32, 1.5, 2.5, 3.5];
        let mut out = [0f32; 2];
        box_filter_row(&input, 3, &mut out);
        assert!((out[0] - 4.5).abs() < 1e-6);
        assert!((out[1] - 7.5).abs() < 1e-6);
    }

    #[test]
    fn test_accumulate_row() {
        let mut dst = [1i32, 2, 3];
        accumulate_row(&mut dst, &[10, 20, 30]);
        assert_eq!(dst, [11, 22, 33]);
    }
}
