//! Matching parameters
//!
//! Disparities are searched as indices `d` in `0..disparity_search_width`
//! presented in increasing order; the physical disparity of index `d` is
//! `disparity_max - d`, so `disparity_min()` is the smallest value the
//! engine can report. `validate` rejects every combination the engines
//! treat as a contract violation.

use serde::{Deserialize, Serialize};

use crate::error::{MatchError, Result};

/// How the horizontal and vertical back trackers observe the presented
/// costs (see the module docs of `tracker`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackMatchAlignment {
    /// Back trackers see the cost at the same search index as the forward
    /// tracker.
    #[default]
    SameDisparity,
    /// Back trackers see the previous step's cost, reproducing the delay
    /// line of the classic implementation; the cost at the last search
    /// index never reaches them.
    OneStepBehind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    /// Side length of the square aggregation window, odd and >= 3.
    pub window_size: usize,
    /// Number of disparity hypotheses tested per pixel.
    pub disparity_search_width: usize,
    /// Largest disparity hypothesis.
    pub disparity_max: usize,
    /// Allowed disagreement between forward and back match, in search steps.
    pub disparity_inconsistency: usize,
    /// Saturation threshold of the per-pixel difference metric.
    pub intensity_diff_max: i32,
    /// Re-check each match from the right image's point of view.
    pub do_horizontal_back_match: bool,
    /// Re-check each match from the top image's point of view (trinocular).
    pub do_vertical_back_match: bool,
    pub back_match_alignment: BackMatchAlignment,
    /// Rows per parallel band.
    pub grain_size: usize,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            window_size: 11,
            disparity_search_width: 64,
            disparity_max: 64,
            disparity_inconsistency: 2,
            intensity_diff_max: 20,
            do_horizontal_back_match: true,
            do_vertical_back_match: true,
            back_match_alignment: BackMatchAlignment::default(),
            grain_size: 100,
        }
    }
}

impl Parameters {
    /// Smallest reportable disparity.
    pub fn disparity_min(&self) -> usize {
        self.disparity_max - self.disparity_search_width + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(MatchError::Config(format!(
                "window size must be odd and >= 3, got {}",
                self.window_size
            )));
        }
        if self.disparity_search_width < 1 {
            return Err(MatchError::Config(
                "disparity search width must be >= 1".into(),
            ));
        }
        if self.disparity_max < self.disparity_search_width {
            return Err(MatchError::Config(format!(
                "disparity max {} smaller than search width {}",
                self.disparity_max, self.disparity_search_width
            )));
        }
        if self.disparity_min() < 1 {
            return Err(MatchError::Config(
                "disparity min must be >= 1 so that 0 stays the invalid marker".into(),
            ));
        }
        if self.intensity_diff_max < 1 {
            return Err(MatchError::Config(
                "intensity difference threshold must be >= 1".into(),
            ));
        }
        if self.grain_size < 1 {
            return Err(MatchError::Config("grain size must be >= 1".into()));
        }
        Ok(())
    }

    /// Validation against a concrete image geometry.
    pub fn validate_for(&self, width: usize, height: usize) -> Result<()> {
        self.validate()?;
        if self.window_size > height {
            return Err(MatchError::Config(format!(
                "window size {} exceeds image height {}",
                self.window_size, height
            )));
        }
        if self.window_size > width {
            return Err(MatchError::Config(format!(
                "window size {} exceeds image width {}",
                self.window_size, width
            )));
        }
        Ok(())
    }
}

/// Guided-filter engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GfParameters {
    pub matching: Parameters,
    /// Guided-filter regularization, in squared-intensity units.
    pub epsilon: f32,
    /// Weight of the second-best hypothesis in the reported disparity.
    pub blend: f32,
}

impl Default for GfParameters {
    fn default() -> Self {
        Self {
            matching: Parameters::default(),
            epsilon: 16.0,
            blend: 0.0,
        }
    }
}

impl GfParameters {
    pub fn validate(&self) -> Result<()> {
        self.matching.validate()?;
        if self.epsilon < 0.0 {
            return Err(MatchError::Config("epsilon must be >= 0".into()));
        }
        if !(0.0..1.0).contains(&self.blend) {
            return Err(MatchError::Config(format!(
                "blend must lie in [0, 1), got {}",
                self.blend
            )));
        }
        Ok(())
    }
}
