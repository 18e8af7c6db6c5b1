//! Calibrated colour samples for diamond/background pairs
//!
//! The diamond and background captures are averaged under the same mask and
//! the background-relative difference is mapped through the station's
//! [`LabAdjustment`]. Samples from many pairs are combined with a
//! [`SampleAccumulator`], whose sum and merge are order independent.

use opencv::core::Mat;
use serde::{Deserialize, Serialize};

use super::conversion::{mean_lab, to_lab_mat, LabSample};
use crate::calibration::LabAdjustment;
use crate::error::{GradingError, Result};
use crate::segmentation::SegmentationResult;

/// Raw means and calibrated Lab for one pair
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorSample {
    pub diamond: LabSample,
    pub background: LabSample,
    pub calibrated: LabSample,
}

impl ColorSample {
    pub fn lightness(&self) -> f64 {
        self.calibrated.l
    }

    pub fn chroma(&self) -> f64 {
        self.calibrated.chroma()
    }

    /// Hue in degrees, -180..=180
    pub fn hue(&self) -> f64 {
        self.calibrated.hue()
    }
}

/// Primary and exposure-filtered samples from one pair
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PairSamples {
    pub primary: ColorSample,
    pub secondary: Option<ColorSample>,
}

/// Computes calibrated samples from a pair of BGR captures
#[derive(Debug, Clone, Default)]
pub struct ColorExtractor {
    adjustment: LabAdjustment,
    assume_srgb: bool,
}

impl ColorExtractor {
    pub fn new(adjustment: LabAdjustment, assume_srgb: bool) -> Self {
        Self {
            adjustment,
            assume_srgb,
        }
    }

    pub fn adjustment(&self) -> &LabAdjustment {
        &self.adjustment
    }

    fn sample(&self, diamond_lab: &Mat, background_lab: &Mat, mask: &Mat) -> Result<ColorSample> {
        let diamond = mean_lab(diamond_lab, mask)?;
        let background = mean_lab(background_lab, mask)?;
        let calibrated = self.adjustment.apply(&diamond, &background)?;
        Ok(ColorSample {
            diamond,
            background,
            calibrated,
        })
    }

    /// Sample both captures under an explicit mask
    pub fn extract(&self, diamond: &Mat, background: &Mat, mask: &Mat) -> Result<ColorSample> {
        let diamond_lab = to_lab_mat(diamond, self.assume_srgb)?;
        let background_lab = to_lab_mat(background, self.assume_srgb)?;
        self.sample(&diamond_lab, &background_lab, mask)
    }

    /// Sample under a segmentation's primary mask, and under its secondary
    /// mask when one was produced.
    ///
    /// An empty secondary mask yields no secondary sample rather than an
    /// error; an empty primary mask fails the pair.
    pub fn extract_segmented(
        &self,
        diamond: &Mat,
        background: &Mat,
        segmentation: &SegmentationResult,
    ) -> Result<PairSamples> {
        let Some(mask) = segmentation.mask.as_ref() else {
            return Err(GradingError::SegmentationError {
                reason: "no stone mask to sample".into(),
            });
        };

        let diamond_lab = to_lab_mat(diamond, self.assume_srgb)?;
        let background_lab = to_lab_mat(background, self.assume_srgb)?;
        let primary = self.sample(&diamond_lab, &background_lab, mask)?;

        let secondary = match segmentation.secondary_mask.as_ref() {
            Some(secondary_mask) => {
                match self.sample(&diamond_lab, &background_lab, secondary_mask) {
                    Ok(sample) => Some(sample),
                    Err(GradingError::SegmentationError { .. }) => None,
                    Err(e) => return Err(e),
                }
            }
            None => None,
        };

        Ok(PairSamples { primary, secondary })
    }
}

/// Running sum of colour samples
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SampleAccumulator {
    diamond: LabSample,
    background: LabSample,
    calibrated: LabSample,
    count: usize,
}

impl SampleAccumulator {
    pub fn add(&mut self, sample: &ColorSample) {
        self.diamond = self.diamond + sample.diamond;
        self.background = self.background + sample.background;
        self.calibrated = self.calibrated + sample.calibrated;
        self.count += 1;
    }

    pub fn merge(mut self, other: SampleAccumulator) -> Self {
        self.diamond = self.diamond + other.diamond;
        self.background = self.background + other.background;
        self.calibrated = self.calibrated + other.calibrated;
        self.count += other.count;
        self
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Component-wise mean; `None` before the first sample
    pub fn mean(&self) -> Option<ColorSample> {
        if self.count == 0 {
            return None;
        }
        let inv = 1.0 / self.count as f64;
        Some(ColorSample {
            diamond: self.diamond.scale(inv),
            background: self.background.scale(inv),
            calibrated: self.calibrated.scale(inv),
        })
    }
}

impl<'a> FromIterator<&'a ColorSample> for SampleAccumulator {
    fn from_iter<I: IntoIterator<Item = &'a ColorSample>>(iter: I) -> Self {
        let mut acc = SampleAccumulator::default();
        for sample in iter {
            acc.add(sample);
        }
        acc
    }
}
