//! Lab conversion and masked means
//!
//! Captures are converted with OpenCV's 8-bit Lab transform and rescaled to
//! CIE ranges (L 0..100, a/b centered on zero). By default the BGR data is
//! treated as linear, matching how the grading stations were calibrated;
//! `assume_srgb` switches to the gamma-corrected transform.

use std::ops::{Add, Sub};

use opencv::{
    core::{self, Mat, Vec3b},
    imgproc::{self, COLOR_BGR2Lab, COLOR_LBGR2Lab},
    prelude::*,
};
use palette::{white_point::D65, FromColor, Lab, Lch};
use serde::{Deserialize, Serialize};

use crate::error::{GradingError, Result};

/// Lab triple in CIE ranges
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LabSample {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl LabSample {
    pub const fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    /// Rescale OpenCV 8-bit Lab channel values
    pub fn from_opencv(l: f64, a: f64, b: f64) -> Self {
        Self {
            l: l * 100.0 / 255.0,
            a: a - 128.0,
            b: b - 128.0,
        }
    }

    pub fn chroma(&self) -> f64 {
        chroma(self.a, self.b)
    }

    /// Hue angle in degrees, -180..=180
    pub fn hue(&self) -> f64 {
        hue_degrees(self.a, self.b)
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.l * factor, self.a * factor, self.b * factor)
    }

    pub fn to_lab(&self) -> Lab<D65, f64> {
        Lab::new(self.l, self.a, self.b)
    }

    /// Cylindrical form for display
    pub fn to_lch(&self) -> Lch<D65, f64> {
        Lch::from_color(self.to_lab())
    }
}

impl Add for LabSample {
    type Output = LabSample;

    fn add(self, rhs: LabSample) -> LabSample {
        LabSample::new(self.l + rhs.l, self.a + rhs.a, self.b + rhs.b)
    }
}

impl Sub for LabSample {
    type Output = LabSample;

    fn sub(self, rhs: LabSample) -> LabSample {
        LabSample::new(self.l - rhs.l, self.a - rhs.a, self.b - rhs.b)
    }
}

impl From<Lab<D65, f64>> for LabSample {
    fn from(lab: Lab<D65, f64>) -> Self {
        Self::new(lab.l, lab.a, lab.b)
    }
}

/// `sqrt(a² + b²)`
pub fn chroma(a: f64, b: f64) -> f64 {
    a.hypot(b)
}

/// `atan2(b, a)` in degrees
pub fn hue_degrees(a: f64, b: f64) -> f64 {
    b.atan2(a).to_degrees()
}

/// Convert a BGR capture to 8-bit OpenCV Lab
pub fn to_lab_mat(bgr: &Mat, assume_srgb: bool) -> Result<Mat> {
    let code = if assume_srgb {
        COLOR_BGR2Lab
    } else {
        COLOR_LBGR2Lab
    };
    let mut lab = Mat::default();
    imgproc::cvt_color_def(bgr, &mut lab, code)
        .map_err(|e| GradingError::opencv("Lab conversion", e))?;
    Ok(lab)
}

/// Mean Lab of an 8-bit Lab image under a binary mask.
///
/// Fails with `SegmentationError` when the mask selects no pixel.
pub fn mean_lab(lab: &Mat, mask: &Mat) -> Result<LabSample> {
    let count = core::count_non_zero(mask).map_err(|e| GradingError::opencv("mask area", e))?;
    if count == 0 {
        return Err(GradingError::SegmentationError {
            reason: "empty sampling mask".into(),
        });
    }
    let mean = core::mean(lab, mask).map_err(|e| GradingError::opencv("masked mean", e))?;
    Ok(LabSample::from_opencv(mean[0], mean[1], mean[2]))
}

/// Convert and average in one step
pub fn lab_mean_under_mask(bgr: &Mat, mask: &Mat, assume_srgb: bool) -> Result<LabSample> {
    mean_lab(&to_lab_mat(bgr, assume_srgb)?, mask)
}

/// Collect the Lab values of every masked pixel, row-major
pub fn masked_lab_pixels(lab: &Mat, mask: &Mat) -> Result<Vec<Lab<D65, f32>>> {
    let mut pixels = Vec::new();
    for row in 0..lab.rows() {
        for col in 0..lab.cols() {
            let m = *mask
                .at_2d::<u8>(row, col)
                .map_err(|e| GradingError::opencv("mask access", e))?;
            if m == 0 {
                continue;
            }
            let px = lab
                .at_2d::<Vec3b>(row, col)
                .map_err(|e| GradingError::opencv("pixel access", e))?;
            let s = LabSample::from_opencv(px[0] as f64, px[1] as f64, px[2] as f64);
            pixels.push(Lab::new(s.l as f32, s.a as f32, s.b as f32));
        }
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::rgb_to_bgr_mat;
    use image::{Rgb, RgbImage};
    use opencv::core::{Scalar, CV_8UC1};

    fn full_mask(rows: i32, cols: i32) -> Mat {
        Mat::new_rows_cols_with_default(rows, cols, CV_8UC1, Scalar::all(255.0)).unwrap()
    }

    #[test]
    fn test_chroma_and_hue() {
        let s = LabSample::new(50.0, 3.0, 4.0);
        assert!((s.chroma() - 5.0).abs() < 1e-12);
        assert!((s.hue() - 53.130102).abs() < 1e-5);
        assert!((hue_degrees(-1.0, -1e-9) + 180.0).abs() < 1e-6);
        assert_eq!(hue_degrees(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_opencv_rescale() {
        let s = LabSample::from_opencv(255.0, 128.0, 100.0);
        assert!((s.l - 100.0).abs() < 1e-12);
        assert_eq!(s.a, 0.0);
        assert_eq!(s.b, -28.0);
    }

    #[test]
    fn test_lch_matches_polar_form() {
        let s = LabSample::new(60.0, -4.0, 2.5);
        let lch = s.to_lch();
        assert!((lch.chroma - s.chroma()).abs() < 1e-9);
        let h = lch.hue.into_degrees();
        assert!((h - s.hue()).abs() < 1e-9);
    }

    #[test]
    fn test_white_is_neutral() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]));
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let s = lab_mean_under_mask(&mat, &full_mask(4, 4), false).unwrap();
        assert!((s.l - 100.0).abs() < 0.5);
        assert!(s.a.abs() <= 1.0 && s.b.abs() <= 1.0);
    }

    #[test]
    fn test_mean_respects_mask() {
        let img = RgbImage::from_fn(4, 2, |x, _| {
            if x < 2 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let mut mask = Mat::new_rows_cols_with_default(2, 4, CV_8UC1, Scalar::all(0.0)).unwrap();
        *mask.at_2d_mut::<u8>(0, 3).unwrap() = 255;
        *mask.at_2d_mut::<u8>(1, 3).unwrap() = 255;
        let s = lab_mean_under_mask(&mat, &mask, true).unwrap();
        assert!(s.l < 1.0);

        let lab = to_lab_mat(&mat, true).unwrap();
        assert_eq!(masked_lab_pixels(&lab, &mask).unwrap().len(), 2);
    }

    #[test]
    fn test_empty_mask_rejected() {
        let img = RgbImage::from_pixel(3, 3, Rgb([10, 20, 30]));
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let mask = Mat::new_rows_cols_with_default(3, 3, CV_8UC1, Scalar::all(0.0)).unwrap();
        assert!(matches!(
            lab_mean_under_mask(&mat, &mask, false),
            Err(GradingError::SegmentationError { .. })
        ));
    }
}
