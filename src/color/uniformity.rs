//! Brightness and hue evenness checks
//!
//! Both checks build a level histogram over the masked stone and look at its
//! peaks. Several strong brightness peaks point to a zoned or patchy stone;
//! a dominant hue peak that covers too little of the stone points to mixed
//! colour.

use opencv::{
    core::{self, Mat, Vec3b},
    imgproc::{self, COLOR_BGR2GRAY, COLOR_BGR2HSV_FULL},
    prelude::*,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::spectrum::{Peak, Spectrum};
use crate::constants::uniformity::*;
use crate::error::{GradingError, Result};

/// Result of both evenness checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnevennessFlags {
    pub multiple_bright_regions: bool,
    pub uneven_hue: bool,
}

impl UnevennessFlags {
    pub fn any(&self) -> bool {
        self.multiple_bright_regions || self.uneven_hue
    }
}

fn masked_levels(channel: &Mat, mask: &Mat) -> Result<Vec<u8>> {
    let mut levels = Vec::new();
    for row in 0..channel.rows() {
        for col in 0..channel.cols() {
            let m = *mask
                .at_2d::<u8>(row, col)
                .map_err(|e| GradingError::opencv("mask access", e))?;
            if m > 0 {
                levels.push(
                    *channel
                        .at_2d::<u8>(row, col)
                        .map_err(|e| GradingError::opencv("level access", e))?,
                );
            }
        }
    }
    Ok(levels)
}

/// Smooth until no noise peak is left, then count strong peaks.
///
/// Noise peaks are shallower than `NOISE_PEAK_HEIGHT` and narrower than
/// `NOISE_PEAK_WIDTH`. Of the five tallest remaining peaks above
/// `MIN_REGION_PEAK_HEIGHT`, more than two with a top above 1.5× the mean
/// bin count flag the stone.
pub fn bright_regions_uneven(levels: &[u8]) -> bool {
    let raw = Spectrum::from_levels(levels.iter().copied(), BRIGHT_HIST_START, BRIGHT_HIST_BINS);
    let threshold = raw.sum() * MEAN_BIN_FACTOR / raw.len() as f64;

    let mut spectrum = raw;
    let mut peaks: Vec<Peak> = Vec::new();
    for pass in 0..MAX_SMOOTHING_PASSES {
        spectrum = spectrum.smoothed(SMOOTHING_WINDOW);
        peaks = spectrum.find_peaks();
        let noisy = peaks.iter().any(|p| {
            let h = p.height();
            h > 0.0 && h < NOISE_PEAK_HEIGHT && p.width() < NOISE_PEAK_WIDTH
        });
        if !noisy {
            debug!(passes = pass + 1, peaks = peaks.len(), "brightness spectrum smoothed");
            break;
        }
    }

    let mut heights: Vec<f64> = peaks
        .iter()
        .map(Peak::height)
        .filter(|h| *h > MIN_REGION_PEAK_HEIGHT)
        .collect();
    heights.sort_by(|a, b| b.total_cmp(a));
    heights.truncate(MAX_REGION_PEAKS);

    let Some(&cutoff) = heights.last() else {
        return false;
    };
    let strong = peaks
        .iter()
        .filter(|p| p.height() >= cutoff && p.top.y > threshold)
        .count();
    strong > MAX_BRIGHT_REGIONS
}

/// Share of the stone, in rounded percent, covered by the tallest hue peak.
///
/// `None` when the hue histogram has no peak.
pub fn dominant_hue_percent(hues: &[u8]) -> Option<f64> {
    if hues.is_empty() {
        return None;
    }
    let spectrum = Spectrum::from_levels(hues.iter().copied(), HUE_HIST_START, HUE_HIST_BINS);
    let highest = spectrum
        .find_peaks()
        .into_iter()
        .filter(|p| p.height() > 0.0)
        .fold(None::<Peak>, |best, p| match best {
            Some(b) if b.height() >= p.height() => Some(b),
            _ => Some(p),
        })?;

    let count = hues
        .iter()
        .filter(|&&h| (h as f64) >= highest.start.x && (h as f64) <= highest.end.x)
        .count();
    Some((count as f64 * 100.0 / hues.len() as f64).round())
}

fn gray_levels(bgr: &Mat, mask: &Mat) -> Result<Vec<u8>> {
    let mut gray = Mat::default();
    imgproc::cvt_color_def(bgr, &mut gray, COLOR_BGR2GRAY)
        .map_err(|e| GradingError::opencv("grayscale conversion", e))?;
    masked_levels(&gray, mask)
}

fn hue_levels(bgr: &Mat, mask: &Mat) -> Result<Vec<u8>> {
    let mut hsv = Mat::default();
    imgproc::cvt_color_def(bgr, &mut hsv, COLOR_BGR2HSV_FULL)
        .map_err(|e| GradingError::opencv("HSV conversion", e))?;
    let mut hues = Vec::new();
    for row in 0..hsv.rows() {
        for col in 0..hsv.cols() {
            let m = *mask
                .at_2d::<u8>(row, col)
                .map_err(|e| GradingError::opencv("mask access", e))?;
            if m > 0 {
                let px = hsv
                    .at_2d::<Vec3b>(row, col)
                    .map_err(|e| GradingError::opencv("hue access", e))?;
                hues.push(px[0]);
            }
        }
    }
    Ok(hues)
}

fn require_pixels(mask: &Mat) -> Result<()> {
    let area = core::count_non_zero(mask).map_err(|e| GradingError::opencv("mask area", e))?;
    if area == 0 {
        return Err(GradingError::SegmentationError {
            reason: "empty mask for evenness check".into(),
        });
    }
    Ok(())
}

/// Several separate brightness populations inside the mask
pub fn has_multiple_bright_regions(bgr: &Mat, mask: &Mat) -> Result<bool> {
    require_pixels(mask)?;
    Ok(bright_regions_uneven(&gray_levels(bgr, mask)?))
}

/// Dominant hue covers less than two thirds of the mask
pub fn has_uneven_hue(bgr: &Mat, mask: &Mat) -> Result<bool> {
    require_pixels(mask)?;
    let hues = hue_levels(bgr, mask)?;
    Ok(dominant_hue_percent(&hues).is_some_and(|p| p < MIN_DOMINANT_HUE_PERCENT))
}

/// Run both checks over the masked stone
pub fn detect_uneven_regions(bgr: &Mat, mask: &Mat) -> Result<UnevennessFlags> {
    Ok(UnevennessFlags {
        multiple_bright_regions: has_multiple_bright_regions(bgr, mask)?,
        uneven_hue: has_uneven_hue(bgr, mask)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::rgb_to_bgr_mat;
    use image::{Rgb, RgbImage};
    use opencv::core::{Scalar, CV_8UC1};

    fn levels_around(centers: &[u8], per_level: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for &c in centers {
            for d in 0..9u8 {
                let level = c - 4 + d;
                // triangular bump, tallest at the center
                let n = per_level * (5 - (d as i32 - 4).unsigned_abs() as usize);
                out.extend(std::iter::repeat(level).take(n));
            }
        }
        out
    }

    #[test]
    fn test_single_brightness_population() {
        assert!(!bright_regions_uneven(&levels_around(&[120], 40)));
    }

    #[test]
    fn test_three_brightness_populations() {
        assert!(bright_regions_uneven(&levels_around(&[40, 120, 200], 40)));
    }

    #[test]
    fn test_empty_levels_even() {
        assert!(!bright_regions_uneven(&[]));
        assert_eq!(dominant_hue_percent(&[]), None);
    }

    #[test]
    fn test_dominant_hue_percent() {
        let mut hues = vec![40u8; 90];
        hues.extend(vec![180u8; 10]);
        assert_eq!(dominant_hue_percent(&hues), Some(90.0));

        let mut split = vec![40u8; 50];
        split.extend(vec![180u8; 50]);
        assert_eq!(dominant_hue_percent(&split), Some(50.0));
    }

    #[test]
    fn test_detect_on_two_tone_image() {
        let img = RgbImage::from_fn(40, 20, |x, _| {
            if x < 20 {
                Rgb([220, 40, 40])
            } else {
                Rgb([40, 40, 220])
            }
        });
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let mask = Mat::new_rows_cols_with_default(20, 40, CV_8UC1, Scalar::all(255.0)).unwrap();
        let flags = detect_uneven_regions(&mat, &mask).unwrap();
        assert!(flags.uneven_hue);
        assert!(flags.any());

        let solid = rgb_to_bgr_mat(&RgbImage::from_pixel(40, 20, Rgb([220, 40, 40]))).unwrap();
        assert!(!has_uneven_hue(&solid, &mask).unwrap());
    }

    #[test]
    fn test_empty_mask_rejected() {
        let mat = rgb_to_bgr_mat(&RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))).unwrap();
        let mask = Mat::new_rows_cols_with_default(4, 4, CV_8UC1, Scalar::all(0.0)).unwrap();
        assert!(has_multiple_bright_regions(&mat, &mask).is_err());
    }
}
