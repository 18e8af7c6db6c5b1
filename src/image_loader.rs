//! Image decode boundary and pairing of diamond/background captures
//!
//! The grading pipeline works on raw pixel buffers. This module decodes
//! captures with the `image` crate, pairs each diamond capture with a
//! background capture, and converts buffers to and from OpenCV `Mat`s.
//!
//! ## Design
//!
//! Captures are held as `image::RgbImage` so a whole [`ImageSet`] can be
//! shared read-only across worker threads. Each worker builds its own BGR
//! `Mat` with [`rgb_to_bgr_mat`] right before segmentation.

use crate::error::{GradingError, Result};
use image::{GrayImage, RgbImage};
use opencv::core::{Mat, CV_8UC1, CV_8UC3};
use opencv::prelude::*;
use std::path::Path;

/// One diamond-lit capture and the background-only capture it is measured against
#[derive(Debug, Clone, Copy)]
pub struct ImagePair<'a> {
    /// Position of the diamond capture in its set
    pub index: usize,
    pub diamond: &'a RgbImage,
    pub background: &'a RgbImage,
}

impl<'a> ImagePair<'a> {
    pub fn new(index: usize, diamond: &'a RgbImage, background: &'a RgbImage) -> Self {
        Self {
            index,
            diamond,
            background,
        }
    }

    /// Diamond and background must share width and height
    pub fn check_dimensions(&self) -> Result<()> {
        if self.diamond.dimensions() != self.background.dimensions() {
            return Err(GradingError::InvalidInput {
                reason: format!(
                    "pair {}: diamond {:?} vs background {:?}",
                    self.index,
                    self.diamond.dimensions(),
                    self.background.dimensions()
                ),
            });
        }
        if self.diamond.width() == 0 || self.diamond.height() == 0 {
            return Err(GradingError::InvalidInput {
                reason: format!("pair {}: empty image", self.index),
            });
        }
        Ok(())
    }
}

/// All captures of one stone for a single grading run
#[derive(Debug, Clone, Default)]
pub struct ImageSet {
    pub diamonds: Vec<RgbImage>,
    pub backgrounds: Vec<RgbImage>,
}

impl ImageSet {
    pub fn new(diamonds: Vec<RgbImage>, backgrounds: Vec<RgbImage>) -> Self {
        Self {
            diamonds,
            backgrounds,
        }
    }

    /// Pair every diamond capture with a background capture.
    ///
    /// Diamond `m` uses background `m % backgrounds.len()`, so a shorter
    /// background list is cycled. Returns an empty list when either side is
    /// empty.
    pub fn pairs(&self) -> Vec<ImagePair<'_>> {
        if self.backgrounds.is_empty() {
            return Vec::new();
        }
        self.diamonds
            .iter()
            .enumerate()
            .map(|(m, diamond)| {
                ImagePair::new(m, diamond, &self.backgrounds[m % self.backgrounds.len()])
            })
            .collect()
    }

    /// Absolute difference between diamond and background capture counts
    pub fn count_difference(&self) -> usize {
        self.diamonds.len().abs_diff(self.backgrounds.len())
    }
}

/// Decode an image file into an RGB buffer
///
/// # Errors
///
/// Returns `GradingError::ImageLoadError` if the file cannot be opened or decoded.
pub fn load_image(path: &Path) -> Result<RgbImage> {
    use image::ImageReader;

    let reader = ImageReader::open(path).map_err(|e| {
        GradingError::image_load(format!("Failed to open image file: {}", path.display()), e)
    })?;

    let img = reader
        .with_guessed_format()
        .map_err(|e| {
            GradingError::image_load(format!("Failed to read image: {}", path.display()), e)
        })?
        .decode()
        .map_err(|e| {
            GradingError::image_load(format!("Failed to decode image: {}", path.display()), e)
        })?;

    Ok(img.to_rgb8())
}

/// Decode a full diamond/background capture set
pub fn load_image_set<P: AsRef<Path>>(diamonds: &[P], backgrounds: &[P]) -> Result<ImageSet> {
    let diamonds = diamonds
        .iter()
        .map(|p| load_image(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    let backgrounds = backgrounds
        .iter()
        .map(|p| load_image(p.as_ref()))
        .collect::<Result<Vec<_>>>()?;
    Ok(ImageSet::new(diamonds, backgrounds))
}

/// Convert an RGB buffer to an OpenCV BGR Mat
pub fn rgb_to_bgr_mat(image: &RgbImage) -> Result<Mat> {
    let (width, height) = image.dimensions();

    let mut mat = Mat::zeros(height as i32, width as i32, CV_8UC3)
        .map_err(|e| GradingError::opencv("create BGR Mat", e))?
        .to_mat()
        .map_err(|e| GradingError::opencv("materialize BGR Mat", e))?;

    let bytes = mat
        .data_bytes_mut()
        .map_err(|e| GradingError::opencv("access BGR Mat data", e))?;

    for (dst, src) in bytes.chunks_exact_mut(3).zip(image.as_raw().chunks_exact(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }

    Ok(mat)
}

/// Convert a single-channel 8-bit mask Mat into a grayscale image for diagnostics
pub fn mask_to_gray_image(mask: &Mat) -> Result<GrayImage> {
    if mask.typ() != CV_8UC1 {
        return Err(GradingError::InvalidParameter {
            parameter: "mask type".into(),
            value: mask.typ().to_string(),
        });
    }

    let owned;
    let source = if mask.is_continuous() {
        mask
    } else {
        owned = mask
            .try_clone()
            .map_err(|e| GradingError::opencv("clone mask", e))?;
        &owned
    };

    let bytes = source
        .data_bytes()
        .map_err(|e| GradingError::opencv("access mask data", e))?;

    GrayImage::from_raw(source.cols() as u32, source.rows() as u32, bytes.to_vec())
        .ok_or_else(|| GradingError::processing("mask buffer size does not match dimensions"))
}

/// Convert a grayscale image (e.g. an externally supplied mask) into a single-channel Mat
pub fn gray_image_to_mat(image: &GrayImage) -> Result<Mat> {
    let (width, height) = image.dimensions();

    let mut mat = Mat::zeros(height as i32, width as i32, CV_8UC1)
        .map_err(|e| GradingError::opencv("create mask Mat", e))?
        .to_mat()
        .map_err(|e| GradingError::opencv("materialize mask Mat", e))?;

    mat.data_bytes_mut()
        .map_err(|e| GradingError::opencv("access mask Mat data", e))?
        .copy_from_slice(image.as_raw());

    Ok(mat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn test_rgb_to_bgr_conversion() {
        // 2x2 image: red, green, blue, white
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.put_pixel(1, 0, Rgb([0, 255, 0]));
        img.put_pixel(0, 1, Rgb([0, 0, 255]));
        img.put_pixel(1, 1, Rgb([255, 255, 255]));

        let mat = rgb_to_bgr_mat(&img).unwrap();

        let pixel_0_0: &opencv::core::Vec3b = mat.at_2d(0, 0).unwrap();
        assert_eq!(pixel_0_0[0], 0); // B
        assert_eq!(pixel_0_0[1], 0); // G
        assert_eq!(pixel_0_0[2], 255); // R

        let pixel_0_1: &opencv::core::Vec3b = mat.at_2d(0, 1).unwrap();
        assert_eq!(pixel_0_1[1], 255);

        let pixel_1_0: &opencv::core::Vec3b = mat.at_2d(1, 0).unwrap();
        assert_eq!(pixel_1_0[0], 255);
        assert_eq!(pixel_1_0[2], 0);

        let pixel_1_1: &opencv::core::Vec3b = mat.at_2d(1, 1).unwrap();
        assert_eq!(pixel_1_1[0], 255);
        assert_eq!(pixel_1_1[1], 255);
        assert_eq!(pixel_1_1[2], 255);
    }

    #[test]
    fn test_gray_mat_roundtrip() {
        let mut gray = GrayImage::new(3, 2);
        gray.put_pixel(2, 1, Luma([255]));
        let mat = gray_image_to_mat(&gray).unwrap();
        assert_eq!(*mat.at_2d::<u8>(1, 2).unwrap(), 255);
        let back = mask_to_gray_image(&mat).unwrap();
        assert_eq!(back, gray);
    }

    #[test]
    fn test_pairs_cycle_backgrounds() {
        let d = vec![RgbImage::new(4, 4); 5];
        let b = vec![RgbImage::new(4, 4); 2];
        let set = ImageSet::new(d, b);
        let pairs = set.pairs();
        assert_eq!(pairs.len(), 5);
        assert!(std::ptr::eq(pairs[2].background, &set.backgrounds[0]));
        assert!(std::ptr::eq(pairs[3].background, &set.backgrounds[1]));
        assert_eq!(set.count_difference(), 3);
    }

    #[test]
    fn test_pair_dimension_mismatch() {
        let d = RgbImage::new(4, 4);
        let b = RgbImage::new(4, 5);
        let pair = ImagePair::new(0, &d, &b);
        assert!(matches!(
            pair.check_dimensions(),
            Err(GradingError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_image(Path::new("nonexistent_capture.png"));
        assert!(matches!(result, Err(GradingError::ImageLoadError { .. })));
    }
}
