//! Kirsch compass gradient
//!
//! Weighted grayscale (0.11 B + 0.59 G + 0.30 R) filtered with the
//! horizontal and vertical Kirsch kernels; the magnitude is saturated to
//! 8 bits and the outermost pixel ring is left at zero.

use opencv::{
    core::{self, Mat, Point, Scalar, BORDER_REPLICATE, CV_32F, CV_32FC1, CV_8U, CV_8UC3},
    imgproc,
    prelude::*,
};

use crate::error::{GradingError, Result};

const KERNEL_HORIZONTAL: [[f32; 3]; 3] = [[5.0, 5.0, 5.0], [-3.0, 0.0, -3.0], [-3.0, -3.0, -3.0]];
const KERNEL_VERTICAL: [[f32; 3]; 3] = [[5.0, -3.0, -3.0], [5.0, 0.0, -3.0], [5.0, -3.0, -3.0]];

const WEIGHT_B: f32 = 0.11;
const WEIGHT_G: f32 = 0.59;
const WEIGHT_R: f32 = 0.30;

/// Kirsch gradient magnitude of a BGR image as a single-channel 8-bit Mat
pub fn kirsch_gradient(bgr: &Mat) -> Result<Mat> {
    if bgr.typ() != CV_8UC3 {
        return Err(GradingError::InvalidParameter {
            parameter: "kirsch input type".into(),
            value: bgr.typ().to_string(),
        });
    }

    let rows = bgr.rows();
    let cols = bgr.cols();

    // Step 1: weighted grayscale in float
    let source = if bgr.is_continuous() {
        None
    } else {
        Some(
            bgr.try_clone()
                .map_err(|e| GradingError::opencv("clone kirsch input", e))?,
        )
    };
    let bytes = source
        .as_ref()
        .unwrap_or(bgr)
        .data_bytes()
        .map_err(|e| GradingError::opencv("access kirsch input", e))?;

    let mut gray = Mat::new_rows_cols_with_default(rows, cols, CV_32FC1, Scalar::all(0.0))
        .map_err(|e| GradingError::opencv("allocate kirsch gray", e))?;
    {
        let dst = gray
            .data_typed_mut::<f32>()
            .map_err(|e| GradingError::opencv("access kirsch gray", e))?;
        for (g, px) in dst.iter_mut().zip(bytes.chunks_exact(3)) {
            *g = WEIGHT_B * px[0] as f32 + WEIGHT_G * px[1] as f32 + WEIGHT_R * px[2] as f32;
        }
    }

    // Step 2: directional responses
    let gx = filter(&gray, &KERNEL_HORIZONTAL)?;
    let gy = filter(&gray, &KERNEL_VERTICAL)?;

    // Step 3: magnitude, saturated to 8 bits
    let mut magnitude = Mat::default();
    core::magnitude(&gx, &gy, &mut magnitude)
        .map_err(|e| GradingError::opencv("kirsch magnitude", e))?;

    let mut out = Mat::default();
    magnitude
        .convert_to(&mut out, CV_8U, 1.0, 0.0)
        .map_err(|e| GradingError::opencv("kirsch saturate", e))?;

    // Step 4: clear the one-pixel frame
    for x in 0..cols {
        *out.at_2d_mut::<u8>(0, x)
            .map_err(|e| GradingError::opencv("clear kirsch border", e))? = 0;
        *out.at_2d_mut::<u8>(rows - 1, x)
            .map_err(|e| GradingError::opencv("clear kirsch border", e))? = 0;
    }
    for y in 0..rows {
        *out.at_2d_mut::<u8>(y, 0)
            .map_err(|e| GradingError::opencv("clear kirsch border", e))? = 0;
        *out.at_2d_mut::<u8>(y, cols - 1)
            .map_err(|e| GradingError::opencv("clear kirsch border", e))? = 0;
    }

    Ok(out)
}

fn filter(gray: &Mat, kernel: &[[f32; 3]; 3]) -> Result<Mat> {
    let kernel =
        Mat::from_slice_2d(kernel).map_err(|e| GradingError::opencv("build kirsch kernel", e))?;
    let mut out = Mat::default();
    imgproc::filter_2d(
        gray,
        &mut out,
        CV_32F,
        &kernel,
        Point::new(-1, -1),
        0.0,
        BORDER_REPLICATE,
    )
    .map_err(|e| GradingError::opencv("kirsch filter", e))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::rgb_to_bgr_mat;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_flat_image_has_no_gradient() {
        let img = RgbImage::from_pixel(8, 8, Rgb([120, 120, 120]));
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let grad = kirsch_gradient(&mat).unwrap();
        assert_eq!(core::count_non_zero(&grad).unwrap(), 0);
    }

    #[test]
    fn test_step_edge_saturates() {
        let img = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        });
        let mat = rgb_to_bgr_mat(&img).unwrap();
        let grad = kirsch_gradient(&mat).unwrap();

        assert_eq!(*grad.at_2d::<u8>(5, 5).unwrap(), 255);
        assert_eq!(*grad.at_2d::<u8>(5, 1).unwrap(), 0);
        // frame stays clear even on the edge column
        assert_eq!(*grad.at_2d::<u8>(0, 5).unwrap(), 0);
    }

    #[test]
    fn test_rejects_gray_input() {
        let gray = Mat::new_rows_cols_with_default(4, 4, opencv::core::CV_8UC1, Scalar::all(0.0))
            .unwrap();
        assert!(kirsch_gradient(&gray).is_err());
    }
}
