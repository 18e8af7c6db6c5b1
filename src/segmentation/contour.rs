//! Edge-hull silhouette (default variant)
//!
//! Grayscale, contrast lookup, median smoothing and Canny edges; the edge
//! pixels are outlier-filtered around their centroid and wrapped in a convex
//! hull, which is filled and eroded to form the mask.

use opencv::{
    core::{self, Mat, Point, Vector},
    imgproc::{self, COLOR_BGR2GRAY},
    prelude::*,
};
use tracing::debug;

use super::geometry::{self, HullExtremes};
use super::{MaskShape, SegmentationParams, SegmentationResult, ShapeMetrics};
use crate::constants::mask::OUTLIER_SIGMA;
use crate::error::{GradingError, Result};

/// Contrast stretch lookup table around mid-gray.
///
/// Positive `contrast` expands the range, negative compresses it; both are
/// expressed in percent. Entries are rounded and clamped to `0..=255`.
pub fn contrast_lut(contrast: i32, brightness: i32) -> [u8; 256] {
    let c = contrast as f64;
    let brightness = brightness as f64;
    let (gain, offset) = if contrast > 0 {
        let delta = 127.0 * c / 100.0;
        let gain = 255.0 / (255.0 - delta * 2.0);
        (gain, gain * (brightness - delta))
    } else {
        let delta = -128.0 * c / 100.0;
        let gain = (256.0 - delta * 2.0) / 255.0;
        (gain, gain * brightness + delta)
    };

    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = (gain * i as f64 + offset).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Run the default segmentation on a BGR image
pub fn segment(
    image: &Mat,
    params: &SegmentationParams,
    shape: MaskShape,
) -> Result<SegmentationResult> {
    let rows = image.rows();
    let cols = image.cols();

    // Step 1: contrast-stretched grayscale
    let mut gray = Mat::default();
    imgproc::cvt_color_def(image, &mut gray, COLOR_BGR2GRAY)
        .map_err(|e| GradingError::opencv("grayscale conversion", e))?;

    let table = contrast_lut(params.contrast, 0);
    let lut = Mat::from_slice(&table)
        .and_then(|m| m.try_clone())
        .map_err(|e| GradingError::opencv("build contrast lut", e))?;
    let mut stretched = Mat::default();
    core::lut(&gray, &lut, &mut stretched)
        .map_err(|e| GradingError::opencv("apply contrast lut", e))?;

    // Step 2: median smoothing
    for _ in 0..params.smoothing_passes {
        let mut blurred = Mat::default();
        imgproc::median_blur(&stretched, &mut blurred, params.median_filter_size)
            .map_err(|e| GradingError::opencv("median blur", e))?;
        stretched = blurred;
    }

    // Step 3: edge points
    let mut edges = Mat::default();
    imgproc::canny(
        &stretched,
        &mut edges,
        params.canny_low,
        params.canny_high,
        3,
        false,
    )
    .map_err(|e| GradingError::opencv("canny", e))?;

    let mut edge_points = Vector::<Point>::new();
    if core::count_non_zero(&edges).map_err(|e| GradingError::opencv("count edges", e))? > 0 {
        core::find_non_zero(&edges, &mut edge_points)
            .map_err(|e| GradingError::opencv("collect edge points", e))?;
    }

    // Step 4: outlier rejection
    let points = geometry::filter_outliers(&edge_points.to_vec(), OUTLIER_SIGMA);
    debug!(
        edge_points = edge_points.len(),
        kept = points.len(),
        "edge outlier filtering"
    );
    if points.is_empty() {
        return Ok(SegmentationResult::empty());
    }

    // Step 5: hull and extremes
    let point_set: Vector<Point> = points.into_iter().collect();
    let hull = geometry::convex_hull(&point_set)?.to_vec();
    let ext = HullExtremes::from_points(&hull).ok_or_else(|| GradingError::SegmentationError {
        reason: "empty edge hull".into(),
    })?;

    let polygon = match shape {
        MaskShape::Full => hull.clone(),
        MaskShape::Partial => geometry::clip_below_girdle(&hull, &ext),
    };

    // Step 6: filled, eroded mask
    let filled = geometry::fill_convex(rows, cols, &polygon)?;
    let mask = geometry::erode(&filled, &Mat::default(), params.erode_passes)?;

    if ext.touches_border(cols, rows) {
        return Err(ext.border_error());
    }

    // Step 7: perimeter and area of the final mask
    let contours = geometry::external_contours(&mask)?;
    let (outline, area) =
        geometry::largest_contour(&contours)?.ok_or_else(|| GradingError::SegmentationError {
            reason: "mask vanished after erosion".into(),
        })?;
    let perimeter = imgproc::arc_length(&outline, true)
        .map_err(|e| GradingError::opencv("arc length", e))?;

    Ok(SegmentationResult {
        mask: Some(mask),
        secondary_mask: None,
        metrics: ShapeMetrics {
            perimeter,
            area: area.abs(),
            width: ext.width(),
            height: ext.height(),
            pavilion_offset: ext.pavilion_offset(),
            secondary_area: 0.0,
        },
    })
}
