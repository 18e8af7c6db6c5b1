//! Single-hull silhouette for small stones
//!
//! Shares the stabilized Kirsch outline with the refined variant, then wraps
//! every edge point inside it in one convex hull instead of filling clefts.

use opencv::{
    core::{Mat, Point, Vector},
    imgproc,
    prelude::*,
};

use super::geometry::{self, HullExtremes};
use super::kirsch::kirsch_gradient;
use super::refined::{approximate, binary_threshold, intersect, stabilized_outline};
use super::{MaskShape, SegmentationParams, SegmentationResult, ShapeMetrics};
use crate::error::{GradingError, Result};

/// Run the melee segmentation on a BGR image
pub fn segment(
    image: &Mat,
    params: &SegmentationParams,
    shape: MaskShape,
) -> Result<SegmentationResult> {
    let rows = image.rows();
    let cols = image.cols();

    let kirsch = kirsch_gradient(image)?;
    let outline = stabilized_outline(&kirsch, params.outline_threshold)?;
    let inside = intersect(&binary_threshold(&kirsch, params.hull_threshold)?, &outline)?;

    let mut points = Vector::<Point>::new();
    for contour in geometry::external_contours(&inside)?.iter() {
        for p in contour.iter() {
            points.push(p);
        }
    }
    if points.is_empty() {
        return Err(GradingError::SegmentationError {
            reason: "no edge points inside outline".into(),
        });
    }

    let hull = geometry::convex_hull(&points)?;
    let hull_points = hull.to_vec();
    let ext = HullExtremes::from_points(&hull_points).ok_or_else(|| {
        GradingError::SegmentationError {
            reason: "empty melee hull".into(),
        }
    })?;
    if ext.touches_border(cols, rows) {
        return Err(ext.border_error());
    }

    let poly = approximate(&hull)?;
    let bounds =
        imgproc::bounding_rect(&poly).map_err(|e| GradingError::opencv("bounding rect", e))?;
    let area = imgproc::contour_area(&poly, false)
        .map_err(|e| GradingError::opencv("contour area", e))?;
    let perimeter =
        imgproc::arc_length(&hull, true).map_err(|e| GradingError::opencv("arc length", e))?;

    let mut mask = geometry::fill_convex(rows, cols, &hull_points)?;
    if shape == MaskShape::Partial {
        mask = geometry::restrict_to_partial(&mask, &hull_points)?;
    }

    Ok(SegmentationResult {
        mask: Some(mask),
        secondary_mask: None,
        metrics: ShapeMetrics {
            perimeter,
            area,
            width: bounds.width as f64,
            height: bounds.height as f64,
            pavilion_offset: ext.pavilion_offset(),
            secondary_area: 0.0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::rgb_to_bgr_mat;
    use image::{Rgb, RgbImage};

    fn disc(size: u32, r: f64) -> RgbImage {
        let c = size as f64 / 2.0;
        RgbImage::from_fn(size, size, |x, y| {
            let d = ((x as f64 - c).powi(2) + (y as f64 - c).powi(2)).sqrt();
            if d <= r {
                Rgb([60, 60, 60])
            } else {
                Rgb([230, 230, 230])
            }
        })
    }

    #[test]
    fn test_melee_disc() {
        let mat = rgb_to_bgr_mat(&disc(80, 18.0)).unwrap();
        let result = segment(&mat, &SegmentationParams::default(), MaskShape::Full).unwrap();
        let m = result.metrics;
        assert!(m.width > 32.0 && m.width < 44.0, "width {}", m.width);
        assert!((m.aspect_ratio() - 1.0).abs() < 0.1);
        let disc_area = std::f64::consts::PI * 18.0 * 18.0;
        assert!(m.area > disc_area * 0.8 && m.area < disc_area * 1.3);
        assert!(result.secondary_mask.is_none());
    }

    #[test]
    fn test_melee_partial_mask_smaller() {
        let mat = rgb_to_bgr_mat(&disc(80, 18.0)).unwrap();
        let params = SegmentationParams::default();
        let full = segment(&mat, &params, MaskShape::Full).unwrap();
        let partial = segment(&mat, &params, MaskShape::Partial).unwrap();
        let full_px = opencv::core::count_non_zero(full.mask.as_ref().unwrap()).unwrap();
        let partial_px = opencv::core::count_non_zero(partial.mask.as_ref().unwrap()).unwrap();
        assert!(partial_px < full_px);
    }
}
