//! Kirsch-gradient silhouette with hull stabilization (refined variant)
//!
//! The outline is found by repeatedly taking the morphological gradient of
//! the thresholded Kirsch map and redrawing the convex hulls of its external
//! contours until the hull count settles. The largest hull bounds a second,
//! lower threshold that picks up clefts; those edges are closed and filled to
//! give the final mask. Optional bright/dark limits carve an exposure-safe
//! secondary mask out of it.

use opencv::{
    core::{self, Mat, Point, Scalar, Size, Vector},
    imgproc::{
        self, COLOR_BGR2GRAY, MORPH_ELLIPSE, MORPH_GRADIENT, THRESH_BINARY, THRESH_BINARY_INV,
    },
    prelude::*,
};
use tracing::debug;

use super::geometry::{self, HullExtremes};
use super::kirsch::kirsch_gradient;
use super::{MaskShape, SegmentationParams, SegmentationResult, ShapeMetrics};
use crate::constants::mask::{MAX_HULL_ITERATIONS, POLY_APPROX_EPSILON};
use crate::error::{GradingError, Result};

/// Passes of dilation, then erosion, used to close cleft edges
const CLOSE_PASSES: u32 = 2;

/// Final erosion passes on the filled cleft mask
const FINAL_ERODE_PASSES: u32 = 2;

pub(super) fn binary_threshold(src: &Mat, thresh: f64) -> Result<Mat> {
    let mut out = Mat::default();
    imgproc::threshold(src, &mut out, thresh, 255.0, THRESH_BINARY)
        .map_err(|e| GradingError::opencv("threshold", e))?;
    Ok(out)
}

pub(super) fn intersect(a: &Mat, b: &Mat) -> Result<Mat> {
    let mut out = Mat::default();
    core::bitwise_and_def(a, b, &mut out).map_err(|e| GradingError::opencv("bitwise and", e))?;
    Ok(out)
}

/// Threshold the Kirsch map and stabilize its convex hulls.
///
/// Returns the filled largest hull. Fails with `ConvergenceError` when the
/// hull count is still changing after `MAX_HULL_ITERATIONS` passes.
pub(super) fn stabilized_outline(kirsch: &Mat, threshold: f64) -> Result<Mat> {
    stabilized_outline_bounded(kirsch, threshold, MAX_HULL_ITERATIONS)
}

pub(super) fn stabilized_outline_bounded(
    kirsch: &Mat,
    threshold: f64,
    max_iterations: usize,
) -> Result<Mat> {
    let rows = kirsch.rows();
    let cols = kirsch.cols();

    let kernel =
        imgproc::get_structuring_element(MORPH_ELLIPSE, Size::new(2, 2), Point::new(-1, -1))
            .map_err(|e| GradingError::opencv("outline kernel", e))?;

    let mut current = binary_threshold(kirsch, threshold)?;
    let mut hull_count = 0usize;
    let mut loops = 0usize;

    let hulls = loop {
        loops += 1;

        let mut gradient = Mat::default();
        imgproc::morphology_ex_def(&current, &mut gradient, MORPH_GRADIENT, &kernel)
            .map_err(|e| GradingError::opencv("morphological gradient", e))?;

        let contours = geometry::external_contours(&gradient)?;
        let mut hulls = Vector::<Vector<Point>>::new();
        for contour in contours.iter() {
            hulls.push(geometry::convex_hull(&contour)?);
        }

        if hulls.len() == hull_count {
            break hulls;
        }
        if loops >= max_iterations {
            return Err(GradingError::ConvergenceError { iterations: loops });
        }

        let mut drawing = geometry::blank_mask(rows, cols)?;
        imgproc::draw_contours_def(&mut drawing, &hulls, -1, Scalar::all(255.0))
            .map_err(|e| GradingError::opencv("draw hulls", e))?;
        hull_count = hulls.len();
        current = drawing;
    };
    debug!(iterations = loops, hulls = hulls.len(), "hull stabilization settled");

    let (best, _) =
        geometry::largest_contour(&hulls)?.ok_or_else(|| GradingError::SegmentationError {
            reason: "no outline above threshold".into(),
        })?;

    geometry::fill_convex(rows, cols, &best.to_vec())
}

/// Remove over- and under-exposed pixels from the mask
fn exposure_mask(image: &Mat, mask: &Mat, params: &SegmentationParams) -> Result<Mat> {
    let mut masked = Mat::default();
    image
        .copy_to_masked(&mut masked, mask)
        .map_err(|e| GradingError::opencv("mask source", e))?;

    let mut gray = Mat::default();
    imgproc::cvt_color_def(&masked, &mut gray, COLOR_BGR2GRAY)
        .map_err(|e| GradingError::opencv("grayscale conversion", e))?;

    let mut secondary = mask
        .try_clone()
        .map_err(|e| GradingError::opencv("clone mask", e))?;

    if let Some(bright) = params.bright_threshold {
        let mut keep = Mat::default();
        imgproc::threshold(&gray, &mut keep, bright as f64, 255.0, THRESH_BINARY_INV)
            .map_err(|e| GradingError::opencv("bright threshold", e))?;
        secondary = intersect(&secondary, &keep)?;
    }
    if let Some(dark) = params.dark_threshold {
        let keep = binary_threshold(&gray, dark as f64)?;
        secondary = intersect(&secondary, &keep)?;
    }

    Ok(secondary)
}

/// Area of the largest region of a mask, optionally taken on its hull polygon
fn region_area(mask: &Mat, convex: bool) -> Result<f64> {
    let contours = geometry::external_contours(mask)?;
    let Some((largest, area)) = geometry::largest_contour(&contours)? else {
        return Ok(0.0);
    };
    if !convex {
        return Ok(area);
    }
    let hull = geometry::convex_hull(&largest)?;
    let poly = approximate(&hull)?;
    imgproc::contour_area(&poly, false).map_err(|e| GradingError::opencv("contour area", e))
}

pub(super) fn approximate(curve: &Vector<Point>) -> Result<Vector<Point>> {
    let mut poly = Vector::<Point>::new();
    imgproc::approx_poly_dp(curve, &mut poly, POLY_APPROX_EPSILON, true)
        .map_err(|e| GradingError::opencv("polygon approximation", e))?;
    Ok(poly)
}

/// Run the refined segmentation on a BGR image
pub fn segment(
    image: &Mat,
    params: &SegmentationParams,
    shape: MaskShape,
) -> Result<SegmentationResult> {
    let rows = image.rows();
    let cols = image.cols();

    // Step 1: stabilized outer outline
    let kirsch = kirsch_gradient(image)?;
    let outline = stabilized_outline(&kirsch, params.outline_threshold)?;

    // Step 2: clefts inside the outline
    let inside = intersect(&binary_threshold(&kirsch, params.hull_threshold)?, &outline)?;
    let mut edges = Mat::default();
    imgproc::canny(&inside, &mut edges, params.canny_low, params.canny_high, 3, false)
        .map_err(|e| GradingError::opencv("canny", e))?;

    let kernel = imgproc::get_structuring_element(MORPH_ELLIPSE, Size::new(5, 5), Point::new(2, 2))
        .map_err(|e| GradingError::opencv("close kernel", e))?;
    let closed = geometry::erode(
        &geometry::dilate(&edges, &kernel, CLOSE_PASSES)?,
        &kernel,
        CLOSE_PASSES,
    )?;

    // Step 3: filled, eroded mask
    let filled = geometry::fill_contours(rows, cols, &geometry::external_contours(&closed)?)?;
    let mut mask = geometry::erode(&filled, &kernel, FINAL_ERODE_PASSES)?;

    // Step 4: final outline and geometry
    let contours = geometry::external_contours(&mask)?;
    let (largest, _) =
        geometry::largest_contour(&contours)?.ok_or_else(|| GradingError::SegmentationError {
            reason: "no region left after cleft filling".into(),
        })?;
    let hull = geometry::convex_hull(&largest)?;
    let final_outline = if params.convex_hull_on_mask {
        hull.clone()
    } else {
        largest
    };

    let poly = approximate(&final_outline)?;
    let bounds =
        imgproc::bounding_rect(&poly).map_err(|e| GradingError::opencv("bounding rect", e))?;
    let perimeter = imgproc::arc_length(&final_outline, true)
        .map_err(|e| GradingError::opencv("arc length", e))?;

    let hull_points = hull.to_vec();
    let ext = HullExtremes::from_points(&hull_points).ok_or_else(|| {
        GradingError::SegmentationError {
            reason: "empty outline hull".into(),
        }
    })?;
    if ext.touches_border(cols, rows) {
        return Err(ext.border_error());
    }

    if shape == MaskShape::Partial {
        mask = geometry::restrict_to_partial(&mask, &hull_points)?;
    }

    // Step 5: exposure-filtered secondary mask
    let (secondary_mask, secondary_area) = if params.has_exposure_limits() {
        let secondary = exposure_mask(image, &mask, params)?;
        let area = region_area(&secondary, params.convex_hull_on_mask)?;
        (Some(secondary), area)
    } else {
        (None, 0.0)
    };

    let area = core::count_non_zero(&mask).map_err(|e| GradingError::opencv("mask area", e))?;

    Ok(SegmentationResult {
        mask: Some(mask),
        secondary_mask,
        metrics: ShapeMetrics {
            perimeter,
            area: area as f64,
            width: bounds.width as f64,
            height: bounds.height as f64,
            pavilion_offset: ext.pavilion_offset(),
            secondary_area,
        },
    })
}
