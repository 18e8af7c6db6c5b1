//! Point-set geometry shared by the segmenter variants
//!
//! Outlier filtering, hull extreme vertices, the cone-mask clipping used for
//! deep stones, and a few thin wrappers over OpenCV mask operations.

use opencv::{
    core::{self, Mat, Point, Scalar, Vector, BORDER_CONSTANT, CV_8UC1},
    imgproc::{self, CHAIN_APPROX_SIMPLE, RETR_EXTERNAL},
    prelude::*,
};

use crate::error::{GradingError, Result};

/// Drop points whose distance from the centroid exceeds `mean + sigma * stddev`.
///
/// Uses the population standard deviation. Input order is preserved.
pub fn filter_outliers(points: &[Point], sigma: f64) -> Vec<Point> {
    if points.is_empty() {
        return Vec::new();
    }

    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;

    let distances: Vec<f64> = points
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .collect();

    let mean = distances.iter().sum::<f64>() / n;
    let variance = (distances.iter().map(|d| d * d).sum::<f64>() / n - mean * mean).max(0.0);
    let limit = mean + sigma * variance.sqrt();

    points
        .iter()
        .zip(&distances)
        .filter(|(_, &d)| d <= limit)
        .map(|(p, _)| *p)
        .collect()
}

/// Extreme vertices of a hull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HullExtremes {
    pub x_min: i32,
    /// Y of the leftmost vertex (topmost among ties)
    pub y_at_x_min: i32,
    pub x_max: i32,
    /// Y of the rightmost vertex (topmost among ties)
    pub y_at_x_max: i32,
    pub y_min: i32,
    pub y_max: i32,
}

impl HullExtremes {
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let mut ext = HullExtremes {
            x_min: first.x,
            y_at_x_min: first.y,
            x_max: first.x,
            y_at_x_max: first.y,
            y_min: first.y,
            y_max: first.y,
        };

        for p in &points[1..] {
            if p.x < ext.x_min || (p.x == ext.x_min && p.y < ext.y_at_x_min) {
                ext.x_min = p.x;
                ext.y_at_x_min = p.y;
            }
            if p.x > ext.x_max || (p.x == ext.x_max && p.y < ext.y_at_x_max) {
                ext.x_max = p.x;
                ext.y_at_x_max = p.y;
            }
            ext.y_min = ext.y_min.min(p.y);
            ext.y_max = ext.y_max.max(p.y);
        }

        Some(ext)
    }

    pub fn width(&self) -> f64 {
        (self.x_max - self.x_min) as f64
    }

    pub fn height(&self) -> f64 {
        (self.y_max - self.y_min) as f64
    }

    /// Mean height of the leftmost and rightmost vertices
    pub fn girdle_y(&self) -> f64 {
        (self.y_at_x_min + self.y_at_x_max) as f64 / 2.0
    }

    /// Vertical distance from the girdle line down to the lowest vertex
    pub fn pavilion_offset(&self) -> f64 {
        self.y_max as f64 - self.girdle_y()
    }

    /// Any extreme lies on the outermost pixel row or column
    pub fn touches_border(&self, cols: i32, rows: i32) -> bool {
        self.x_min <= 0 || self.x_max >= cols - 1 || self.y_min <= 0 || self.y_max >= rows - 1
    }

    pub fn border_error(&self) -> GradingError {
        GradingError::RegionTouchesBorder {
            x_min: self.x_min,
            x_max: self.x_max,
            y_min: self.y_min,
            y_max: self.y_max,
        }
    }
}

/// Pull every hull vertex below the girdle line onto the lower girdle vertex.
///
/// The result outlines the cone between the upper silhouette and the girdle,
/// which is what the partial mask samples on deep round brilliants.
pub fn clip_below_girdle(hull: &[Point], ext: &HullExtremes) -> Vec<Point> {
    let (line_y, anchor) = if ext.y_at_x_max >= ext.y_at_x_min {
        (ext.y_at_x_min, Point::new(ext.x_max, ext.y_at_x_max))
    } else {
        (ext.y_at_x_max, Point::new(ext.x_min, ext.y_at_x_min))
    };

    hull.iter()
        .map(|p| if p.y > line_y { anchor } else { *p })
        .collect()
}

/// All-zero single-channel mask
pub fn blank_mask(rows: i32, cols: i32) -> Result<Mat> {
    Mat::zeros(rows, cols, CV_8UC1)
        .map_err(|e| GradingError::opencv("create mask", e))?
        .to_mat()
        .map_err(|e| GradingError::opencv("materialize mask", e))
}

/// Fill a convex polygon into a fresh mask
pub fn fill_convex(rows: i32, cols: i32, polygon: &[Point]) -> Result<Mat> {
    let mut mask = blank_mask(rows, cols)?;
    let pts: Vector<Point> = polygon.iter().copied().collect();
    imgproc::fill_convex_poly(&mut mask, &pts, Scalar::all(255.0), imgproc::LINE_8, 0)
        .map_err(|e| GradingError::opencv("fill convex polygon", e))?;
    Ok(mask)
}

/// Fill every contour into a fresh mask
pub fn fill_contours(rows: i32, cols: i32, contours: &Vector<Vector<Point>>) -> Result<Mat> {
    let mut mask = blank_mask(rows, cols)?;
    if !contours.is_empty() {
        imgproc::fill_poly_def(&mut mask, contours, Scalar::all(255.0))
            .map_err(|e| GradingError::opencv("fill contours", e))?;
    }
    Ok(mask)
}

/// Erode `iterations` times with the given kernel (empty kernel = 3x3 rectangle)
pub fn erode(mask: &Mat, kernel: &Mat, iterations: u32) -> Result<Mat> {
    if iterations == 0 {
        return mask
            .try_clone()
            .map_err(|e| GradingError::opencv("clone mask", e));
    }
    let border = imgproc::morphology_default_border_value()
        .map_err(|e| GradingError::opencv("morphology border value", e))?;
    let mut out = Mat::default();
    imgproc::erode(
        mask,
        &mut out,
        kernel,
        Point::new(-1, -1),
        iterations as i32,
        BORDER_CONSTANT,
        border,
    )
    .map_err(|e| GradingError::opencv("erode", e))?;
    Ok(out)
}

/// Dilate `iterations` times with the given kernel
pub fn dilate(mask: &Mat, kernel: &Mat, iterations: u32) -> Result<Mat> {
    let border = imgproc::morphology_default_border_value()
        .map_err(|e| GradingError::opencv("morphology border value", e))?;
    let mut out = Mat::default();
    imgproc::dilate(
        mask,
        &mut out,
        kernel,
        Point::new(-1, -1),
        iterations as i32,
        BORDER_CONSTANT,
        border,
    )
    .map_err(|e| GradingError::opencv("dilate", e))?;
    Ok(out)
}

/// Outer contours of a binary image
pub fn external_contours(binary: &Mat) -> Result<Vector<Vector<Point>>> {
    let mut contours = Vector::<Vector<Point>>::new();
    imgproc::find_contours(
        binary,
        &mut contours,
        RETR_EXTERNAL,
        CHAIN_APPROX_SIMPLE,
        Point::new(0, 0),
    )
    .map_err(|e| GradingError::opencv("find contours", e))?;
    Ok(contours)
}

/// Largest contour by area, with its area
pub fn largest_contour(contours: &Vector<Vector<Point>>) -> Result<Option<(Vector<Point>, f64)>> {
    let mut best: Option<(Vector<Point>, f64)> = None;
    for contour in contours.iter() {
        let area = imgproc::contour_area(&contour, false)
            .map_err(|e| GradingError::opencv("contour area", e))?;
        if best.as_ref().map_or(true, |(_, a)| area > *a) {
            best = Some((contour, area));
        }
    }
    Ok(best)
}

/// Convex hull of a point set
pub fn convex_hull(points: &Vector<Point>) -> Result<Vector<Point>> {
    let mut hull = Vector::<Point>::new();
    imgproc::convex_hull(points, &mut hull, true, true)
        .map_err(|e| GradingError::opencv("convex hull", e))?;
    Ok(hull)
}

/// Restrict a mask to the cone below the girdle of its own hull
pub fn restrict_to_partial(mask: &Mat, hull: &[Point]) -> Result<Mat> {
    let ext = HullExtremes::from_points(hull).ok_or_else(|| GradingError::SegmentationError {
        reason: "empty hull for partial mask".into(),
    })?;
    let cone = fill_convex(mask.rows(), mask.cols(), &clip_below_girdle(hull, &ext))?;
    let mut out = Mat::default();
    core::bitwise_and_def(mask, &cone, &mut out)
        .map_err(|e| GradingError::opencv("intersect partial mask", e))?;
    Ok(out)
}
