//! Stone silhouette extraction
//!
//! A [`Segmenter`] isolates the stone in a single BGR capture and reports a
//! binary mask plus shape metrics. Three variants share one contract:
//!
//! - [`SegmenterKind::Default`]: contrast-stretched Canny edges, outlier
//!   filtered convex hull
//! - [`SegmenterKind::Refined`]: Kirsch gradient with iterative hull
//!   stabilization, cleft filling and exposure exclusion
//! - [`SegmenterKind::Melee`]: Kirsch gradient with a single hull pass, for
//!   small stones

pub mod contour;
pub mod geometry;
pub mod kirsch;
pub mod melee;
pub mod refined;

use image::GrayImage;
use opencv::core::Mat;
use serde::{Deserialize, Serialize};

use crate::constants::mask;
use crate::error::Result;
use crate::image_loader::mask_to_gray_image;

/// Segmentation algorithm selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SegmenterKind {
    Default,
    #[default]
    Refined,
    Melee,
}

/// Portion of the stone covered by the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaskShape {
    /// Whole silhouette
    #[default]
    Full,
    /// Cone-shaped mask for deep round brilliants: hull vertices past the
    /// girdle line are pulled onto the lower girdle vertex
    Partial,
}

/// Tunable segmentation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationParams {
    pub contrast: i32,
    pub smoothing_passes: u32,
    pub median_filter_size: i32,
    pub erode_passes: u32,
    pub canny_low: f64,
    pub canny_high: f64,
    /// Kirsch threshold for the outer outline
    pub outline_threshold: f64,
    /// Kirsch threshold for clefts inside the outline
    pub hull_threshold: f64,
    pub convex_hull_on_mask: bool,
    pub bright_threshold: Option<u8>,
    pub dark_threshold: Option<u8>,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            contrast: mask::CONTRAST,
            smoothing_passes: mask::SMOOTHING_PASSES,
            median_filter_size: mask::MEDIAN_FILTER_SIZE,
            erode_passes: mask::ERODE_PASSES,
            canny_low: mask::CANNY_LOW,
            canny_high: mask::CANNY_HIGH,
            outline_threshold: mask::K_THRESHOLD,
            hull_threshold: mask::HULL_THRESHOLD,
            convex_hull_on_mask: false,
            bright_threshold: None,
            dark_threshold: None,
        }
    }
}

impl SegmentationParams {
    /// Exposure exclusion requested
    pub fn has_exposure_limits(&self) -> bool {
        self.bright_threshold.is_some() || self.dark_threshold.is_some()
    }
}

/// Shape metrics of one silhouette, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShapeMetrics {
    pub perimeter: f64,
    pub area: f64,
    pub width: f64,
    pub height: f64,
    /// Lowest hull point minus the mean height of the girdle vertices
    pub pavilion_offset: f64,
    /// Area of the exposure-filtered secondary mask
    pub secondary_area: f64,
}

impl ShapeMetrics {
    /// Height over width, zero for an empty silhouette
    pub fn aspect_ratio(&self) -> f64 {
        if self.width > 0.0 {
            self.height / self.width
        } else {
            0.0
        }
    }
}

/// Output of one segmentation pass
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Binary stone mask, same size as the source; `None` when nothing was found
    pub mask: Option<Mat>,
    /// Mask with over/under-exposed pixels removed
    pub secondary_mask: Option<Mat>,
    pub metrics: ShapeMetrics,
}

impl SegmentationResult {
    /// Result for an image with no usable edge points
    pub fn empty() -> Self {
        Self {
            mask: None,
            secondary_mask: None,
            metrics: ShapeMetrics::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mask.is_none() || self.metrics.perimeter <= 0.0
    }

    /// Primary mask as a grayscale image for diagnostics
    pub fn mask_image(&self) -> Result<Option<GrayImage>> {
        self.mask.as_ref().map(mask_to_gray_image).transpose()
    }

    /// Secondary mask as a grayscale image for diagnostics
    pub fn secondary_mask_image(&self) -> Result<Option<GrayImage>> {
        self.secondary_mask
            .as_ref()
            .map(mask_to_gray_image)
            .transpose()
    }
}

/// Silhouette extractor dispatching to the configured variant
#[derive(Debug, Clone)]
pub struct Segmenter {
    kind: SegmenterKind,
    params: SegmentationParams,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SegmenterKind::default())
    }
}

impl Segmenter {
    /// Create a segmenter with default parameters
    pub fn new(kind: SegmenterKind) -> Self {
        Self {
            kind,
            params: SegmentationParams::default(),
        }
    }

    /// Create a segmenter with custom parameters
    pub fn with_params(kind: SegmenterKind, params: SegmentationParams) -> Self {
        Self { kind, params }
    }

    pub fn kind(&self) -> SegmenterKind {
        self.kind
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    /// Segment the stone in a BGR capture
    ///
    /// # Errors
    ///
    /// - `RegionTouchesBorder` when the silhouette reaches the frame edge
    /// - `ConvergenceError` when hull stabilization does not settle
    /// - `SegmentationError` when no outline survives filtering
    pub fn segment(&self, image: &Mat, shape: MaskShape) -> Result<SegmentationResult> {
        match self.kind {
            SegmenterKind::Default => contour::segment(image, &self.params, shape),
            SegmenterKind::Refined => refined::segment(image, &self.params, shape),
            SegmenterKind::Melee => melee::segment(image, &self.params, shape),
        }
    }
}
