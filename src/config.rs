//! Configuration structures for the gemgrade grading pipeline.
//!
//! This module defines all tunable parameters for grading, organized into
//! sections for silhouette extraction, proportion grouping and run control.
//!
//! # Configuration Loading
//!
//! Configuration can be loaded from JSON files or constructed programmatically:
//!
//! ```no_run
//! use gemgrade::GradingConfig;
//! use std::path::Path;
//!
//! // Load from file
//! let config = GradingConfig::from_json_file(Path::new("grading.json"))?;
//!
//! // Or fall back to the documented defaults when the file is unusable
//! let config = GradingConfig::load_or_default(Path::new("grading.json"));
//! # Ok::<(), gemgrade::GradingError>(())
//! ```
//!
//! # Configuration Sections
//!
//! - [`MaskSettings`]: contrast, smoothing, edge and hull thresholds
//! - [`ProportionThresholds`]: width-ratio and aspect-ratio group bounds
//! - [`PipelineSettings`]: segmenter variant, worker count, table selection

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::constants::{grading, mask, proportion};
use crate::error::{GradingError, Result};
use crate::segmentation::{SegmentationParams, SegmenterKind};

/// Complete grading configuration.
///
/// Serializable to/from JSON so that a measurement station can pin its
/// thresholds next to its calibration tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GradingConfig {
    /// Silhouette extraction settings
    #[serde(default)]
    pub mask: MaskSettings,

    /// Proportion grouping bounds
    #[serde(default)]
    pub proportion: ProportionThresholds,

    /// Run control
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Mask and threshold settings used by every segmenter variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskSettings {
    /// Contrast gain for the grayscale lookup table (percent, may be negative)
    pub contrast: i32,

    /// Median blur passes before edge detection
    pub smoothing_passes: u32,

    /// Median filter aperture (odd)
    pub median_filter_size: i32,

    /// Erosion passes applied to the filled hull
    pub erode_passes: u32,

    /// Canny hysteresis low threshold
    pub canny_low: f64,

    /// Canny hysteresis high threshold
    pub canny_high: f64,

    /// Kirsch gradient threshold for the outline
    pub k_threshold: f64,

    /// Kirsch gradient threshold for the outline when `use_lab_threshold` is set
    pub k_threshold_lab: f64,

    /// Use `k_threshold_lab` instead of `k_threshold`
    pub use_lab_threshold: bool,

    /// Kirsch gradient threshold for clefts inside the outline
    pub hull_threshold: f64,

    /// Outline threshold for calibration-stone captures
    pub k_threshold_cal: f64,

    /// Cleft threshold for calibration-stone captures
    pub hull_threshold_cal: f64,

    /// Replace the final contour by its convex hull before measuring
    pub convex_hull_on_mask: bool,

    /// Exclude stone pixels brighter than this gray level from the secondary mask
    pub bright_threshold: Option<u8>,

    /// Exclude stone pixels darker than this gray level from the secondary mask
    pub dark_threshold: Option<u8>,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            contrast: mask::CONTRAST,
            smoothing_passes: mask::SMOOTHING_PASSES,
            median_filter_size: mask::MEDIAN_FILTER_SIZE,
            erode_passes: mask::ERODE_PASSES,
            canny_low: mask::CANNY_LOW,
            canny_high: mask::CANNY_HIGH,
            k_threshold: mask::K_THRESHOLD,
            k_threshold_lab: mask::K_THRESHOLD_LAB,
            use_lab_threshold: false,
            hull_threshold: mask::HULL_THRESHOLD,
            k_threshold_cal: mask::K_THRESHOLD_CAL,
            hull_threshold_cal: mask::HULL_THRESHOLD_CAL,
            convex_hull_on_mask: false,
            bright_threshold: None,
            dark_threshold: None,
        }
    }
}

impl MaskSettings {
    /// Settings for capturing the calibration stone: the outline and cleft
    /// thresholds are swapped for their low-contrast counterparts.
    pub fn calibration_profile(&self) -> Self {
        Self {
            k_threshold: self.k_threshold_cal,
            hull_threshold: self.hull_threshold_cal,
            use_lab_threshold: false,
            ..self.clone()
        }
    }

    /// Segmentation parameters for one pass over a grading image pair
    pub fn grading_params(&self) -> SegmentationParams {
        SegmentationParams {
            smoothing_passes: mask::GRADING_SMOOTHING_PASSES,
            ..self.segmentation_params()
        }
    }

    /// Segmentation parameters as configured
    pub fn segmentation_params(&self) -> SegmentationParams {
        SegmentationParams {
            contrast: self.contrast,
            smoothing_passes: self.smoothing_passes,
            median_filter_size: self.median_filter_size,
            erode_passes: self.erode_passes,
            canny_low: self.canny_low,
            canny_high: self.canny_high,
            outline_threshold: if self.use_lab_threshold {
                self.k_threshold_lab
            } else {
                self.k_threshold
            },
            hull_threshold: self.hull_threshold,
            convex_hull_on_mask: self.convex_hull_on_mask,
            bright_threshold: self.bright_threshold,
            dark_threshold: self.dark_threshold,
        }
    }
}

/// Half-open aspect ratio band `[min, max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectBand {
    pub min: f64,
    pub max: f64,
}

impl AspectBand {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }
}

/// Width-ratio and aspect-ratio bounds for proportion grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProportionThresholds {
    /// Largest max/min width ratio for a round brilliant
    pub rbc_width_ratio: f64,
    /// Normal-depth band on the average aspect ratio for round brilliants
    pub rbc_aspect: AspectBand,
    pub fancy_l_width_ratio: f64,
    /// Normal-depth band on the minimum aspect ratio
    pub fancy_l_aspect: AspectBand,
    pub fancy_h_width_ratio: f64,
    pub fancy_h_aspect: AspectBand,
    pub fancy_hh_aspect: AspectBand,
}

impl Default for ProportionThresholds {
    fn default() -> Self {
        Self {
            rbc_width_ratio: proportion::RBC_WIDTH_RATIO,
            rbc_aspect: AspectBand::new(proportion::RBC_ASPECT_MIN, proportion::RBC_ASPECT_MAX),
            fancy_l_width_ratio: proportion::FANCY_L_WIDTH_RATIO,
            fancy_l_aspect: AspectBand::new(
                proportion::FANCY_L_ASPECT_MIN,
                proportion::FANCY_L_ASPECT_MAX,
            ),
            fancy_h_width_ratio: proportion::FANCY_H_WIDTH_RATIO,
            fancy_h_aspect: AspectBand::new(
                proportion::FANCY_H_ASPECT_MIN,
                proportion::FANCY_H_ASPECT_MAX,
            ),
            fancy_hh_aspect: AspectBand::new(
                proportion::FANCY_HH_ASPECT_MIN,
                proportion::FANCY_HH_ASPECT_MAX,
            ),
        }
    }
}

/// Run control for one grading invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Silhouette extraction variant
    pub segmenter: SegmenterKind,

    /// Worker threads; `None` uses the available parallelism
    pub workers: Option<usize>,

    /// Largest tolerated diamond/background count difference
    pub count_tolerance: usize,

    /// Treat captures as gamma-encoded sRGB instead of linear BGR
    pub assume_srgb: bool,

    /// Run the k-means breakdown on batch-boundary pairs
    pub compute_clusters: bool,

    /// Pairs per cluster batch; `None` uses the background image count
    pub cluster_batch: Option<usize>,

    /// Chroma shift applied by the shifting lookup
    pub chroma_shift: f64,

    /// Grade against the loose fancy table instead of round/fancy tables
    pub use_loose_table: bool,

    /// Lightness drift that flags a colour change; `None` disables the check
    pub photochromic_threshold: Option<f64>,

    /// Device identifier for the diagnostic comment
    pub device_name: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            segmenter: SegmenterKind::Refined,
            workers: None,
            count_tolerance: grading::COUNT_TOLERANCE,
            assume_srgb: false,
            compute_clusters: false,
            cluster_batch: None,
            chroma_shift: 0.0,
            use_loose_table: false,
            photochromic_threshold: None,
            device_name: grading::DEVICE_NAME.to_string(),
        }
    }
}

impl PipelineSettings {
    /// Resolve the worker count against the host
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}

impl GradingConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GradingError::config(format!("Failed to read {}", path.display()), e)
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            GradingError::config(format!("Failed to parse {}", path.display()), e)
        })?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GradingError::config("Failed to serialize configuration", e))?;
        std::fs::write(path, json).map_err(|e| {
            GradingError::config(format!("Failed to write {}", path.display()), e)
        })?;
        Ok(())
    }

    /// Load configuration, returning the documented defaults if the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::from_json_file(path) {
            Ok(config) => {
                info!(path = %path.display(), "loaded grading configuration");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default grading configuration");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mask_settings() {
        let settings = MaskSettings::default();
        assert_eq!(settings.contrast, 30);
        assert_eq!(settings.erode_passes, 1);
        assert_eq!(settings.k_threshold, 185.0);
        assert_eq!(settings.hull_threshold, 125.0);
        assert!(settings.bright_threshold.is_none());
    }

    #[test]
    fn test_calibration_profile_swaps_thresholds() {
        let profile = MaskSettings::default().calibration_profile();
        assert_eq!(profile.k_threshold, 55.0);
        assert_eq!(profile.hull_threshold, 25.0);
        assert_eq!(profile.canny_low, 25.0);
    }

    #[test]
    fn test_grading_params_use_three_passes() {
        let params = MaskSettings::default().grading_params();
        assert_eq!(params.smoothing_passes, 3);
        assert_eq!(params.outline_threshold, 185.0);

        let lab = MaskSettings {
            use_lab_threshold: true,
            ..MaskSettings::default()
        };
        assert_eq!(lab.segmentation_params().outline_threshold, 100.0);
    }

    #[test]
    fn test_aspect_band_half_open() {
        let band = AspectBand::new(0.58, 0.76);
        assert!(band.contains(0.58));
        assert!(!band.contains(0.76));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = GradingConfig::default();
        config.pipeline.workers = Some(4);
        config.mask.bright_threshold = Some(240);

        let json = serde_json::to_string(&config).unwrap();
        let parsed: GradingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let parsed: GradingConfig =
            serde_json::from_str(r#"{"pipeline": {"segmenter": "Default"}}"#).unwrap();
        assert_eq!(parsed.pipeline.segmenter, SegmenterKind::Default);
        assert_eq!(parsed.pipeline.count_tolerance, 3);
        assert_eq!(parsed.mask, MaskSettings::default());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = GradingConfig::load_or_default(Path::new("/nonexistent/grading.json"));
        assert_eq!(config, GradingConfig::default());
    }

    #[test]
    fn test_worker_count_positive() {
        let settings = PipelineSettings {
            workers: Some(0),
            ..PipelineSettings::default()
        };
        assert!(settings.worker_count() >= 1);
    }
}
