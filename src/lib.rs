//! # gemgrade
//!
//! Automated colour grading of gemstones from calibrated photograph sets.
//!
//! A grading run takes a series of diamond captures (the stone rotated on a
//! lit stage) and matching background captures, and:
//! - Isolates the stone silhouette in every capture
//! - Measures calibrated Lab colour of the stone against its background
//! - Classifies the stone's proportions from the silhouettes
//! - Looks up the colour grade in the station's boundary tables
//!
//! ## Example
//!
//! ```rust,no_run
//! use gemgrade::{grade_stone, load_image_set, CalibrationConfig, GradingConfig};
//! use std::path::Path;
//!
//! let config = GradingConfig::load_or_default(Path::new("grading.json"));
//! let calibration = CalibrationConfig::load_or_default(
//!     Some(Path::new("adjustment.json")),
//!     Path::new("boundary.csv"),
//!     None,
//! );
//! let images = load_image_set(&["d0.png", "d1.png"], &["bg0.png", "bg1.png"])?;
//!
//! let result = grade_stone(&images, &config, calibration);
//! println!("{}: {:?}", result.disposition, result.grade_label());
//! # Ok::<(), gemgrade::GradingError>(())
//! ```

pub mod calibration;
pub mod color;
pub mod config;
pub mod constants;
pub mod error;
pub mod grading;
pub mod image_loader;
pub mod pipeline;
pub mod segmentation;

pub use calibration::{CalibrationConfig, LabAdjustment};
pub use color::{ColorSample, LabSample, UnevennessFlags};
pub use config::GradingConfig;
pub use error::{GradingError, Result};
pub use grading::{GradeOutcome, GradeTables, ShapeGroup};
pub use image_loader::{load_image, load_image_set, ImagePair, ImageSet};
pub use pipeline::{AggregateResult, AggregationOrchestrator, Disposition};
pub use segmentation::{MaskShape, Segmenter, SegmenterKind};

use tracing::error;

use pipeline::RemeasureReason;

/// Grade one stone with a freshly built orchestrator
///
/// Never fails: problems with the captures or the run are reported through
/// [`AggregateResult::disposition`].
pub fn grade_stone(
    images: &ImageSet,
    config: &GradingConfig,
    calibration: CalibrationConfig,
) -> AggregateResult {
    let checksum = calibration.tables.checksum().to_string();
    match AggregationOrchestrator::new(config, calibration) {
        Ok(orchestrator) => orchestrator.grade_stone(images),
        Err(e) => {
            error!(error = %e, "could not start grading run");
            let mut result = AggregateResult::remeasure(RemeasureReason::ProcessFailure, checksum);
            result.notes.push(e.to_string());
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_needs_remeasure() {
        let result = grade_stone(
            &ImageSet::default(),
            &GradingConfig::default(),
            CalibrationConfig::default(),
        );
        assert!(result.disposition.needs_remeasurement());
        assert!(result.grade.is_none());
    }
}
