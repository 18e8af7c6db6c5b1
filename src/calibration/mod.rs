//! Station calibration
//!
//! A [`CalibrationConfig`] bundles the linear Lab adjustment measured for a
//! grading station with the boundary tables used for grade lookup. It is an
//! explicit value handed to the orchestrator; nothing here is global.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::color::conversion::LabSample;
use crate::error::{GradingError, Result};
use crate::grading::table::GradeTables;

/// Linear correction from raw diamond/background means to calibrated Lab
///
/// `L = conv_l·(L_d/L_bg − shift_l)`, `a = conv_a·(a_d − a_bg − shift_a)`,
/// `b = conv_b·(b_d − b_bg − shift_b)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabAdjustment {
    pub conv_l: f64,
    pub conv_a: f64,
    pub conv_b: f64,
    pub shift_l: f64,
    pub shift_a: f64,
    pub shift_b: f64,
}

impl Default for LabAdjustment {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl LabAdjustment {
    pub const IDENTITY: LabAdjustment = LabAdjustment {
        conv_l: 1.0,
        conv_a: 1.0,
        conv_b: 1.0,
        shift_l: 0.0,
        shift_a: 0.0,
        shift_b: 0.0,
    };

    /// Calibrate a diamond mean against its background mean
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the background lightness is zero or not finite.
    pub fn apply(&self, diamond: &LabSample, background: &LabSample) -> Result<LabSample> {
        if !(background.l.is_finite() && background.l > 0.0) {
            return Err(GradingError::InvalidInput {
                reason: format!("background lightness {} cannot normalize", background.l),
            });
        }
        Ok(LabSample::new(
            self.conv_l * (diamond.l / background.l - self.shift_l),
            self.conv_a * (diamond.a - background.a - self.shift_a),
            self.conv_b * (diamond.b - background.b - self.shift_b),
        ))
    }

    /// Read an adjustment from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| GradingError::config(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| GradingError::config(format!("parsing {}", path.display()), e))
    }
}

/// Everything a grading run needs to know about the station
#[derive(Debug, Clone, Default)]
pub struct CalibrationConfig {
    pub adjustment: LabAdjustment,
    pub tables: GradeTables,
}

impl CalibrationConfig {
    pub fn new(adjustment: LabAdjustment, tables: GradeTables) -> Self {
        Self { adjustment, tables }
    }

    /// Load the adjustment and boundary tables from disk.
    ///
    /// A missing or unreadable adjustment falls back to identity; the
    /// boundary table is required. The loose-fancy table is optional.
    pub fn load(
        adjustment_path: Option<&Path>,
        boundary_path: &Path,
        loose_path: Option<&Path>,
    ) -> Result<Self> {
        let adjustment = load_adjustment(adjustment_path);

        let mut tables = GradeTables::from_boundary_file(boundary_path)?;
        if let Some(path) = loose_path {
            tables.load_loose_file(path)?;
        }
        info!(
            checksum = %tables.checksum(),
            version = %tables.version(),
            "calibration tables loaded"
        );

        Ok(Self { adjustment, tables })
    }

    /// Load calibration, degrading instead of failing.
    ///
    /// An unusable boundary table leaves the tables empty, so every lookup
    /// resolves to "N/A". An unusable loose table is skipped and the
    /// boundary tables are kept.
    pub fn load_or_default(
        adjustment_path: Option<&Path>,
        boundary_path: &Path,
        loose_path: Option<&Path>,
    ) -> Self {
        let adjustment = load_adjustment(adjustment_path);

        let mut tables = match GradeTables::from_boundary_file(boundary_path) {
            Ok(tables) => tables,
            Err(e) => {
                warn!(
                    path = %boundary_path.display(),
                    error = %e,
                    "boundary table unusable, grades will be N/A"
                );
                return Self {
                    adjustment,
                    tables: GradeTables::default(),
                };
            }
        };
        if let Some(path) = loose_path {
            if let Err(e) = tables.load_loose_file(path) {
                warn!(path = %path.display(), error = %e, "skipping loose table");
            }
        }
        info!(
            checksum = %tables.checksum(),
            version = %tables.version(),
            "calibration tables loaded"
        );

        Self { adjustment, tables }
    }
}

fn load_adjustment(path: Option<&Path>) -> LabAdjustment {
    match path {
        Some(path) => LabAdjustment::from_json_file(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "using identity Lab adjustment");
            LabAdjustment::IDENTITY
        }),
        None => LabAdjustment::IDENTITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_adjustment() {
        let d = LabSample::new(80.0, -1.5, 4.0);
        let bg = LabSample::new(100.0, 0.5, 1.0);
        let out = LabAdjustment::IDENTITY.apply(&d, &bg).unwrap();
        assert!((out.l - 0.8).abs() < 1e-12);
        assert!((out.a + 2.0).abs() < 1e-12);
        assert!((out.b - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_adjustment_formula() {
        let adj = LabAdjustment {
            conv_l: 100.0,
            conv_a: 2.0,
            conv_b: 0.5,
            shift_l: 0.1,
            shift_a: 1.0,
            shift_b: -2.0,
        };
        let d = LabSample::new(90.0, 3.0, 6.0);
        let bg = LabSample::new(100.0, 1.0, 2.0);
        let out = adj.apply(&d, &bg).unwrap();
        assert!((out.l - 80.0).abs() < 1e-9);
        assert!((out.a - 2.0).abs() < 1e-12);
        assert!((out.b - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_background_lightness() {
        let d = LabSample::new(50.0, 0.0, 0.0);
        let bg = LabSample::default();
        assert!(matches!(
            LabAdjustment::IDENTITY.apply(&d, &bg),
            Err(GradingError::InvalidInput { .. })
        ));
    }

    fn scratch_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gemgrade-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_missing_boundary_degrades() {
        let missing = Path::new("/nonexistent/gemgrade/boundary.csv");
        assert!(matches!(
            CalibrationConfig::load(None, missing, None),
            Err(GradingError::CalibrationError { line: 0, .. })
        ));

        let config = CalibrationConfig::load_or_default(None, missing, None);
        assert!(config.tables.round.is_empty());
        assert!(config.tables.fancy.is_empty());
        assert_eq!(config.tables.version(), "N/A");
        assert_eq!(config.adjustment, LabAdjustment::IDENTITY);
    }

    #[test]
    fn test_malformed_boundary_degrades() {
        let path = scratch_file(
            "malformed.csv",
            "header\n-180,180,0,oops,0,200,D,FALSE,v1,Round,X\n",
        );
        let config = CalibrationConfig::load_or_default(None, &path, None);
        assert!(config.tables.round.is_empty());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_bad_loose_table_keeps_boundary() {
        let boundary = scratch_file(
            "boundary.csv",
            "header\n-180,180,0,1.0,0,200,D,FALSE,v1,Round,Colorless\n",
        );
        let missing_loose = Path::new("/nonexistent/gemgrade/loose.csv");
        let config = CalibrationConfig::load_or_default(None, &boundary, Some(missing_loose));
        assert_eq!(config.tables.round.len(), 1);
        assert!(config.tables.loose.is_none());
        std::fs::remove_file(&boundary).ok();
    }

    #[test]
    fn test_partial_json() {
        let adj: LabAdjustment = serde_json::from_str(r#"{"conv_l": 95.0}"#).unwrap();
        assert_eq!(adj.conv_l, 95.0);
        assert_eq!(adj.conv_a, 1.0);
        assert_eq!(adj.shift_b, 0.0);
    }
}
