//! Final grading output

use std::fmt;

use serde::{Deserialize, Serialize};

use super::aggregate::{PairClusters, RejectedPair};
use crate::color::ColorSample;
use crate::grading::{GradeOutcome, ShapeGroup};
use crate::segmentation::ShapeMetrics;

/// Why a graded stone still needs a human look
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewReason {
    /// No table row matched
    NoGrade,
    /// Matched row is flagged as a reference stone
    ReferenceStone,
    /// Deep round brilliant graded from the partial mask
    Depth,
}

/// Why the captures must be taken again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemeasureReason {
    FailedImages { valid: usize, total: usize },
    CountMismatch { diamonds: usize, backgrounds: usize },
    ProcessFailure,
}

/// Terminal verdict of a grading run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disposition {
    Finalized,
    VisualReview(ReviewReason),
    Remeasure(RemeasureReason),
}

impl Disposition {
    /// Operator-facing status line
    pub fn message(&self) -> String {
        match self {
            Disposition::Finalized => "FINALIZED".to_string(),
            Disposition::VisualReview(ReviewReason::NoGrade) => "GO TO VISUAL".to_string(),
            Disposition::VisualReview(ReviewReason::ReferenceStone) => {
                "GO TO VISUAL - ANALYZE".to_string()
            }
            Disposition::VisualReview(ReviewReason::Depth) => "GO TO VISUAL - DEPTH".to_string(),
            Disposition::Remeasure(RemeasureReason::FailedImages { valid, total }) => {
                format!("Measure again: failed image ={}/{}", valid, total)
            }
            Disposition::Remeasure(RemeasureReason::CountMismatch {
                diamonds,
                backgrounds,
            }) => format!("Measure again: diamond/bg ={}/{}", diamonds, backgrounds),
            Disposition::Remeasure(RemeasureReason::ProcessFailure) => {
                "Measure again: process failure".to_string()
            }
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Disposition::Finalized)
    }

    pub fn needs_remeasurement(&self) -> bool {
        matches!(self, Disposition::Remeasure(_))
    }

    pub fn needs_visual_review(&self) -> bool {
        matches!(self, Disposition::VisualReview(_))
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// Outcome of [`grade_stone`](super::AggregationOrchestrator::grade_stone).
///
/// Grade-related fields are `None` when the run stopped before a grade
/// could be computed (count mismatch, process failure, or no valid pair).
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub disposition: Disposition,
    /// Averaged sample the grade was looked up with
    pub sample: Option<ColorSample>,
    /// Averaged exposure-filtered sample, when the segmenter produced one
    pub secondary_sample: Option<ColorSample>,
    /// Averaged silhouette metrics of the grading pass
    pub metrics: ShapeMetrics,
    pub width_ratio: f64,
    /// Average aspect for round stones, minimum for fancy shapes
    pub aspect: f64,
    pub shape_group: Option<ShapeGroup>,
    pub grade: Option<GradeOutcome>,
    /// Sampled fraction of the stone
    pub volume: f64,
    /// Comma separated diagnostic record
    pub comment: String,
    pub notes: Vec<String>,
    /// Lightness drift when it exceeded the photochromic threshold
    pub color_change: Option<f64>,
    pub clusters: Vec<PairClusters>,
    pub rejected: Vec<RejectedPair>,
    /// Audit checksum of the boundary tables used
    pub table_checksum: String,
}

impl AggregateResult {
    /// Result carrying only a verdict
    pub fn remeasure(reason: RemeasureReason, table_checksum: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Remeasure(reason),
            sample: None,
            secondary_sample: None,
            metrics: ShapeMetrics::default(),
            width_ratio: 0.0,
            aspect: 0.0,
            shape_group: None,
            grade: None,
            volume: 1.0,
            comment: String::new(),
            notes: Vec::new(),
            color_change: None,
            clusters: Vec::new(),
            rejected: Vec::new(),
            table_checksum: table_checksum.into(),
        }
    }

    pub fn grade_label(&self) -> Option<&str> {
        self.grade.as_ref().map(|g| g.grade.as_str())
    }
}

/// Fields of the diagnostic record
pub struct CommentFields<'a> {
    pub device: &'a str,
    pub volume: f64,
    pub sample: &'a ColorSample,
    pub grade: &'a GradeOutcome,
    pub metrics: &'a ShapeMetrics,
    pub width_ratio: f64,
    pub aspect: f64,
    pub group: ShapeGroup,
}

/// Assemble the diagnostic record.
///
/// Layout: device, volume, diamond L/a/b, background L/a/b, calibrated
/// L/a/b, C, H, lightness/chroma/hue descriptions, table version, mean
/// perimeter, area, height, pavilion offset, width ratio, aspect, group.
pub fn build_comment(fields: &CommentFields<'_>) -> String {
    let s = fields.sample;
    let m = fields.metrics;
    let numbers = |values: &[f64]| {
        values
            .iter()
            .map(|v| format!("{:.4}", v))
            .collect::<Vec<_>>()
    };

    let mut parts = vec![fields.device.to_string()];
    parts.extend(numbers(&[
        fields.volume,
        s.diamond.l,
        s.diamond.a,
        s.diamond.b,
        s.background.l,
        s.background.a,
        s.background.b,
        s.calibrated.l,
        s.calibrated.a,
        s.calibrated.b,
        s.chroma(),
        s.hue(),
    ]));
    parts.push(fields.grade.lightness_description.clone());
    parts.push(fields.grade.grade.clone());
    parts.push(fields.grade.hue_description.clone());
    parts.push(fields.grade.version.clone());
    parts.extend(numbers(&[
        m.perimeter,
        m.area,
        m.height,
        m.pavilion_offset,
        fields.width_ratio,
        fields.aspect,
    ]));
    parts.push(fields.group.label().to_string());
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::LabSample;

    #[test]
    fn test_disposition_messages() {
        assert_eq!(Disposition::Finalized.to_string(), "FINALIZED");
        assert_eq!(
            Disposition::Remeasure(RemeasureReason::CountMismatch {
                diamonds: 10,
                backgrounds: 5
            })
            .message(),
            "Measure again: diamond/bg =10/5"
        );
        assert_eq!(
            Disposition::Remeasure(RemeasureReason::FailedImages { valid: 7, total: 8 }).message(),
            "Measure again: failed image =7/8"
        );
        assert_eq!(
            Disposition::VisualReview(ReviewReason::Depth).message(),
            "GO TO VISUAL - DEPTH"
        );
        assert!(Disposition::VisualReview(ReviewReason::NoGrade).needs_visual_review());
        assert!(Disposition::Remeasure(RemeasureReason::ProcessFailure).needs_remeasurement());
    }

    #[test]
    fn test_comment_layout() {
        let sample = ColorSample {
            diamond: LabSample::new(80.0, 1.0, 6.0),
            background: LabSample::new(95.0, 0.0, 1.0),
            calibrated: LabSample::new(0.8421, 1.0, 5.0),
        };
        let grade = GradeOutcome {
            grade: "K".into(),
            hue_description: "Yellow".into(),
            lightness_description: "N/A".into(),
            reference: false,
            version: "v3".into(),
            multi_color: false,
        };
        let metrics = ShapeMetrics {
            perimeter: 400.0,
            area: 9000.0,
            width: 120.0,
            height: 78.0,
            pavilion_offset: 30.0,
            secondary_area: 0.0,
        };
        let comment = build_comment(&CommentFields {
            device: "CV",
            volume: 1.0,
            sample: &sample,
            grade: &grade,
            metrics: &metrics,
            width_ratio: 1.02,
            aspect: 0.65,
            group: ShapeGroup::RbcNormal,
        });

        let fields: Vec<&str> = comment.split(", ").collect();
        assert_eq!(fields.len(), 24);
        assert_eq!(fields[0], "CV");
        assert_eq!(fields[1], "1.0000");
        assert_eq!(fields[8], "0.8421");
        assert_eq!(fields[13], "N/A");
        assert_eq!(fields[14], "K");
        assert_eq!(fields[15], "Yellow");
        assert_eq!(fields[16], "v3");
        assert_eq!(fields[21], "1.0200");
        assert_eq!(fields[23], "RBC: Normal ");
    }
}
