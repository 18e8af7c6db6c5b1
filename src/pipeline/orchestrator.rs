//! Multi-pair grading runs
//!
//! [`AggregationOrchestrator::grade_stone`] fans the image pairs out over a
//! bounded worker pool, joins, classifies the aggregated geometry, and looks
//! up the grade. Deep round brilliants get a second fan-out with the partial
//! mask before the lookup. Errors never escape a run: they are folded into
//! the [`Disposition`] of the returned [`AggregateResult`].

use image::RgbImage;
use opencv::imgproc;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use super::aggregate::{PairOutcome, PassAggregate, RejectedPair};
use super::measure::{ImagePairMeasurer, PairMeasurer};
use super::result::{
    build_comment, AggregateResult, CommentFields, Disposition, RemeasureReason, ReviewReason,
};
use crate::calibration::CalibrationConfig;
use crate::color::{self, UnevennessFlags};
use crate::config::{GradingConfig, PipelineSettings};
use crate::error::{GradingError, Result};
use crate::grading::ProportionClassifier;
use crate::image_loader::{rgb_to_bgr_mat, ImagePair, ImageSet};
use crate::segmentation::{MaskShape, Segmenter};

/// Coordinates grading runs over image sets
pub struct AggregationOrchestrator<M: PairMeasurer = ImagePairMeasurer> {
    measurer: M,
    calibration: CalibrationConfig,
    classifier: ProportionClassifier,
    settings: PipelineSettings,
    pool: ThreadPool,
}

impl AggregationOrchestrator<ImagePairMeasurer> {
    /// Orchestrator measuring real captures with the configured segmenter
    pub fn new(config: &GradingConfig, calibration: CalibrationConfig) -> Result<Self> {
        let segmenter =
            Segmenter::with_params(config.pipeline.segmenter, config.mask.grading_params());
        let measurer = ImagePairMeasurer::new(
            segmenter,
            calibration.adjustment,
            config.pipeline.assume_srgb,
        );
        Self::with_measurer(config, calibration, measurer)
    }

    /// Check that the stone sits within `max_distance` pixels of `expected_center`
    pub fn check_centered(
        &self,
        image: &RgbImage,
        expected_center: (f64, f64),
        max_distance: f64,
    ) -> Result<CenterCheck> {
        check_centered(self.measurer.segmenter(), image, expected_center, max_distance)
    }

    /// Brightness and hue evenness of the stone in one capture
    pub fn detect_uneven_regions(&self, image: &RgbImage) -> Result<UnevennessFlags> {
        image_unevenness(self.measurer.segmenter(), image)
    }
}

impl<M: PairMeasurer> AggregationOrchestrator<M> {
    /// Orchestrator with a custom per-pair measurer
    pub fn with_measurer(
        config: &GradingConfig,
        calibration: CalibrationConfig,
        measurer: M,
    ) -> Result<Self> {
        let workers = config.pipeline.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("gemgrade-worker-{}", i))
            .build()
            .map_err(|e| GradingError::processing(format!("worker pool: {}", e)))?;

        Ok(Self {
            measurer,
            calibration,
            classifier: ProportionClassifier::new(config.proportion.clone()),
            settings: config.pipeline.clone(),
            pool,
        })
    }

    pub fn calibration(&self) -> &CalibrationConfig {
        &self.calibration
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn measurer(&self) -> &M {
        &self.measurer
    }

    /// Grade one stone from its capture set.
    ///
    /// Count mismatches beyond the tolerance stop the run before any
    /// measurement, as does a set with no diamond or no background capture.
    /// Per-pair segmentation failures drop that pair and force a remeasure
    /// verdict; anything else aborts with a process failure.
    pub fn grade_stone(&self, images: &ImageSet) -> AggregateResult {
        let diamonds = images.diamonds.len();
        let backgrounds = images.backgrounds.len();
        info!(
            diamonds,
            backgrounds,
            workers = self.pool.current_num_threads(),
            "grading run started"
        );

        let unpairable = diamonds == 0 || backgrounds == 0;
        if unpairable || images.count_difference() > self.settings.count_tolerance {
            warn!(diamonds, backgrounds, "diamond/background count mismatch");
            return AggregateResult::remeasure(
                RemeasureReason::CountMismatch {
                    diamonds,
                    backgrounds,
                },
                self.calibration.tables.checksum(),
            );
        }

        match self.grade_pairs(images) {
            Ok(result) => {
                info!(
                    grade = result.grade_label().unwrap_or("-"),
                    disposition = %result.disposition,
                    "grading run finished"
                );
                result
            }
            Err(e) => {
                error!(error = %e, source = ?std::error::Error::source(&e), "grading run aborted");
                let mut result = AggregateResult::remeasure(
                    RemeasureReason::ProcessFailure,
                    self.calibration.tables.checksum(),
                );
                result.notes.push(e.to_string());
                result
            }
        }
    }

    fn cluster_batch(&self, images: &ImageSet) -> usize {
        self.settings
            .cluster_batch
            .unwrap_or(images.backgrounds.len())
            .max(1)
    }

    /// One fan-out/join over every pair with the given mask shape
    pub fn run_pass(
        &self,
        pairs: &[ImagePair<'_>],
        shape: MaskShape,
        cluster_batch: usize,
    ) -> Result<PassAggregate> {
        let batch = cluster_batch.max(1);
        let outcomes = self.pool.install(|| {
            pairs
                .par_iter()
                .map(|pair| {
                    let clusters =
                        self.settings.compute_clusters && (pair.index + 1) % batch == 0;
                    match self.measurer.measure(pair, shape, clusters) {
                        Ok(m) => Ok(PairOutcome::Measured(m)),
                        Err(e) if e.is_recoverable() => {
                            warn!(pair = pair.index, error = %e, "pair rejected");
                            Ok(PairOutcome::Rejected(RejectedPair {
                                index: pair.index,
                                reason: e.to_string(),
                            }))
                        }
                        Err(e) => Err(e),
                    }
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let pass = PassAggregate::from_outcomes(pairs.len(), outcomes);
        debug!(
            shape = ?shape,
            valid = pass.valid(),
            total = pass.total,
            "measurement pass joined"
        );
        Ok(pass)
    }

    fn grade_pairs(&self, images: &ImageSet) -> Result<AggregateResult> {
        let pairs = images.pairs();
        let total = images.diamonds.len();
        let batch = self.cluster_batch(images);
        let checksum = self.calibration.tables.checksum();

        let first = self.run_pass(&pairs, MaskShape::Full, batch)?;
        let group = self.classifier.classify(&first.geometry);
        let width_ratio = first.geometry.width_ratio();
        let aspect = first.geometry.aspect_for(group);
        let first_valid = first.valid();

        let (pass, depth_review) = if group.needs_partial_pass() {
            info!(group = %group, aspect, "re-measuring deep stone with partial mask");
            (self.run_pass(&pairs, MaskShape::Partial, batch)?, true)
        } else {
            (first, false)
        };

        let valid = first_valid.min(pass.valid());
        let Some(sample) = pass.sample() else {
            let reason = RemeasureReason::FailedImages { valid, total };
            let mut result = AggregateResult::remeasure(reason, checksum);
            result.rejected = pass.rejected;
            return Ok(result);
        };

        let grade = self.calibration.tables.grade(
            sample.hue(),
            sample.chroma(),
            sample.lightness(),
            group,
            self.settings.chroma_shift,
            self.settings.use_loose_table,
        );

        let mut disposition = if depth_review {
            Disposition::VisualReview(ReviewReason::Depth)
        } else if !grade.is_available() {
            Disposition::VisualReview(ReviewReason::NoGrade)
        } else if grade.reference {
            Disposition::VisualReview(ReviewReason::ReferenceStone)
        } else {
            Disposition::Finalized
        };
        if valid < total {
            disposition = Disposition::Remeasure(RemeasureReason::FailedImages { valid, total });
        }

        let mut notes = Vec::new();
        let mut color_change = None;
        if let (Some(threshold), Some(drift)) =
            (self.settings.photochromic_threshold, pass.lightness_drift())
        {
            if drift > threshold {
                color_change = Some(drift);
                notes.push(format!("Color change[{:.4}]", drift));
            }
        }
        if grade.multi_color {
            notes.push("Multi color".to_string());
        }

        let metrics = pass.mean_metrics();
        let volume = group.volume();
        let comment = build_comment(&CommentFields {
            device: &self.settings.device_name,
            volume,
            sample: &sample,
            grade: &grade,
            metrics: &metrics,
            width_ratio,
            aspect,
            group,
        });

        Ok(AggregateResult {
            disposition,
            sample: Some(sample),
            secondary_sample: pass.secondary_sample(),
            metrics,
            width_ratio,
            aspect,
            shape_group: Some(group),
            grade: Some(grade),
            volume,
            comment,
            notes,
            color_change,
            clusters: pass.clusters(),
            rejected: pass.rejected,
            table_checksum: checksum.to_string(),
        })
    }
}

/// Outcome of a stone position check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CenterCheck {
    Centered { distance: f64 },
    /// Centroid too far from the expected point; infinite when the stone is
    /// clipped by the frame
    OffCenter { distance: f64 },
    NotDetected,
}

impl CenterCheck {
    pub fn is_centered(&self) -> bool {
        matches!(self, CenterCheck::Centered { .. })
    }

    /// Operator hint, `None` when the stone is in place
    pub fn message(&self) -> Option<&'static str> {
        match self {
            CenterCheck::Centered { .. } => None,
            CenterCheck::OffCenter { .. } => Some("Check diamond position."),
            CenterCheck::NotDetected => Some("No object detected."),
        }
    }
}

/// Compare the mask centroid of `image` against `expected_center`
pub fn check_centered(
    segmenter: &Segmenter,
    image: &RgbImage,
    expected_center: (f64, f64),
    max_distance: f64,
) -> Result<CenterCheck> {
    let bgr = rgb_to_bgr_mat(image)?;
    let segmentation = match segmenter.segment(&bgr, MaskShape::Full) {
        Ok(s) => s,
        Err(GradingError::RegionTouchesBorder { .. }) => {
            return Ok(CenterCheck::OffCenter {
                distance: f64::INFINITY,
            })
        }
        Err(e) if e.is_recoverable() => return Ok(CenterCheck::NotDetected),
        Err(e) => return Err(e),
    };
    let Some(mask) = segmentation.mask.as_ref() else {
        return Ok(CenterCheck::NotDetected);
    };

    let moments =
        imgproc::moments(mask, true).map_err(|e| GradingError::opencv("mask moments", e))?;
    if moments.m00 <= 0.0 {
        return Ok(CenterCheck::NotDetected);
    }
    let (cx, cy) = (moments.m10 / moments.m00, moments.m01 / moments.m00);
    let distance = (cx - expected_center.0).hypot(cy - expected_center.1);
    debug!(cx, cy, distance, "stone centroid");

    Ok(if distance > max_distance {
        CenterCheck::OffCenter { distance }
    } else {
        CenterCheck::Centered { distance }
    })
}

/// Segment `image` and run both evenness checks on the stone
pub fn image_unevenness(segmenter: &Segmenter, image: &RgbImage) -> Result<UnevennessFlags> {
    let bgr = rgb_to_bgr_mat(image)?;
    let segmentation = segmenter.segment(&bgr, MaskShape::Full)?;
    let mask = segmentation
        .mask
        .as_ref()
        .ok_or_else(|| GradingError::SegmentationError {
            reason: "no stone to inspect".into(),
        })?;
    color::detect_uneven_regions(&bgr, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::SegmenterKind;
    use image::Rgb;

    fn disc(cx: f64, cy: f64) -> RgbImage {
        RgbImage::from_fn(160, 120, |x, y| {
            if (x as f64 - cx).hypot(y as f64 - cy) <= 30.0 {
                Rgb([200, 170, 90])
            } else {
                Rgb([240, 240, 240])
            }
        })
    }

    #[test]
    fn test_check_centered() {
        let segmenter = Segmenter::new(SegmenterKind::Default);
        let image = disc(80.0, 60.0);

        let centered = check_centered(&segmenter, &image, (80.0, 60.0), 10.0).unwrap();
        assert!(centered.is_centered());
        assert_eq!(centered.message(), None);

        let off = check_centered(&segmenter, &image, (20.0, 20.0), 10.0).unwrap();
        assert_eq!(off.message(), Some("Check diamond position."));
    }

    #[test]
    fn test_check_centered_blank() {
        let segmenter = Segmenter::new(SegmenterKind::Default);
        let blank = RgbImage::from_pixel(64, 64, Rgb([240, 240, 240]));
        let check = check_centered(&segmenter, &blank, (32.0, 32.0), 10.0).unwrap();
        assert_eq!(check, CenterCheck::NotDetected);
        assert_eq!(check.message(), Some("No object detected."));
    }

    #[test]
    fn test_worker_pool_size() {
        let mut config = GradingConfig::default();
        config.pipeline.workers = Some(2);
        let orchestrator =
            AggregationOrchestrator::new(&config, CalibrationConfig::default()).unwrap();
        assert_eq!(orchestrator.pool.current_num_threads(), 2);
    }
}
