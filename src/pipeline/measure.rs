//! Per-pair measurement
//!
//! [`PairMeasurer`] is the unit of work fanned out by the orchestrator: take
//! one diamond/background pair, find the stone, and sample its colour. The
//! production implementation is [`ImagePairMeasurer`]; tests substitute
//! scripted measurers to drive the aggregation logic directly.

use tracing::debug;

use crate::calibration::LabAdjustment;
use crate::color::{ClusterAnalyzer, ClusterReport, ColorExtractor, PairSamples};
use crate::error::{GradingError, Result};
use crate::image_loader::{rgb_to_bgr_mat, ImagePair};
use crate::segmentation::{MaskShape, Segmenter, ShapeMetrics};

/// Everything measured on one pair
#[derive(Debug, Clone, PartialEq)]
pub struct PairMeasurement {
    /// Index of the diamond capture
    pub index: usize,
    pub metrics: ShapeMetrics,
    pub samples: PairSamples,
    /// Present only on cluster batch boundaries
    pub clusters: Option<Vec<ClusterReport>>,
}

/// Measures one image pair; shared read-only across workers
pub trait PairMeasurer: Sync {
    fn measure(
        &self,
        pair: &ImagePair<'_>,
        shape: MaskShape,
        compute_clusters: bool,
    ) -> Result<PairMeasurement>;
}

/// Segment, then sample colour under the resulting masks
#[derive(Debug, Clone)]
pub struct ImagePairMeasurer {
    segmenter: Segmenter,
    extractor: ColorExtractor,
    clusters: ClusterAnalyzer,
    assume_srgb: bool,
}

impl ImagePairMeasurer {
    pub fn new(segmenter: Segmenter, adjustment: LabAdjustment, assume_srgb: bool) -> Self {
        Self {
            segmenter,
            extractor: ColorExtractor::new(adjustment, assume_srgb),
            clusters: ClusterAnalyzer::default(),
            assume_srgb,
        }
    }

    pub fn with_cluster_analyzer(mut self, clusters: ClusterAnalyzer) -> Self {
        self.clusters = clusters;
        self
    }

    pub fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }
}

impl PairMeasurer for ImagePairMeasurer {
    fn measure(
        &self,
        pair: &ImagePair<'_>,
        shape: MaskShape,
        compute_clusters: bool,
    ) -> Result<PairMeasurement> {
        pair.check_dimensions()?;

        let diamond = rgb_to_bgr_mat(pair.diamond)?;
        let background = rgb_to_bgr_mat(pair.background)?;

        let segmentation = self.segmenter.segment(&diamond, shape)?;
        if segmentation.is_empty() {
            return Err(GradingError::SegmentationError {
                reason: format!("pair {}: no stone outline", pair.index),
            });
        }

        let samples = self
            .extractor
            .extract_segmented(&diamond, &background, &segmentation)?;

        let clusters = match (compute_clusters, segmentation.mask.as_ref()) {
            (true, Some(mask)) => {
                let cluster_mask = segmentation.secondary_mask.as_ref().unwrap_or(mask);
                Some(self.clusters.analyze(&diamond, cluster_mask, self.assume_srgb)?)
            }
            _ => None,
        };

        debug!(
            pair = pair.index,
            width = segmentation.metrics.width,
            height = segmentation.metrics.height,
            lightness = samples.primary.lightness(),
            "pair measured"
        );

        Ok(PairMeasurement {
            index: pair.index,
            metrics: segmentation.metrics,
            samples,
            clusters,
        })
    }
}
