//! Post-join reduction of one measurement pass
//!
//! Workers hand back one [`PairOutcome`] each. The outcomes are sorted by
//! pair index before anything is summed, so the reduction sees the same
//! sequence whatever order the workers finished in.

use serde::{Deserialize, Serialize};

use super::measure::PairMeasurement;
use crate::color::{ClusterReport, ColorSample, SampleAccumulator};
use crate::grading::GeometryStats;
use crate::segmentation::ShapeMetrics;

/// A pair dropped from aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedPair {
    pub index: usize,
    pub reason: String,
}

/// Result of one worker task
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Measured(PairMeasurement),
    Rejected(RejectedPair),
}

impl PairOutcome {
    pub fn index(&self) -> usize {
        match self {
            PairOutcome::Measured(m) => m.index,
            PairOutcome::Rejected(r) => r.index,
        }
    }
}

/// Cluster breakdown computed on one batch-boundary pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairClusters {
    pub index: usize,
    pub reports: Vec<ClusterReport>,
}

/// Everything one pass contributes to the final result
#[derive(Debug, Clone, PartialEq)]
pub struct PassAggregate {
    /// Pairs submitted to the pass
    pub total: usize,
    /// Successful measurements, ascending by index
    pub measurements: Vec<PairMeasurement>,
    /// Rejected pairs, ascending by index
    pub rejected: Vec<RejectedPair>,
    pub geometry: GeometryStats,
    pub primary: SampleAccumulator,
    pub secondary: SampleAccumulator,
}

impl PassAggregate {
    pub fn from_outcomes(total: usize, mut outcomes: Vec<PairOutcome>) -> Self {
        outcomes.sort_by_key(PairOutcome::index);

        let mut measurements = Vec::with_capacity(outcomes.len());
        let mut rejected = Vec::new();
        for outcome in outcomes {
            match outcome {
                PairOutcome::Measured(m) => measurements.push(m),
                PairOutcome::Rejected(r) => rejected.push(r),
            }
        }

        let geometry = measurements
            .iter()
            .map(|m| (m.metrics.width, m.metrics.height))
            .collect();
        let primary = measurements.iter().map(|m| &m.samples.primary).collect();
        let secondary = measurements
            .iter()
            .filter_map(|m| m.samples.secondary.as_ref())
            .collect();

        Self {
            total,
            measurements,
            rejected,
            geometry,
            primary,
            secondary,
        }
    }

    pub fn valid(&self) -> usize {
        self.measurements.len()
    }

    /// Every submitted pair produced a measurement
    pub fn is_complete(&self) -> bool {
        self.valid() == self.total
    }

    /// Mean primary sample; `None` when nothing was measured
    pub fn sample(&self) -> Option<ColorSample> {
        self.primary.mean()
    }

    /// Mean exposure-filtered sample over the pairs that produced one
    pub fn secondary_sample(&self) -> Option<ColorSample> {
        self.secondary.mean()
    }

    /// Component-wise mean of the silhouette metrics
    pub fn mean_metrics(&self) -> ShapeMetrics {
        if self.measurements.is_empty() {
            return ShapeMetrics::default();
        }
        let n = self.measurements.len() as f64;
        let sum = self
            .measurements
            .iter()
            .fold(ShapeMetrics::default(), |acc, m| ShapeMetrics {
                perimeter: acc.perimeter + m.metrics.perimeter,
                area: acc.area + m.metrics.area,
                width: acc.width + m.metrics.width,
                height: acc.height + m.metrics.height,
                pavilion_offset: acc.pavilion_offset + m.metrics.pavilion_offset,
                secondary_area: acc.secondary_area + m.metrics.secondary_area,
            });
        ShapeMetrics {
            perimeter: sum.perimeter / n,
            area: sum.area / n,
            width: sum.width / n,
            height: sum.height / n,
            pavilion_offset: sum.pavilion_offset / n,
            secondary_area: sum.secondary_area / n,
        }
    }

    pub fn clusters(&self) -> Vec<PairClusters> {
        self.measurements
            .iter()
            .filter_map(|m| {
                m.clusters.as_ref().map(|reports| PairClusters {
                    index: m.index,
                    reports: reports.clone(),
                })
            })
            .collect()
    }

    /// Calibrated lightness change between the first and last measured pair
    pub fn lightness_drift(&self) -> Option<f64> {
        match (self.measurements.first(), self.measurements.last()) {
            (Some(first), Some(last)) if self.measurements.len() > 1 => Some(
                (last.samples.primary.lightness() - first.samples.primary.lightness()).abs(),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{LabSample, PairSamples};

    fn measured(index: usize, width: f64, height: f64, l: f64) -> PairOutcome {
        let sample = ColorSample {
            diamond: LabSample::new(l * 100.0, 1.0, 5.0),
            background: LabSample::new(100.0, 0.0, 0.0),
            calibrated: LabSample::new(l, 1.0, 5.0),
        };
        PairOutcome::Measured(PairMeasurement {
            index,
            metrics: ShapeMetrics {
                perimeter: 2.0 * (width + height),
                area: width * height,
                width,
                height,
                pavilion_offset: 4.0,
                secondary_area: 0.0,
            },
            samples: PairSamples {
                primary: sample,
                secondary: None,
            },
            clusters: None,
        })
    }

    fn rejected(index: usize) -> PairOutcome {
        PairOutcome::Rejected(RejectedPair {
            index,
            reason: "touches border".into(),
        })
    }

    #[test]
    fn test_reduction_counts() {
        let pass = PassAggregate::from_outcomes(
            3,
            vec![measured(2, 100.0, 65.0, 0.9), rejected(1), measured(0, 104.0, 66.0, 0.8)],
        );
        assert_eq!(pass.valid(), 2);
        assert!(!pass.is_complete());
        assert_eq!(pass.rejected[0].index, 1);
        assert_eq!(pass.measurements[0].index, 0);
        assert_eq!(pass.geometry.count, 2);
        assert!((pass.geometry.width_ratio() - 1.04).abs() < 1e-12);
        assert!((pass.sample().unwrap().lightness() - 0.85).abs() < 1e-12);
        assert!(pass.secondary_sample().is_none());
        assert!((pass.mean_metrics().width - 102.0).abs() < 1e-12);
        assert!((pass.mean_metrics().pavilion_offset - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_completion_order_irrelevant() {
        let a = PassAggregate::from_outcomes(
            3,
            vec![
                measured(0, 100.0, 60.0, 0.7),
                measured(1, 101.0, 61.0, 0.8),
                measured(2, 99.0, 62.0, 0.9),
            ],
        );
        let b = PassAggregate::from_outcomes(
            3,
            vec![
                measured(2, 99.0, 62.0, 0.9),
                measured(0, 100.0, 60.0, 0.7),
                measured(1, 101.0, 61.0, 0.8),
            ],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_lightness_drift_uses_index_order() {
        let pass = PassAggregate::from_outcomes(
            3,
            vec![
                measured(2, 100.0, 65.0, 0.70),
                measured(0, 100.0, 65.0, 0.80),
                measured(1, 100.0, 65.0, 0.95),
            ],
        );
        assert!((pass.lightness_drift().unwrap() - 0.10).abs() < 1e-12);

        let single = PassAggregate::from_outcomes(1, vec![measured(0, 100.0, 65.0, 0.8)]);
        assert_eq!(single.lightness_drift(), None);
    }

    #[test]
    fn test_empty_pass() {
        let pass = PassAggregate::from_outcomes(2, vec![rejected(0), rejected(1)]);
        assert_eq!(pass.valid(), 0);
        assert!(pass.sample().is_none());
        assert!(pass.geometry.is_empty());
        assert_eq!(pass.mean_metrics(), ShapeMetrics::default());
    }
}
