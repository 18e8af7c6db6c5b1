//! Proportion classification
//!
//! Width spread across the rotation series separates round brilliants from
//! increasingly elongated fancy shapes; the aspect ratio then places the
//! stone in a depth band. Round brilliants use the average aspect ratio,
//! fancy shapes the minimum.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{AspectBand, ProportionThresholds};
use crate::constants::proportion::PARTIAL_VOLUME;

/// Shape family selected by the width ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoneFamily {
    Rbc,
    FancyL,
    FancyH,
    FancyHH,
}

/// Depth band within a family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    Normal,
    Low,
    High,
}

/// Discrete proportion bucket for a stone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShapeGroup {
    RbcNormal,
    RbcLowDepth,
    RbcHighDepth,
    FancyLNormal,
    FancyLLowDepth,
    FancyLHighDepth,
    FancyHNormal,
    FancyHLowDepth,
    FancyHHighDepth,
    FancyHHNormal,
    FancyHHLowDepth,
    FancyHHHighDepth,
    /// No geometry was available to classify
    Default,
}

impl ShapeGroup {
    pub fn from_parts(family: StoneFamily, depth: Depth) -> Self {
        use Depth::*;
        use StoneFamily::*;
        match (family, depth) {
            (Rbc, Normal) => ShapeGroup::RbcNormal,
            (Rbc, Low) => ShapeGroup::RbcLowDepth,
            (Rbc, High) => ShapeGroup::RbcHighDepth,
            (FancyL, Normal) => ShapeGroup::FancyLNormal,
            (FancyL, Low) => ShapeGroup::FancyLLowDepth,
            (FancyL, High) => ShapeGroup::FancyLHighDepth,
            (FancyH, Normal) => ShapeGroup::FancyHNormal,
            (FancyH, Low) => ShapeGroup::FancyHLowDepth,
            (FancyH, High) => ShapeGroup::FancyHHighDepth,
            (FancyHH, Normal) => ShapeGroup::FancyHHNormal,
            (FancyHH, Low) => ShapeGroup::FancyHHLowDepth,
            (FancyHH, High) => ShapeGroup::FancyHHHighDepth,
        }
    }

    pub fn family(&self) -> Option<StoneFamily> {
        match self {
            ShapeGroup::RbcNormal | ShapeGroup::RbcLowDepth | ShapeGroup::RbcHighDepth => {
                Some(StoneFamily::Rbc)
            }
            ShapeGroup::FancyLNormal | ShapeGroup::FancyLLowDepth | ShapeGroup::FancyLHighDepth => {
                Some(StoneFamily::FancyL)
            }
            ShapeGroup::FancyHNormal | ShapeGroup::FancyHLowDepth | ShapeGroup::FancyHHighDepth => {
                Some(StoneFamily::FancyH)
            }
            ShapeGroup::FancyHHNormal
            | ShapeGroup::FancyHHLowDepth
            | ShapeGroup::FancyHHHighDepth => Some(StoneFamily::FancyHH),
            ShapeGroup::Default => None,
        }
    }

    pub fn depth(&self) -> Option<Depth> {
        match self {
            ShapeGroup::RbcNormal
            | ShapeGroup::FancyLNormal
            | ShapeGroup::FancyHNormal
            | ShapeGroup::FancyHHNormal => Some(Depth::Normal),
            ShapeGroup::RbcLowDepth
            | ShapeGroup::FancyLLowDepth
            | ShapeGroup::FancyHLowDepth
            | ShapeGroup::FancyHHLowDepth => Some(Depth::Low),
            ShapeGroup::RbcHighDepth
            | ShapeGroup::FancyLHighDepth
            | ShapeGroup::FancyHHighDepth
            | ShapeGroup::FancyHHHighDepth => Some(Depth::High),
            ShapeGroup::Default => None,
        }
    }

    /// Round groups grade against the round table
    pub fn is_round(&self) -> bool {
        self.family() == Some(StoneFamily::Rbc)
    }

    /// Deep round brilliants are re-measured with the partial mask
    pub fn needs_partial_pass(&self) -> bool {
        *self == ShapeGroup::RbcHighDepth
    }

    /// Fraction of the stone sampled by the mask used for this group
    pub fn volume(&self) -> f64 {
        if self.needs_partial_pass() {
            PARTIAL_VOLUME
        } else {
            1.0
        }
    }

    /// Label used in the diagnostic comment
    pub fn label(&self) -> &'static str {
        match self {
            ShapeGroup::RbcNormal => "RBC: Normal ",
            ShapeGroup::RbcLowDepth => "RBC: Low depth ",
            ShapeGroup::RbcHighDepth => "RBC: High depth ",
            ShapeGroup::FancyLNormal => "FANCY_L: Normal ",
            ShapeGroup::FancyLLowDepth => "FANCY_L: Low depth ",
            ShapeGroup::FancyLHighDepth => "FANCY_L: High depth ",
            ShapeGroup::FancyHNormal => "FANCY_H: Normal ",
            ShapeGroup::FancyHLowDepth => "FANCY_H: Low depth ",
            ShapeGroup::FancyHHighDepth => "FANCY_H: High depth ",
            ShapeGroup::FancyHHNormal => "FANCY_HH: Normal ",
            ShapeGroup::FancyHHLowDepth => "FANCY_HH: Low depth ",
            ShapeGroup::FancyHHHighDepth => "FANCY_HH: High depth ",
            ShapeGroup::Default => "Default ",
        }
    }
}

impl fmt::Display for ShapeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().trim_end())
    }
}

/// Width and aspect statistics over one measurement pass.
///
/// Built with commutative updates only, so the visiting order of the
/// measurements never changes the result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryStats {
    pub count: usize,
    pub width_min: f64,
    pub width_max: f64,
    pub aspect_min: f64,
    pub aspect_max: f64,
    aspect_sum: f64,
}

impl Default for GeometryStats {
    fn default() -> Self {
        Self {
            count: 0,
            width_min: f64::INFINITY,
            width_max: 0.0,
            aspect_min: f64::INFINITY,
            aspect_max: 0.0,
            aspect_sum: 0.0,
        }
    }
}

impl GeometryStats {
    /// Add one silhouette; zero-width silhouettes are ignored
    pub fn push(&mut self, width: f64, height: f64) {
        if width <= 0.0 {
            return;
        }
        let aspect = height / width;
        self.count += 1;
        self.width_min = self.width_min.min(width);
        self.width_max = self.width_max.max(width);
        self.aspect_min = self.aspect_min.min(aspect);
        self.aspect_max = self.aspect_max.max(aspect);
        self.aspect_sum += aspect;
    }

    pub fn merge(mut self, other: GeometryStats) -> Self {
        self.count += other.count;
        self.width_min = self.width_min.min(other.width_min);
        self.width_max = self.width_max.max(other.width_max);
        self.aspect_min = self.aspect_min.min(other.aspect_min);
        self.aspect_max = self.aspect_max.max(other.aspect_max);
        self.aspect_sum += other.aspect_sum;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Widest over narrowest silhouette, zero when empty
    pub fn width_ratio(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.width_max / self.width_min
        }
    }

    pub fn aspect_avg(&self) -> f64 {
        if self.is_empty() {
            0.0
        } else {
            self.aspect_sum / self.count as f64
        }
    }

    /// The aspect figure that decides depth for the given group
    pub fn aspect_for(&self, group: ShapeGroup) -> f64 {
        if self.is_empty() {
            0.0
        } else if group.is_round() {
            self.aspect_avg()
        } else {
            self.aspect_min
        }
    }
}

impl FromIterator<(f64, f64)> for GeometryStats {
    fn from_iter<I: IntoIterator<Item = (f64, f64)>>(iter: I) -> Self {
        let mut stats = GeometryStats::default();
        for (w, h) in iter {
            stats.push(w, h);
        }
        stats
    }
}

/// Maps geometry statistics to a [`ShapeGroup`]
#[derive(Debug, Clone, Default)]
pub struct ProportionClassifier {
    thresholds: ProportionThresholds,
}

impl ProportionClassifier {
    pub fn new(thresholds: ProportionThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ProportionThresholds {
        &self.thresholds
    }

    /// Classify from raw figures
    pub fn classify_ratios(
        &self,
        width_ratio: f64,
        aspect_avg: f64,
        aspect_min: f64,
    ) -> ShapeGroup {
        let t = &self.thresholds;

        if width_ratio <= t.rbc_width_ratio {
            let depth = if t.rbc_aspect.contains(aspect_avg) {
                Depth::Normal
            } else if aspect_avg >= t.rbc_aspect.max {
                Depth::High
            } else {
                Depth::Low
            };
            return ShapeGroup::from_parts(StoneFamily::Rbc, depth);
        }

        let (family, band) = if width_ratio <= t.fancy_l_width_ratio {
            (StoneFamily::FancyL, t.fancy_l_aspect)
        } else if width_ratio <= t.fancy_h_width_ratio {
            (StoneFamily::FancyH, t.fancy_h_aspect)
        } else {
            (StoneFamily::FancyHH, t.fancy_hh_aspect)
        };
        ShapeGroup::from_parts(family, fancy_depth(band, aspect_min))
    }

    /// Classify a measurement pass; empty statistics give `ShapeGroup::Default`
    pub fn classify(&self, stats: &GeometryStats) -> ShapeGroup {
        if stats.is_empty() {
            return ShapeGroup::Default;
        }
        let group = self.classify_ratios(stats.width_ratio(), stats.aspect_avg(), stats.aspect_min);
        info!(
            group = %group,
            width_ratio = stats.width_ratio(),
            aspect_avg = stats.aspect_avg(),
            aspect_min = stats.aspect_min,
            "proportion classified"
        );
        group
    }
}

fn fancy_depth(band: AspectBand, aspect_min: f64) -> Depth {
    if band.contains(aspect_min) {
        Depth::Normal
    } else if aspect_min < band.min {
        Depth::Low
    } else {
        Depth::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ProportionClassifier {
        ProportionClassifier::default()
    }

    #[test]
    fn test_documented_cases() {
        let c = classifier();
        assert_eq!(c.classify_ratios(1.05, 0.65, 0.65), ShapeGroup::RbcNormal);
        assert_eq!(c.classify_ratios(1.50, 0.60, 0.60), ShapeGroup::FancyHNormal);
        assert_eq!(c.classify_ratios(1.20, 0.30, 0.30), ShapeGroup::FancyLLowDepth);
    }

    #[test]
    fn test_rbc_depth_bands() {
        let c = classifier();
        assert_eq!(c.classify_ratios(1.0, 0.58, 0.5), ShapeGroup::RbcNormal);
        assert_eq!(c.classify_ratios(1.0, 0.76, 0.5), ShapeGroup::RbcHighDepth);
        assert_eq!(c.classify_ratios(1.0, 0.85, 0.5), ShapeGroup::RbcHighDepth);
        assert_eq!(c.classify_ratios(1.0, 0.57, 0.5), ShapeGroup::RbcLowDepth);
        // width ratio bound is inclusive
        assert_eq!(c.classify_ratios(1.10, 0.65, 0.65), ShapeGroup::RbcNormal);
    }

    #[test]
    fn test_fancy_bands() {
        let c = classifier();
        assert_eq!(c.classify_ratios(1.30, 0.9, 0.70), ShapeGroup::FancyLHighDepth);
        assert_eq!(c.classify_ratios(1.35, 0.9, 0.44), ShapeGroup::FancyLNormal);
        assert_eq!(c.classify_ratios(1.60, 0.9, 0.33), ShapeGroup::FancyHLowDepth);
        assert_eq!(c.classify_ratios(1.70, 0.9, 0.34), ShapeGroup::FancyHNormal);
        assert_eq!(c.classify_ratios(2.00, 0.9, 0.24), ShapeGroup::FancyHHNormal);
        assert_eq!(c.classify_ratios(2.00, 0.9, 0.23), ShapeGroup::FancyHHLowDepth);
        assert_eq!(c.classify_ratios(2.00, 0.9, 0.50), ShapeGroup::FancyHHHighDepth);
    }

    #[test]
    fn test_stats_order_independent() {
        let dims = [(100.0, 65.0), (104.0, 66.0), (98.0, 64.0), (101.0, 70.0)];
        let forward: GeometryStats = dims.iter().copied().collect();
        let backward: GeometryStats = dims.iter().rev().copied().collect();
        assert_eq!(forward.width_min, backward.width_min);
        assert_eq!(forward.width_max, backward.width_max);
        assert_eq!(forward.aspect_min, backward.aspect_min);
        assert!((forward.aspect_avg() - backward.aspect_avg()).abs() < 1e-12);

        let (left, right) = dims.split_at(2);
        let merged = left
            .iter()
            .copied()
            .collect::<GeometryStats>()
            .merge(right.iter().copied().collect());
        assert_eq!(merged.count, 4);
        assert!((merged.width_ratio() - 104.0 / 98.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_stats_default_group() {
        let stats = GeometryStats::default();
        assert_eq!(classifier().classify(&stats), ShapeGroup::Default);
        assert_eq!(stats.width_ratio(), 0.0);
    }

    #[test]
    fn test_group_helpers() {
        assert!(ShapeGroup::RbcHighDepth.needs_partial_pass());
        assert_eq!(ShapeGroup::RbcHighDepth.volume(), 0.5);
        assert_eq!(ShapeGroup::FancyHHighDepth.volume(), 1.0);
        assert!(ShapeGroup::RbcLowDepth.is_round());
        assert!(!ShapeGroup::FancyLNormal.is_round());
        assert_eq!(ShapeGroup::FancyLLowDepth.label(), "FANCY_L: Low depth ");
        assert_eq!(ShapeGroup::Default.family(), None);
        assert_eq!(
            ShapeGroup::from_parts(StoneFamily::FancyHH, Depth::High),
            ShapeGroup::FancyHHHighDepth
        );
    }
}
