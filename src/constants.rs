//! Grading constants and reference values
//!
//! Compile-time defaults for stone segmentation, proportion grouping and
//! run disposition. Most of these are mirrored by fields in
//! [`crate::config::GradingConfig`], which is where runtime overrides live.

/// Silhouette extraction defaults
pub mod mask {
    /// Contrast gain applied through the grayscale lookup table (percent)
    pub const CONTRAST: i32 = 30;

    /// Median blur passes used by a stand-alone mask request
    pub const SMOOTHING_PASSES: u32 = 1;

    /// Median blur passes used while grading image pairs
    pub const GRADING_SMOOTHING_PASSES: u32 = 3;

    /// Median filter aperture
    pub const MEDIAN_FILTER_SIZE: i32 = 3;

    /// Erosion passes applied to the filled hull
    pub const ERODE_PASSES: u32 = 1;

    /// Canny hysteresis thresholds
    pub const CANNY_LOW: f64 = 25.0;
    pub const CANNY_HIGH: f64 = 75.0;

    /// Binary threshold on the Kirsch gradient used to find the outline
    pub const K_THRESHOLD: f64 = 185.0;

    /// Outline threshold when sampling Lab-converted captures
    pub const K_THRESHOLD_LAB: f64 = 100.0;

    /// Binary threshold on the Kirsch gradient used to find clefts inside the hull
    pub const HULL_THRESHOLD: f64 = 125.0;

    /// Thresholds for calibration-stone captures
    pub const K_THRESHOLD_CAL: f64 = 55.0;
    pub const HULL_THRESHOLD_CAL: f64 = 25.0;

    /// Edge points farther than mean + N sigma from the centroid are dropped
    pub const OUTLIER_SIGMA: f64 = 3.0;

    /// Upper bound on morphological-gradient / hull stabilization rounds
    pub const MAX_HULL_ITERATIONS: usize = 100;

    /// Polygon approximation tolerance in pixels
    pub const POLY_APPROX_EPSILON: f64 = 3.0;
}

/// Proportion grouping thresholds (upper aspect bounds are exclusive)
pub mod proportion {
    pub const RBC_WIDTH_RATIO: f64 = 1.10;
    pub const RBC_ASPECT_MIN: f64 = 0.58;
    pub const RBC_ASPECT_MAX: f64 = 0.76;

    pub const FANCY_L_WIDTH_RATIO: f64 = 1.35;
    pub const FANCY_L_ASPECT_MIN: f64 = 0.44;
    pub const FANCY_L_ASPECT_MAX: f64 = 0.70;

    pub const FANCY_H_WIDTH_RATIO: f64 = 1.70;
    pub const FANCY_H_ASPECT_MIN: f64 = 0.34;
    pub const FANCY_H_ASPECT_MAX: f64 = 0.70;

    pub const FANCY_HH_ASPECT_MIN: f64 = 0.24;
    pub const FANCY_HH_ASPECT_MAX: f64 = 0.50;

    /// Fraction of the stone sampled by the partial (cone) mask
    pub const PARTIAL_VOLUME: f64 = 0.5;
}

/// Run-level grading rules
pub mod grading {
    /// Sentinel grade label when no table row matches
    pub const NOT_AVAILABLE: &str = "N/A";

    /// Largest tolerated difference between diamond and background image counts
    pub const COUNT_TOLERANCE: usize = 3;

    /// Default lightness drift that flags a photochromic stone
    pub const PHOTOCHROMIC_THRESHOLD: f64 = 0.03;

    /// Device identifier written at the head of the diagnostic comment
    pub const DEVICE_NAME: &str = "CV";

    /// Cluster counts tried by the k-means breakdown
    pub const CLUSTER_COUNTS: [usize; 4] = [2, 3, 4, 5];

    /// k-means stops after this many rounds or once no center moves farther
    /// than the epsilon (Lab units)
    pub const KMEANS_MAX_ITER: usize = 10;
    pub const KMEANS_EPSILON: f64 = 1.0;
}

/// Histogram unevenness analysis
pub mod uniformity {
    /// Gray levels below this are ignored by the brightness histogram
    pub const BRIGHT_HIST_START: usize = 5;
    pub const BRIGHT_HIST_BINS: usize = 231;

    /// Hue levels below this are ignored by the hue histogram
    pub const HUE_HIST_START: usize = 5;
    pub const HUE_HIST_BINS: usize = 251;

    /// Smoothing window for the brightness spectrum
    pub const SMOOTHING_WINDOW: usize = 3;

    /// Upper bound on smoothing rounds
    pub const MAX_SMOOTHING_PASSES: usize = 500;

    /// Peaks this low and this narrow are smoothing noise
    pub const NOISE_PEAK_HEIGHT: f64 = 5.0;
    pub const NOISE_PEAK_WIDTH: f64 = 10.0;

    /// Peaks must exceed this height to count as a bright region
    pub const MIN_REGION_PEAK_HEIGHT: f64 = 10.0;
    pub const MAX_REGION_PEAKS: usize = 5;

    /// Peak top must exceed this multiple of the mean bin count
    pub const MEAN_BIN_FACTOR: f64 = 1.5;

    /// More peaks than this above threshold means uneven brightness
    pub const MAX_BRIGHT_REGIONS: usize = 2;

    /// Dominant hue must cover at least this percent of the stone
    pub const MIN_DOMINANT_HUE_PERCENT: f64 = 66.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportion_bounds_ordered() {
        assert!(proportion::RBC_WIDTH_RATIO < proportion::FANCY_L_WIDTH_RATIO);
        assert!(proportion::FANCY_L_WIDTH_RATIO < proportion::FANCY_H_WIDTH_RATIO);
        assert!(proportion::RBC_ASPECT_MIN < proportion::RBC_ASPECT_MAX);
        assert!(proportion::FANCY_HH_ASPECT_MIN < proportion::FANCY_HH_ASPECT_MAX);
    }

    #[test]
    fn test_mask_thresholds() {
        assert!(mask::CANNY_LOW < mask::CANNY_HIGH);
        assert!(mask::HULL_THRESHOLD < mask::K_THRESHOLD);
        assert_eq!(mask::MEDIAN_FILTER_SIZE % 2, 1);
    }
}
