//! Colour measurement
//!
//! Lab conversion and masked means, calibrated diamond/background samples,
//! k-means colour breakdown and histogram evenness checks.

pub mod clusters;
pub mod conversion;
pub mod extraction;
pub mod spectrum;
pub mod uniformity;

pub use clusters::{ClusterAnalyzer, ClusterReport, ClusterStat};
pub use conversion::LabSample;
pub use extraction::{ColorExtractor, ColorSample, PairSamples, SampleAccumulator};
pub use uniformity::{detect_uneven_regions, UnevennessFlags};
