//! Grading pipeline: per-pair measurement, join, aggregation and verdict

pub mod aggregate;
pub mod measure;
pub mod orchestrator;
pub mod result;

pub use aggregate::{PairClusters, PairOutcome, PassAggregate, RejectedPair};
pub use measure::{ImagePairMeasurer, PairMeasurement, PairMeasurer};
pub use orchestrator::{check_centered, image_unevenness, AggregationOrchestrator, CenterCheck};
pub use result::{AggregateResult, Disposition, RemeasureReason, ReviewReason};
