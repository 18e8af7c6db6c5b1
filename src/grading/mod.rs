//! Proportion grouping and boundary-table grade lookup

pub mod proportion;
pub mod table;

pub use proportion::{Depth, GeometryStats, ProportionClassifier, ShapeGroup, StoneFamily};
pub use table::{GradeInterval, GradeOutcome, GradeTable, GradeTables, HueConvention, Range};
