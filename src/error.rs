//! Error types for the gemgrade library

use thiserror::Error;

/// Result type alias for gemgrade operations
pub type Result<T> = std::result::Result<T, GradingError>;

/// Error types raised while segmenting, measuring and grading a stone
#[derive(Error, Debug)]
pub enum GradingError {
    /// Image file could not be loaded or decoded
    #[error("Failed to load image: {message}")]
    ImageLoadError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Grading configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Input images violate a precondition (dimensions, emptiness)
    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    /// No usable stone outline could be extracted from the image
    #[error("Segmentation failed: {reason}")]
    SegmentationError { reason: String },

    /// Detected stone region reaches the edge of the frame
    #[error("Detected region touches the image border (x {x_min}..{x_max}, y {y_min}..{y_max})")]
    RegionTouchesBorder {
        x_min: i32,
        x_max: i32,
        y_min: i32,
        y_max: i32,
    },

    /// Hull stabilization loop did not settle
    #[error("Could not find hull after {iterations} iterations")]
    ConvergenceError { iterations: usize },

    /// Boundary table is malformed
    #[error("Calibration table error at line {line}: {reason}")]
    CalibrationError { line: usize, reason: String },

    /// Generic processing error
    #[error("Processing error: {message}")]
    ProcessingError { message: String },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    /// OpenCV operation failed
    #[error("OpenCV error: {operation}")]
    OpenCvError {
        operation: String,
        #[source]
        source: Option<opencv::Error>,
    },
}

impl GradingError {
    /// Create an image load error with context
    pub fn image_load<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ImageLoadError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error with context
    pub fn config<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConfigError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an OpenCV error with context
    pub fn opencv(operation: impl Into<String>, source: opencv::Error) -> Self {
        Self::OpenCvError {
            operation: operation.into(),
            source: Some(source),
        }
    }

    /// Create a generic processing error
    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    /// Check if this error only invalidates the image pair it came from.
    ///
    /// Recoverable errors drop the pair from aggregation; anything else
    /// aborts the whole grading run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GradingError::InvalidInput { .. }
                | GradingError::SegmentationError { .. }
                | GradingError::RegionTouchesBorder { .. }
                | GradingError::ConvergenceError { .. }
        )
    }

    /// Get operator-facing description for display next to a rejected measurement
    pub fn user_message(&self) -> String {
        match self {
            GradingError::ImageLoadError { .. } => {
                "Could not load the image. Please check the file and try again.".to_string()
            }
            GradingError::InvalidInput { .. } => {
                "Diamond and background images do not match. Please recapture.".to_string()
            }
            GradingError::SegmentationError { .. } | GradingError::ConvergenceError { .. } => {
                "Could not isolate the stone. Please clean the stage and measure again.".to_string()
            }
            GradingError::RegionTouchesBorder { .. } => {
                "Stone is outside the capture area. Please center the stone.".to_string()
            }
            GradingError::CalibrationError { .. } => {
                "Calibration table is invalid. Please reinstall the boundary files.".to_string()
            }
            _ => "Grading failed. Please measure again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(GradingError::ConvergenceError { iterations: 100 }.is_recoverable());
        assert!(GradingError::RegionTouchesBorder {
            x_min: 0,
            x_max: 10,
            y_min: 1,
            y_max: 9
        }
        .is_recoverable());
        assert!(!GradingError::processing("boom").is_recoverable());
        assert!(!GradingError::CalibrationError {
            line: 2,
            reason: "bad".into()
        }
        .is_recoverable());
    }

    #[test]
    fn test_convergence_message() {
        let err = GradingError::ConvergenceError { iterations: 100 };
        assert_eq!(err.to_string(), "Could not find hull after 100 iterations");
    }
}
