//! Error types for quantization simulation
//!
//! Errors are grouped the way callers need to react to them:
//! - configuration problems surface while the sim is being built
//! - calibration problems surface from `compute_encodings`
//! - reconciliation problems surface from `load_encodings`
//!
//! Numeric corner cases (constant tensors, zero-variance channels) are
//! recovered locally by the encoding math and never reach this type.

use crate::sim::EncodingMismatch;

/// Result type alias for quantsim operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, calibrating or persisting a sim
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed policy file or a rule naming an unknown op type
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An encoding was requested from a calculator that never saw data
    #[error("Encoding not calibrated: no statistics were collected")]
    NotCalibrated,

    /// Enabled quantizers that observed no value during calibration
    #[error("Calibration failed: enabled quantizers observed no data: {}", .tensors.join(", "))]
    Uncalibrated { tensors: Vec<String> },

    /// Encodings file does not match the live sim
    #[error("Encodings do not match the model ({} mismatches): {}", .mismatches.len(), summarize(.mismatches))]
    EncodingMismatch { mismatches: Vec<EncodingMismatch> },

    /// Structural graph problem (dangling input, duplicate output, bad order)
    #[error("Graph error: {0}")]
    Graph(String),

    /// No kernel is registered for an op type
    #[error("Unknown op type: {0} (register it in the OpRegistry)")]
    UnknownOp(String),

    /// Tensor shape does not fit the operation
    #[error("Tensor shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    /// Operation is not allowed in the quantizer's current state
    #[error("Invalid quantizer state: {0}")]
    InvalidState(String),

    /// JSON / safetensors encode or decode failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn summarize(mismatches: &[EncodingMismatch]) -> String {
    mismatches.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
