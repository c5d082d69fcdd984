//! Encoding calculation from calibration data
//!
//! Schemes for turning observed values into quantization encodings:
//! - Min-max (`post_training_tf`): the full observed range
//! - Enhanced (`post_training_tf_enhanced`): histogram search for the
//!   clipping range with the least quantization noise
//! - Percentile (`post_training_percentile`): histogram percentile clipping

mod calibrator;
mod helpers;
mod histogram;
mod search;
mod types;


pub use calibrator::EncodingAnalyzer;
pub use helpers::{compute_encoding, quantization_mse};
pub use histogram::{Histogram, DEFAULT_NUM_BINS};
pub use types::{QuantScheme, DEFAULT_PERCENTILE};
