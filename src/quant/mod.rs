//! Quantization simulation primitives
//!
//! - Encodings and the quantize-dequantize math
//! - Encoding calculation from calibration data (min-max, enhanced, percentile)
//! - Per-tensor quantizers with their calibration state machine
//! - CPU and accelerated element-wise back-ends

mod backend;
mod calibration;
mod encoding;
mod quantizer;

pub use backend::{Backend, ACCELERATED_DOMAIN, CPU_DOMAIN};
pub use calibration::{
    compute_encoding, quantization_mse, EncodingAnalyzer, Histogram, QuantScheme, DEFAULT_NUM_BINS,
    DEFAULT_PERCENTILE,
};
pub use encoding::{num_steps, Encoding, EncodingSettings, QuantDataType, MIN_ENCODING_RANGE};
pub use quantizer::{OpMode, QuantizerConfig, TensorQuantizer, TensorRole};
