//! Tensor quantizers
//!
//! One [`TensorQuantizer`] is attached to every candidate tensor of a sim.
//! It owns the encoding analyzers for its tensor (one per channel when
//! quantizing per channel) and the encodings derived from them.

mod config;
#[allow(clippy::module_inception)]
mod quantizer;
mod types;

#[cfg(test)]
mod tests;

pub use config::QuantizerConfig;
pub use quantizer::TensorQuantizer;
pub use types::{OpMode, TensorRole};
