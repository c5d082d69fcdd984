//! Quantizer state and role types

use crate::graph::ParamRole;

/// Execution mode of a quantizer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpMode {
    /// Values flow through unchanged
    #[default]
    Passthrough,
    /// Values flow through unchanged while statistics are collected
    UpdateStats,
    /// Compute the encoding from the first value seen, then quantize
    OneShotQuantizeDequantize,
    /// Quantize-dequantize with the current encodings
    QuantizeDequantize,
}

/// What kind of tensor a quantizer is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorRole {
    /// Graph input or node output
    Activation,
    /// Initializer with a weight or bias role
    Param(ParamRole),
}

impl TensorRole {
    pub fn is_param(&self) -> bool {
        matches!(self, TensorRole::Param(_))
    }
}
