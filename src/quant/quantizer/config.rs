//! Quantizer configuration

use crate::error::{Error, Result};
use crate::quant::calibration::{QuantScheme, DEFAULT_PERCENTILE};
use crate::quant::encoding::{EncodingSettings, QuantDataType};

/// Numeric settings of one quantizer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuantizerConfig {
    /// Grid width in bits (16 for float)
    pub bitwidth: u8,
    pub data_type: QuantDataType,
    pub symmetric: bool,
    pub strict_symmetric: bool,
    pub unsigned_symmetric: bool,
    pub scheme: QuantScheme,
    /// Clipping percentile for the percentile scheme
    pub percentile: f32,
}

impl QuantizerConfig {
    /// Integer grid of `bitwidth` bits
    pub fn int(bitwidth: u8, symmetric: bool) -> Self {
        Self {
            bitwidth,
            data_type: QuantDataType::Int,
            symmetric,
            strict_symmetric: false,
            unsigned_symmetric: false,
            scheme: QuantScheme::default(),
            percentile: DEFAULT_PERCENTILE,
        }
    }

    /// IEEE half-precision simulation
    pub fn float16() -> Self {
        Self { data_type: QuantDataType::Float, ..Self::int(16, false) }
    }

    pub fn with_scheme(mut self, scheme: QuantScheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_percentile(mut self, percentile: f32) -> Self {
        self.percentile = percentile;
        self
    }

    pub fn with_strict_symmetric(mut self, strict: bool) -> Self {
        self.strict_symmetric = strict;
        self
    }

    pub fn with_unsigned_symmetric(mut self, unsigned: bool) -> Self {
        self.unsigned_symmetric = unsigned;
        self
    }

    /// Settings handed to the encoding math
    pub fn encoding_settings(&self) -> EncodingSettings {
        EncodingSettings::new(self.bitwidth, self.symmetric)
            .with_strict_symmetric(self.strict_symmetric)
            .with_unsigned_symmetric(self.unsigned_symmetric)
    }

    /// Reject bitwidth / data type combinations that cannot be simulated
    pub fn validate(&self) -> Result<()> {
        match self.data_type {
            QuantDataType::Int if !(1..=32).contains(&self.bitwidth) => Err(Error::ConfigError(format!(
                "integer bitwidth must be between 1 and 32, got {}",
                self.bitwidth
            ))),
            QuantDataType::Float if self.bitwidth != 16 => Err(Error::ConfigError(format!(
                "float quantization supports 16 bits only, got {}",
                self.bitwidth
            ))),
            _ if !(50.0..=100.0).contains(&self.percentile) => Err(Error::ConfigError(format!(
                "percentile must be within [50, 100], got {}",
                self.percentile
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self::int(8, false)
    }
}
