//! Simulation options

use super::schema::QuantsimConfig;
use crate::error::{Error, Result};
use crate::quant::{QuantDataType, QuantScheme, QuantizerConfig, DEFAULT_PERCENTILE};

/// Settings applied when a sim is built
#[derive(Debug, Clone, PartialEq)]
pub struct QuantSimOptions {
    pub quant_scheme: QuantScheme,
    /// Bitwidth of activation quantizers
    pub default_activation_bw: u8,
    /// Bitwidth of parameter quantizers
    pub default_param_bw: u8,
    pub default_data_type: QuantDataType,
    /// Place inserted quantize nodes on the accelerated back-end by default
    pub use_accelerator: bool,
    /// Clipping percentile for the percentile scheme
    pub percentile: f32,
    /// Quantization policy
    pub policy: QuantsimConfig,
}

impl Default for QuantSimOptions {
    fn default() -> Self {
        Self {
            quant_scheme: QuantScheme::PostTrainingTfEnhanced,
            default_activation_bw: 8,
            default_param_bw: 8,
            default_data_type: QuantDataType::Int,
            use_accelerator: false,
            percentile: DEFAULT_PERCENTILE,
            policy: QuantsimConfig::default(),
        }
    }
}

impl QuantSimOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quant_scheme(mut self, scheme: QuantScheme) -> Self {
        self.quant_scheme = scheme;
        self
    }

    pub fn with_activation_bw(mut self, bitwidth: u8) -> Self {
        self.default_activation_bw = bitwidth;
        self
    }

    pub fn with_param_bw(mut self, bitwidth: u8) -> Self {
        self.default_param_bw = bitwidth;
        self
    }

    pub fn with_data_type(mut self, data_type: QuantDataType) -> Self {
        self.default_data_type = data_type;
        self
    }

    pub fn with_accelerator(mut self, use_accelerator: bool) -> Self {
        self.use_accelerator = use_accelerator;
        self
    }

    pub fn with_percentile(mut self, percentile: f32) -> Self {
        self.percentile = percentile;
        self
    }

    pub fn with_policy(mut self, policy: QuantsimConfig) -> Self {
        self.policy = policy;
        self
    }

    /// Load the policy from a JSON file
    pub fn with_policy_file(self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(self.with_policy(QuantsimConfig::from_file(path)?))
    }

    /// Quantizer settings for an activation or parameter
    pub(crate) fn quantizer_config(&self, is_param: bool, symmetric: bool) -> QuantizerConfig {
        let bitwidth = if is_param { self.default_param_bw } else { self.default_activation_bw };
        QuantizerConfig {
            bitwidth,
            data_type: self.default_data_type,
            symmetric,
            strict_symmetric: self.policy.strict_symmetric(),
            unsigned_symmetric: self.policy.unsigned_symmetric(),
            scheme: self.quant_scheme,
            percentile: self.percentile,
        }
    }

    /// Reject settings no quantizer could use
    pub fn validate(&self) -> Result<()> {
        for (what, bw) in [("activation", self.default_activation_bw), ("param", self.default_param_bw)] {
            self.quantizer_config(what == "param", false)
                .validate()
                .map_err(|e| Error::ConfigError(format!("default {what} bitwidth {bw}: {e}")))?;
        }
        Ok(())
    }
}
