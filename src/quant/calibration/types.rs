//! Type definitions for encoding calibration

use serde::{Deserialize, Serialize};

/// Default clipping percentile for [`QuantScheme::PostTrainingPercentile`]
pub const DEFAULT_PERCENTILE: f32 = 99.99;

/// Statistic used to turn observed values into an encoding range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantScheme {
    /// Min-max: the full observed range
    #[default]
    PostTrainingTf,
    /// Histogram search for the clipping range with the lowest
    /// quantize-dequantize error (highest SQNR)
    PostTrainingTfEnhanced,
    /// Histogram percentile clipping
    PostTrainingPercentile,
}

impl QuantScheme {
    /// Wire name used in encodings files
    pub fn name(&self) -> &'static str {
        match self {
            QuantScheme::PostTrainingTf => "post_training_tf",
            QuantScheme::PostTrainingTfEnhanced => "post_training_tf_enhanced",
            QuantScheme::PostTrainingPercentile => "post_training_percentile",
        }
    }

    /// Whether the scheme keeps a value histogram
    pub fn uses_histogram(&self) -> bool {
        !matches!(self, QuantScheme::PostTrainingTf)
    }
}

impl std::fmt::Display for QuantScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
