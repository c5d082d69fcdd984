//! One-shot helpers over a single batch

use super::calibrator::EncodingAnalyzer;
use super::types::{QuantScheme, DEFAULT_PERCENTILE};
use crate::error::Result;
use crate::quant::encoding::{Encoding, EncodingSettings};

/// Encoding for one batch under the given scheme
pub fn compute_encoding(data: &[f32], scheme: QuantScheme, settings: EncodingSettings) -> Result<Encoding> {
    let mut analyzer = EncodingAnalyzer::new(scheme).with_percentile(DEFAULT_PERCENTILE);
    analyzer.update(data);
    analyzer.compute(settings)
}

/// Mean squared quantize-dequantize error of `encoding` over `data`
pub fn quantization_mse(data: &[f32], encoding: &Encoding, strict: bool) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let sum: f64 = data
        .iter()
        .map(|&x| {
            let d = f64::from(x - encoding.quantize_dequantize(x, strict));
            d * d
        })
        .sum();
    (sum / data.len() as f64) as f32
}
