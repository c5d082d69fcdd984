//! Per-tensor quantizer state machine

use ndarray::{ArrayD, Axis};
use tracing::debug;

use super::config::QuantizerConfig;
use super::types::{OpMode, TensorRole};
use crate::error::{Error, Result};
use crate::quant::backend::Backend;
use crate::quant::calibration::EncodingAnalyzer;
use crate::quant::encoding::{Encoding, QuantDataType};

/// Simulated quantizer attached to one graph tensor
///
/// Starts in [`OpMode::Passthrough`]; calibration moves it through
/// statistics collection to [`OpMode::QuantizeDequantize`]. Any change to
/// its numeric configuration discards encodings and statistics.
#[derive(Clone, Debug)]
pub struct TensorQuantizer {
    name: String,
    role: TensorRole,
    enabled: bool,
    config: QuantizerConfig,
    op_mode: OpMode,
    /// Axis holding channels when quantizing per channel
    channel_axis: Option<usize>,
    /// Channel count, known once a value (or the parameter shape) is seen
    num_channels: Option<usize>,
    analyzers: Vec<EncodingAnalyzer>,
    encodings: Option<Vec<Encoding>>,
}

impl TensorQuantizer {
    pub fn new(name: impl Into<String>, role: TensorRole, config: QuantizerConfig) -> Self {
        Self {
            name: name.into(),
            role,
            enabled: true,
            config,
            op_mode: OpMode::Passthrough,
            channel_axis: None,
            num_channels: None,
            analyzers: Vec::new(),
            encodings: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> TensorRole {
        self.role
    }

    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn op_mode(&self) -> OpMode {
        self.op_mode
    }

    pub fn bitwidth(&self) -> u8 {
        self.config.bitwidth
    }

    pub fn data_type(&self) -> QuantDataType {
        self.config.data_type
    }

    pub fn use_symmetric_encodings(&self) -> bool {
        self.config.symmetric
    }

    pub fn use_strict_symmetric(&self) -> bool {
        self.config.strict_symmetric
    }

    pub fn use_unsigned_symmetric(&self) -> bool {
        self.config.unsigned_symmetric
    }

    pub fn is_per_channel(&self) -> bool {
        self.channel_axis.is_some()
    }

    pub fn channel_axis(&self) -> Option<usize> {
        self.channel_axis
    }

    pub fn num_channels(&self) -> Option<usize> {
        self.num_channels
    }

    /// Number of encodings this quantizer holds once calibrated
    pub fn num_encodings(&self) -> usize {
        if self.is_per_channel() {
            self.num_channels.unwrap_or(0)
        } else {
            1
        }
    }

    pub fn encodings(&self) -> Option<&[Encoding]> {
        self.encodings.as_deref()
    }

    /// Encodings are present, valid and match the channel count
    pub fn is_encoding_valid(&self) -> bool {
        self.encodings.as_ref().is_some_and(|encs| {
            !encs.is_empty()
                && encs.iter().all(Encoding::is_valid)
                && (!self.is_per_channel() || Some(encs.len()) == self.num_channels)
        })
    }

    // ------------------------------------------------------------------
    // User overrides
    // ------------------------------------------------------------------

    /// Enable or disable; a disabled quantizer is a pure passthrough
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.op_mode = if enabled && self.is_encoding_valid() {
            OpMode::QuantizeDequantize
        } else {
            OpMode::Passthrough
        };
    }

    pub fn set_bitwidth(&mut self, bitwidth: u8) -> Result<()> {
        self.reconfigure(QuantizerConfig { bitwidth, ..self.config })
    }

    pub fn set_data_type(&mut self, data_type: QuantDataType) -> Result<()> {
        self.reconfigure(QuantizerConfig { data_type, ..self.config })
    }

    pub fn set_use_symmetric_encodings(&mut self, symmetric: bool) -> Result<()> {
        self.reconfigure(QuantizerConfig { symmetric, ..self.config })
    }

    pub fn set_use_strict_symmetric(&mut self, strict_symmetric: bool) -> Result<()> {
        self.reconfigure(QuantizerConfig { strict_symmetric, ..self.config })
    }

    pub fn set_use_unsigned_symmetric(&mut self, unsigned_symmetric: bool) -> Result<()> {
        self.reconfigure(QuantizerConfig { unsigned_symmetric, ..self.config })
    }

    fn reconfigure(&mut self, config: QuantizerConfig) -> Result<()> {
        config.validate()?;
        if config != self.config {
            self.config = config;
            self.reset_encodings();
        }
        Ok(())
    }

    /// Switch to one encoding per slice along `axis`
    ///
    /// Only allowed before the quantizer has been calibrated.
    pub fn enable_per_channel_quantization(&mut self, axis: usize) -> Result<()> {
        if self.encodings.is_some() || self.op_mode != OpMode::Passthrough {
            return Err(Error::InvalidState(format!(
                "per-channel quantization of '{}' must be enabled before calibration",
                self.name
            )));
        }
        self.channel_axis = Some(axis);
        self.num_channels = None;
        self.analyzers.clear();
        Ok(())
    }

    pub(crate) fn set_num_channels(&mut self, channels: usize) {
        self.num_channels = Some(channels);
    }

    /// Drop encodings and statistics and fall back to float
    pub fn reset_encodings(&mut self) {
        self.encodings = None;
        self.analyzers.clear();
        self.op_mode = OpMode::Passthrough;
    }

    // ------------------------------------------------------------------
    // Calibration lifecycle
    // ------------------------------------------------------------------

    /// Clear previous results and enter the collection mode for this role
    pub(crate) fn start_calibration(&mut self) {
        self.reset_encodings();
        if self.enabled {
            self.op_mode = if self.role.is_param() {
                OpMode::OneShotQuantizeDequantize
            } else {
                OpMode::UpdateStats
            };
        }
    }

    /// Turn collected statistics into encodings
    ///
    /// Returns [`Error::NotCalibrated`] if an enabled quantizer saw no data.
    pub(crate) fn finalize_calibration(&mut self) -> Result<()> {
        if !self.enabled {
            self.op_mode = OpMode::Passthrough;
            return Ok(());
        }
        if self.encodings.is_none() {
            self.encodings = Some(self.compute_encodings()?);
        }
        self.op_mode = OpMode::QuantizeDequantize;
        Ok(())
    }

    /// Install encodings read from a file
    ///
    /// `strict_symmetric` is the strictness recorded in the file; `None`
    /// keeps the live flag.
    pub(crate) fn install_encodings(&mut self, encodings: Vec<Encoding>, strict_symmetric: Option<bool>) {
        if let Some(first) = encodings.first() {
            self.config.bitwidth = first.bitwidth;
            self.config.data_type = first.dtype;
            if first.dtype == QuantDataType::Int {
                self.config.symmetric = first.is_symmetric;
                if first.is_symmetric && first.offset == 0 {
                    self.config.unsigned_symmetric = true;
                }
                if let Some(strict) = strict_symmetric.filter(|_| first.is_symmetric) {
                    self.config.strict_symmetric = strict;
                }
            }
        }
        self.analyzers.clear();
        self.encodings = Some(encodings);
        self.enabled = true;
        self.op_mode = OpMode::QuantizeDequantize;
    }

    /// Apply the quantizer in its current mode
    pub fn forward(&mut self, value: &ArrayD<f32>, backend: Backend) -> Result<ArrayD<f32>> {
        if !self.enabled {
            return Ok(value.clone());
        }
        match self.op_mode {
            OpMode::Passthrough => Ok(value.clone()),
            OpMode::UpdateStats => {
                self.observe(value)?;
                Ok(value.clone())
            }
            OpMode::OneShotQuantizeDequantize => {
                if self.encodings.is_none() {
                    self.observe(value)?;
                    self.encodings = Some(self.compute_encodings()?);
                    debug!(quantizer = %self.name, "one-shot encoding computed");
                }
                self.quantize_dequantize(value, backend)
            }
            OpMode::QuantizeDequantize => self.quantize_dequantize(value, backend),
        }
    }

    fn check_channels(&mut self, value: &ArrayD<f32>, axis: usize) -> Result<usize> {
        if axis >= value.ndim() {
            return Err(Error::ShapeMismatch {
                expected: vec![axis + 1],
                actual: value.shape().to_vec(),
            });
        }
        let found = value.shape()[axis];
        match self.num_channels {
            Some(expected) if expected != found => Err(Error::ShapeMismatch {
                expected: vec![expected],
                actual: vec![found],
            }),
            _ => {
                self.num_channels = Some(found);
                Ok(found)
            }
        }
    }

    fn observe(&mut self, value: &ArrayD<f32>) -> Result<()> {
        let channels = match self.channel_axis {
            Some(axis) => Some(self.check_channels(value, axis)?),
            None => None,
        };
        if self.config.data_type == QuantDataType::Float {
            return Ok(());
        }

        let (scheme, percentile) = (self.config.scheme, self.config.percentile);
        let new_analyzer = || EncodingAnalyzer::new(scheme).with_percentile(percentile);
        match (self.channel_axis, channels) {
            (Some(axis), Some(channels)) => {
                if self.analyzers.len() != channels {
                    self.analyzers = (0..channels).map(|_| new_analyzer()).collect();
                }
                for (analyzer, lane) in self.analyzers.iter_mut().zip(value.axis_iter(Axis(axis))) {
                    let data: Vec<f32> = lane.iter().copied().collect();
                    analyzer.update(&data);
                }
            }
            _ => {
                if self.analyzers.is_empty() {
                    self.analyzers.push(new_analyzer());
                }
                let data = value.as_standard_layout();
                if let Some(slice) = data.as_slice() {
                    self.analyzers[0].update(slice);
                }
            }
        }
        Ok(())
    }

    fn compute_encodings(&mut self) -> Result<Vec<Encoding>> {
        if self.config.data_type == QuantDataType::Float {
            return Ok(vec![Encoding::float(self.config.bitwidth); self.num_encodings().max(1)]);
        }
        if self.analyzers.is_empty() {
            return Err(Error::NotCalibrated);
        }
        let settings = self.config.encoding_settings();
        self.analyzers.iter_mut().map(|a| a.compute(settings)).collect()
    }

    fn quantize_dequantize(&self, value: &ArrayD<f32>, backend: Backend) -> Result<ArrayD<f32>> {
        let encodings = self.encodings.as_deref().ok_or_else(|| {
            Error::InvalidState(format!("quantizer '{}' has no encodings", self.name))
        })?;
        let strict = self.config.strict_symmetric;
        let mut out = value.clone();

        match self.channel_axis {
            Some(axis) if self.config.data_type == QuantDataType::Int => {
                if axis >= out.ndim() || out.shape()[axis] != encodings.len() {
                    return Err(Error::ShapeMismatch {
                        expected: vec![encodings.len()],
                        actual: out.shape().to_vec(),
                    });
                }
                for (enc, lane) in encodings.iter().zip(out.axis_iter_mut(Axis(axis))) {
                    let enc = *enc;
                    backend.map_inplace(lane, move |x| enc.quantize_dequantize(x, strict));
                }
            }
            _ => {
                let enc = *encodings.first().ok_or_else(|| {
                    Error::InvalidState(format!("quantizer '{}' has no encodings", self.name))
                })?;
                backend.map_inplace(out.view_mut(), move |x| enc.quantize_dequantize(x, strict));
            }
        }
        Ok(out)
    }
}
