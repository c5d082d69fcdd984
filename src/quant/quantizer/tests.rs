//! Tests for the quantizer state machine

use super::*;
use crate::graph::ParamRole;
use crate::quant::{Backend, QuantDataType, QuantScheme};
use crate::Error;
use approx::assert_abs_diff_eq;
use ndarray::{Array, ArrayD, Dimension, IxDyn};
use proptest::prelude::*;

fn activation(config: QuantizerConfig) -> TensorQuantizer {
    TensorQuantizer::new("act", TensorRole::Activation, config)
}

fn ramp(shape: &[usize]) -> ArrayD<f32> {
    let n: usize = shape.iter().product();
    Array::from_shape_fn(IxDyn(shape), |d| {
        let flat = d.as_array_view().iter().fold(0usize, |acc, &i| acc * 7 + i);
        (flat % n) as f32 / n as f32 * 4.0 - 1.0
    })
}

fn calibrated(config: QuantizerConfig, data: &ArrayD<f32>) -> TensorQuantizer {
    let mut q = activation(config);
    q.start_calibration();
    q.forward(data, Backend::Cpu).unwrap();
    q.finalize_calibration().unwrap();
    q
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(100))]

    /// Passthrough and stats collection never change values
    #[test]
    fn prop_passthrough_is_identity(values in prop::collection::vec(-50.0f32..50.0, 1..64)) {
        let x = Array::from_shape_vec(IxDyn(&[values.len()]), values).unwrap();
        let mut q = activation(QuantizerConfig::int(4, false));
        prop_assert_eq!(q.forward(&x, Backend::Cpu).unwrap(), x.clone());
        q.start_calibration();
        prop_assert_eq!(q.op_mode(), OpMode::UpdateStats);
        prop_assert_eq!(q.forward(&x, Backend::Cpu).unwrap(), x);
    }

    /// A calibrated quantizer is idempotent
    #[test]
    fn prop_calibrated_idempotent(
        values in prop::collection::vec(-10.0f32..10.0, 2..64),
        symmetric in any::<bool>(),
    ) {
        let x = Array::from_shape_vec(IxDyn(&[values.len()]), values).unwrap();
        let mut q = calibrated(QuantizerConfig::int(8, symmetric), &x);
        let once = q.forward(&x, Backend::Cpu).unwrap();
        let twice = q.forward(&once, Backend::Cpu).unwrap();
        let scale = q.encodings().unwrap()[0].scale;
        for (a, b) in once.iter().zip(twice.iter()) {
            prop_assert!((a - b).abs() <= scale * 1e-3);
        }
    }
}

// ========================================================================
// STATE MACHINE
// ========================================================================

#[test]
fn test_initial_state_is_passthrough() {
    let q = activation(QuantizerConfig::default());
    assert_eq!(q.op_mode(), OpMode::Passthrough);
    assert!(q.enabled());
    assert!(q.encodings().is_none());
}

#[test]
fn test_activation_calibration_flow() {
    let x = ramp(&[4, 8]);
    let mut q = activation(QuantizerConfig::int(8, false));
    q.start_calibration();
    assert_eq!(q.op_mode(), OpMode::UpdateStats);
    q.forward(&x, Backend::Cpu).unwrap();
    assert!(q.encodings().is_none());

    q.finalize_calibration().unwrap();
    assert_eq!(q.op_mode(), OpMode::QuantizeDequantize);
    assert!(q.is_encoding_valid());

    let out = q.forward(&x, Backend::Cpu).unwrap();
    assert_ne!(out, x);
}

#[test]
fn test_finalize_without_data_fails() {
    let mut q = activation(QuantizerConfig::default());
    q.start_calibration();
    assert!(matches!(q.finalize_calibration(), Err(Error::NotCalibrated)));
}

#[test]
fn test_param_one_shot_encodes_first_value() {
    let w = ramp(&[3, 5]);
    let mut q = TensorQuantizer::new("w", TensorRole::Param(ParamRole::Weight), QuantizerConfig::int(8, true));
    q.start_calibration();
    assert_eq!(q.op_mode(), OpMode::OneShotQuantizeDequantize);

    let out = q.forward(&w, Backend::Cpu).unwrap();
    let enc = q.encodings().unwrap()[0];
    assert_eq!(enc.min, -enc.max);
    assert_eq!(enc.offset, -128);

    // later values reuse the first encoding
    let wider = &w * 10.0;
    q.forward(&wider, Backend::Cpu).unwrap();
    assert_eq!(q.encodings().unwrap()[0], enc);
    q.finalize_calibration().unwrap();
    assert_eq!(q.forward(&w, Backend::Cpu).unwrap(), out);
}

#[test]
fn test_disabled_quantizer_is_passthrough() {
    let x = ramp(&[16]);
    let mut q = calibrated(QuantizerConfig::int(4, false), &x);
    q.set_enabled(false);
    assert_eq!(q.op_mode(), OpMode::Passthrough);
    assert_eq!(q.forward(&x, Backend::Cpu).unwrap(), x);

    q.set_enabled(true);
    assert_eq!(q.op_mode(), OpMode::QuantizeDequantize);
}

#[test]
fn test_disabled_quantizer_skips_calibration() {
    let mut q = activation(QuantizerConfig::default());
    q.set_enabled(false);
    q.start_calibration();
    assert_eq!(q.op_mode(), OpMode::Passthrough);
    assert!(q.finalize_calibration().is_ok());
    assert!(q.encodings().is_none());
}

#[test]
fn test_changing_bitwidth_invalidates_encodings() {
    let x = ramp(&[16]);
    let mut q = calibrated(QuantizerConfig::int(8, false), &x);
    q.set_bitwidth(8).unwrap();
    assert!(q.is_encoding_valid());
    q.set_bitwidth(4).unwrap();
    assert!(q.encodings().is_none());
    assert_eq!(q.op_mode(), OpMode::Passthrough);
}

#[test]
fn test_invalid_overrides_rejected() {
    let mut q = activation(QuantizerConfig::default());
    assert!(matches!(q.set_bitwidth(0), Err(Error::ConfigError(_))));
    assert!(q.set_data_type(QuantDataType::Float).is_err());
    q.set_bitwidth(16).unwrap();
    q.set_data_type(QuantDataType::Float).unwrap();
}

#[test]
fn test_reset_encodings() {
    let x = ramp(&[16]);
    let mut q = calibrated(QuantizerConfig::default(), &x);
    q.reset_encodings();
    assert!(q.encodings().is_none());
    assert_eq!(q.forward(&x, Backend::Cpu).unwrap(), x);
}

#[test]
fn test_float16_needs_no_statistics() {
    let x = ramp(&[8]);
    let mut q = activation(QuantizerConfig::float16());
    q.start_calibration();
    q.finalize_calibration().unwrap();
    let out = q.forward(&x, Backend::Cpu).unwrap();
    for (a, b) in out.iter().zip(x.iter()) {
        assert_eq!(*a, half::f16::from_f32(*b).to_f32());
    }
}

// ========================================================================
// PER-CHANNEL
// ========================================================================

#[test]
fn test_per_channel_one_encoding_per_slice() {
    let mut w = ramp(&[4, 3, 2, 2]);
    // channel 3 is much wider than the others
    w.index_axis_mut(ndarray::Axis(0), 3).mapv_inplace(|v| v * 100.0);

    let mut q = TensorQuantizer::new("w", TensorRole::Param(ParamRole::Weight), QuantizerConfig::int(8, true));
    q.enable_per_channel_quantization(0).unwrap();
    q.start_calibration();
    q.forward(&w, Backend::Cpu).unwrap();
    q.finalize_calibration().unwrap();

    let encs = q.encodings().unwrap();
    assert_eq!(encs.len(), 4);
    assert_eq!(q.num_encodings(), 4);
    assert!(encs[3].scale > encs[0].scale * 5.0);
}

#[test]
fn test_per_channel_rejected_after_calibration() {
    let x = ramp(&[2, 2]);
    let mut q = calibrated(QuantizerConfig::default(), &x);
    assert!(matches!(q.enable_per_channel_quantization(0), Err(Error::InvalidState(_))));
}

#[test]
fn test_per_channel_channel_count_mismatch() {
    let mut q = activation(QuantizerConfig::default());
    q.enable_per_channel_quantization(1).unwrap();
    q.start_calibration();
    q.forward(&ramp(&[2, 3]), Backend::Cpu).unwrap();
    assert!(matches!(q.forward(&ramp(&[2, 5]), Backend::Cpu), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_backends_match_within_tolerance() {
    let x = ramp(&[8, 64]);
    for scheme in [QuantScheme::PostTrainingTf, QuantScheme::PostTrainingTfEnhanced] {
        let mut q = calibrated(QuantizerConfig::int(8, false).with_scheme(scheme), &x);
        let cpu = q.forward(&x, Backend::Cpu).unwrap();
        let acc = q.forward(&x, Backend::Accelerated).unwrap();
        for (a, b) in cpu.iter().zip(acc.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }
}
