//! Op-type dispatch table
//!
//! Every op type the host engine can execute is described by an [`OpSpec`]:
//! the kernel that computes it, which initializer inputs are weights or
//! biases, and which weight axis holds output channels. Custom operators are
//! added with [`OpRegistry::register`] before a sim is built.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::ArrayD;

use super::{kernels, Node};
use crate::error::Result;

/// Op type of the inserted quantize-dequantize node
pub const QC_QUANTIZE_OP: &str = "QcQuantizeOp";

/// Kernel signature: node attributes plus present inputs in order
pub type KernelFn = fn(&Node, &[&ArrayD<f32>]) -> Result<Vec<ArrayD<f32>>>;

/// Role of an initializer input
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRole {
    Weight,
    Bias,
}

impl ParamRole {
    /// Name used by policy files (`params.weight`, `params.bias`)
    pub fn name(&self) -> &'static str {
        match self {
            ParamRole::Weight => "weight",
            ParamRole::Bias => "bias",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "weight" => Some(ParamRole::Weight),
            "bias" => Some(ParamRole::Bias),
            _ => None,
        }
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution and quantization metadata for one op type
#[derive(Clone, Copy)]
pub struct OpSpec {
    /// Forward computation
    pub kernel: KernelFn,
    /// Role of the initializer at a given input index
    pub param_role: fn(&Node, usize) -> ParamRole,
    /// Output-channel axis of a weight with the given rank
    pub channel_axis: fn(&Node, usize) -> usize,
}

impl OpSpec {
    /// Spec whose initializer inputs are all weights with channels on axis 0
    pub fn new(kernel: KernelFn) -> Self {
        Self { kernel, param_role: all_weights, channel_axis: first_axis }
    }

    pub fn with_param_role(mut self, param_role: fn(&Node, usize) -> ParamRole) -> Self {
        self.param_role = param_role;
        self
    }

    pub fn with_channel_axis(mut self, channel_axis: fn(&Node, usize) -> usize) -> Self {
        self.channel_axis = channel_axis;
        self
    }
}

impl fmt::Debug for OpSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpSpec").finish_non_exhaustive()
    }
}

fn all_weights(_: &Node, _: usize) -> ParamRole {
    ParamRole::Weight
}

fn weight_then_bias(_: &Node, index: usize) -> ParamRole {
    if index == 2 {
        ParamRole::Bias
    } else {
        ParamRole::Weight
    }
}

fn second_is_bias(_: &Node, index: usize) -> ParamRole {
    if index == 1 {
        ParamRole::Bias
    } else {
        ParamRole::Weight
    }
}

fn first_axis(_: &Node, _: usize) -> usize {
    0
}

fn second_axis(_: &Node, _: usize) -> usize {
    1
}

fn gemm_axis(node: &Node, _: usize) -> usize {
    if node.attr_int("transB").unwrap_or(0) != 0 {
        0
    } else {
        1
    }
}

fn last_axis(_: &Node, rank: usize) -> usize {
    rank.saturating_sub(1)
}

/// Dispatch table keyed by op-type string
#[derive(Clone, Debug)]
pub struct OpRegistry {
    specs: BTreeMap<String, OpSpec>,
}

impl OpRegistry {
    /// Registry without any op types
    pub fn empty() -> Self {
        Self { specs: BTreeMap::new() }
    }

    /// Register (or replace) an op type
    pub fn register(&mut self, op_type: impl Into<String>, spec: OpSpec) -> &mut Self {
        self.specs.insert(op_type.into(), spec);
        self
    }

    pub fn get(&self, op_type: &str) -> Option<&OpSpec> {
        self.specs.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.specs.contains_key(op_type)
    }

    /// Registered op types in sorted order
    pub fn op_types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// Role of the initializer read at `index`; unknown ops default to weight
    pub fn param_role(&self, node: &Node, index: usize) -> ParamRole {
        self.get(&node.op_type).map_or(ParamRole::Weight, |spec| (spec.param_role)(node, index))
    }

    /// Output-channel axis for a weight of the given rank
    pub fn channel_axis(&self, node: &Node, rank: usize) -> usize {
        self.get(&node.op_type).map_or(0, |spec| (spec.channel_axis)(node, rank))
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register(
                "Conv",
                OpSpec::new(kernels::conv).with_param_role(weight_then_bias),
            )
            .register(
                "ConvTranspose",
                OpSpec::new(kernels::conv_transpose)
                    .with_param_role(weight_then_bias)
                    .with_channel_axis(second_axis),
            )
            .register(
                "Gemm",
                OpSpec::new(kernels::gemm).with_param_role(weight_then_bias).with_channel_axis(gemm_axis),
            )
            .register("MatMul", OpSpec::new(kernels::matmul).with_channel_axis(last_axis))
            .register("Add", OpSpec::new(kernels::add).with_param_role(second_is_bias))
            .register("Mul", OpSpec::new(kernels::mul))
            .register("Relu", OpSpec::new(kernels::relu))
            .register("Flatten", OpSpec::new(kernels::flatten))
            .register("Identity", OpSpec::new(kernels::identity))
            .register("Constant", OpSpec::new(kernels::constant));
        registry
    }
}
