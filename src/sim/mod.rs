//! Quantization simulation model
//!
//! [`QuantSimModel`] owns an instrumented copy of a host graph together with
//! one [`TensorQuantizer`] per candidate tensor. The host engine only sees
//! opaque `QcQuantizeOp` nodes; each one names its quantizer, and the model
//! resolves that name through its quantizer table when a [`Session`] runs.
//!
//! Lifecycle:
//! 1. [`QuantSimModel::new`] resolves the policy and instruments the graph
//! 2. [`QuantSimModel::compute_encodings`] calibrates (or
//!    [`QuantSimModel::load_encodings`] installs saved encodings)
//! 3. [`QuantSimModel::run`] simulates quantized inference
//! 4. [`QuantSimModel::export`] persists encodings and the original graph

mod calibrate;
mod codec;
mod instrument;

pub use codec::{EncodingMismatch, EncodingRecord, EncodingsFile, MismatchKind, QuantizerArgs};

use std::collections::{BTreeMap, HashMap};

use ndarray::ArrayD;
use tracing::info;

use crate::config::{ConfigResolver, QuantSimOptions, ResolvedPolicy};
use crate::error::{Error, Result};
use crate::graph::{Device, Graph, OpRegistry, QuantizeHook, Session, QC_QUANTIZE_OP};
use crate::quant::{Backend, TensorQuantizer, TensorRole};

/// Quantizers keyed by the tensor they observe
#[derive(Clone, Debug, Default)]
pub(crate) struct QuantizerTable(BTreeMap<String, TensorQuantizer>);

impl QuantizeHook for QuantizerTable {
    fn quantize(&mut self, quantizer: &str, value: &ArrayD<f32>, backend: Backend) -> Result<ArrayD<f32>> {
        let q = self
            .0
            .get_mut(quantizer)
            .ok_or_else(|| Error::Graph(format!("no quantizer named '{quantizer}'")))?;
        q.forward(value, backend)
    }
}

/// Host graph instrumented with simulated quantizers
#[derive(Clone, Debug)]
pub struct QuantSimModel {
    original: Graph,
    graph: Graph,
    registry: OpRegistry,
    quantizers: QuantizerTable,
    options: QuantSimOptions,
    policy: ResolvedPolicy,
}

impl QuantSimModel {
    /// Build a sim over the built-in operator set
    pub fn new(graph: Graph, options: QuantSimOptions) -> Result<Self> {
        Self::with_registry(graph, OpRegistry::default(), options)
    }

    /// Build a sim with a caller-extended operator registry
    pub fn with_registry(graph: Graph, registry: OpRegistry, options: QuantSimOptions) -> Result<Self> {
        options.validate()?;
        let policy = ConfigResolver::new(&options.policy, &registry)?.resolve(&graph)?;

        let mut quantizers = BTreeMap::new();
        for (name, tensor) in &policy.tensors {
            let config = options.quantizer_config(tensor.role.is_param(), tensor.is_symmetric);
            let mut quantizer = TensorQuantizer::new(name.clone(), tensor.role, config);
            if let Some(axis) = tensor.channel_axis {
                quantizer.enable_per_channel_quantization(axis)?;
                if let Some(weight) = graph.initializers.get(name) {
                    let channels = weight.shape().get(axis).copied().ok_or_else(|| {
                        Error::ConfigError(format!("channel axis {axis} out of range for '{name}'"))
                    })?;
                    quantizer.set_num_channels(channels);
                }
            }
            quantizer.set_enabled(tensor.is_quantized);
            quantizers.insert(name.clone(), quantizer);
        }

        let default_device = if options.use_accelerator { Device::Accelerator } else { Device::Cpu };
        let instrumented = instrument::instrument(&graph, quantizers.keys().map(String::as_str), default_device)?;

        info!(
            graph = %graph.name,
            quantizers = quantizers.len(),
            enabled = quantizers.values().filter(|q| q.enabled()).count(),
            nodes = instrumented.nodes.len(),
            "graph instrumented"
        );

        Ok(Self {
            original: graph,
            graph: instrumented,
            registry,
            quantizers: QuantizerTable(quantizers),
            options,
            policy,
        })
    }

    /// The instrumented graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The graph as it was before instrumentation
    pub fn original_graph(&self) -> &Graph {
        &self.original
    }

    pub fn registry(&self) -> &OpRegistry {
        &self.registry
    }

    pub fn options(&self) -> &QuantSimOptions {
        &self.options
    }

    /// Resolved per-tensor policy the sim was built from
    pub fn policy(&self) -> &ResolvedPolicy {
        &self.policy
    }

    pub fn quantizer(&self, tensor: &str) -> Option<&TensorQuantizer> {
        self.quantizers.0.get(tensor)
    }

    pub fn quantizer_mut(&mut self, tensor: &str) -> Option<&mut TensorQuantizer> {
        self.quantizers.0.get_mut(tensor)
    }

    pub fn quantizers(&self) -> impl Iterator<Item = (&str, &TensorQuantizer)> {
        self.quantizers.0.iter().map(|(name, q)| (name.as_str(), q))
    }

    /// Tensors carrying an activation quantizer
    pub fn activation_names(&self) -> Vec<&str> {
        self.names_where(|role| role == TensorRole::Activation)
    }

    /// Tensors carrying a parameter quantizer
    pub fn param_names(&self) -> Vec<&str> {
        self.names_where(|role| role.is_param())
    }

    fn names_where(&self, keep: impl Fn(TensorRole) -> bool) -> Vec<&str> {
        self.quantizers.0.iter().filter(|(_, q)| keep(q.role())).map(|(name, _)| name.as_str()).collect()
    }

    /// Quantize `tensor` with one encoding per slice along `axis`
    ///
    /// Must be called before calibration.
    pub fn enable_per_channel_quantization(&mut self, tensor: &str, axis: usize) -> Result<()> {
        let channels = match self.original.initializers.get(tensor) {
            Some(weight) => Some(weight.shape().get(axis).copied().ok_or_else(|| Error::ShapeMismatch {
                expected: vec![axis + 1],
                actual: weight.shape().to_vec(),
            })?),
            None => None,
        };
        let quantizer = self
            .quantizers
            .0
            .get_mut(tensor)
            .ok_or_else(|| Error::Graph(format!("no quantizer named '{tensor}'")))?;
        quantizer.enable_per_channel_quantization(axis)?;
        if let Some(channels) = channels {
            quantizer.set_num_channels(channels);
        }
        Ok(())
    }

    /// Move the quantize node of `tensor` to another back-end
    pub fn set_backend(&mut self, tensor: &str, backend: Backend) -> Result<()> {
        let node = self
            .graph
            .nodes
            .iter_mut()
            .find(|n| n.op_type == QC_QUANTIZE_OP && n.attr_str("quantizer") == Some(tensor))
            .ok_or_else(|| Error::Graph(format!("no quantize node for '{tensor}'")))?;
        node.domain = backend.domain().to_string();
        Ok(())
    }

    /// Execution context over the instrumented graph
    pub fn session(&mut self) -> Session<'_> {
        Session::new(&self.graph, &self.registry, &mut self.quantizers)
    }

    /// Run one simulated forward pass
    pub fn run(&mut self, feeds: &HashMap<String, ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        self.session().run(feeds)
    }
}
