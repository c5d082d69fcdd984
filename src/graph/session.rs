//! Host execution context
//!
//! A [`Session`] walks the nodes of a graph in order and evaluates each one
//! through the [`OpRegistry`]. Inserted `QcQuantizeOp` nodes are opaque to
//! the session: they are forwarded to a [`QuantizeHook`] together with the
//! back-end chosen by the node's domain.

use std::collections::HashMap;

use ndarray::ArrayD;

use super::{Graph, OpRegistry, QC_QUANTIZE_OP};
use crate::error::{Error, Result};
use crate::quant::Backend;

/// Receiver for quantize-dequantize nodes
pub trait QuantizeHook {
    /// Apply the quantizer named `quantizer` to `value`
    fn quantize(&mut self, quantizer: &str, value: &ArrayD<f32>, backend: Backend) -> Result<ArrayD<f32>>;
}

/// Hook that returns every value unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl QuantizeHook for Passthrough {
    fn quantize(&mut self, _quantizer: &str, value: &ArrayD<f32>, _backend: Backend) -> Result<ArrayD<f32>> {
        Ok(value.clone())
    }
}

/// Execution context over one graph
pub struct Session<'a> {
    graph: &'a Graph,
    registry: &'a OpRegistry,
    hook: &'a mut dyn QuantizeHook,
}

impl<'a> Session<'a> {
    pub fn new(graph: &'a Graph, registry: &'a OpRegistry, hook: &'a mut dyn QuantizeHook) -> Self {
        Self { graph, registry, hook }
    }

    pub fn graph(&self) -> &Graph {
        self.graph
    }

    /// Names of the float graph inputs that must be fed
    pub fn input_names(&self) -> Vec<&str> {
        self.graph.inputs.iter().map(|v| v.name.as_str()).collect()
    }

    /// Run a forward pass; returns graph outputs in declaration order
    pub fn run(&mut self, feeds: &HashMap<String, ArrayD<f32>>) -> Result<Vec<ArrayD<f32>>> {
        let graph = self.graph;
        for input in &graph.inputs {
            let value = feeds
                .get(&input.name)
                .ok_or_else(|| Error::Graph(format!("missing value for graph input '{}'", input.name)))?;
            let fits = value.ndim() == input.shape.len()
                && input.shape.iter().zip(value.shape()).all(|(dim, &extent)| dim.accepts(extent));
            if !input.shape.is_empty() && !fits {
                return Err(Error::ShapeMismatch {
                    expected: input
                        .shape
                        .iter()
                        .map(|d| match d {
                            super::Dim::Fixed(n) => *n,
                            super::Dim::Dynamic(_) => 0,
                        })
                        .collect(),
                    actual: value.shape().to_vec(),
                });
            }
        }

        let mut values: HashMap<&str, ArrayD<f32>> = HashMap::new();
        for node in &graph.nodes {
            let mut args = Vec::with_capacity(node.inputs.len());
            for (_, name) in node.present_inputs() {
                let value = values
                    .get(name)
                    .or_else(|| feeds.get(name))
                    .or_else(|| graph.initializers.get(name))
                    .ok_or_else(|| {
                        Error::Graph(format!("node '{}' reads undefined tensor '{}'", node.name, name))
                    })?;
                args.push(value);
            }

            let outputs = if node.op_type == QC_QUANTIZE_OP {
                let quantizer = node.attr_str("quantizer").ok_or_else(|| {
                    Error::Graph(format!("node '{}' has no 'quantizer' attribute", node.name))
                })?;
                let input = args.first().ok_or_else(|| {
                    Error::Graph(format!("node '{}' has no input", node.name))
                })?;
                let backend = Backend::from_domain(&node.domain);
                vec![self.hook.quantize(quantizer, input, backend)?]
            } else {
                let spec =
                    self.registry.get(&node.op_type).ok_or_else(|| Error::UnknownOp(node.op_type.clone()))?;
                (spec.kernel)(node, &args)?
            };

            if outputs.len() != node.outputs.len() {
                return Err(Error::Graph(format!(
                    "node '{}' produced {} values for {} outputs",
                    node.name,
                    outputs.len(),
                    node.outputs.len()
                )));
            }
            for (name, value) in node.outputs.iter().zip(outputs) {
                values.insert(name.as_str(), value);
            }
        }

        graph
            .outputs
            .iter()
            .map(|out| {
                values
                    .get(out.name.as_str())
                    .or_else(|| feeds.get(&out.name))
                    .cloned()
                    .ok_or_else(|| Error::Graph(format!("graph output '{}' was not computed", out.name)))
            })
            .collect()
    }
}
