//! Resolve a policy file into per-tensor quantization decisions
//!
//! Precedence, lowest first:
//! 1. `defaults.ops` / `defaults.params`
//! 2. `op_type.<T>` rules of the producing (or consuming) op
//! 3. `params.<role>` for parameters
//! 4. `op_type.<T>.params.<role>` for parameters
//! 5. `model_input` / `model_output` boundary rules
//! 6. supergroup exclusions
//!
//! A tensor that no rule covers is left unquantized (fail-open).

use std::collections::BTreeMap;

use tracing::debug;

use super::schema::QuantsimConfig;
use crate::error::Result;
use crate::graph::{ElemType, Graph, Node, OpRegistry, ParamRole};
use crate::quant::TensorRole;

/// Quantization decision for one candidate tensor
#[derive(Clone, Debug, PartialEq)]
pub struct TensorPolicy {
    pub role: TensorRole,
    pub is_quantized: bool,
    pub is_symmetric: bool,
    /// Set when the tensor is quantized per channel
    pub channel_axis: Option<usize>,
}

/// Decisions for every float candidate of a graph
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedPolicy {
    pub tensors: BTreeMap<String, TensorPolicy>,
    pub strict_symmetric: bool,
    pub unsigned_symmetric: bool,
    pub per_channel_quantization: bool,
    /// Default symmetry of parameters
    pub param_symmetric: bool,
}

impl ResolvedPolicy {
    pub fn get(&self, tensor: &str) -> Option<&TensorPolicy> {
        self.tensors.get(tensor)
    }

    pub fn is_quantized(&self, tensor: &str) -> bool {
        self.get(tensor).is_some_and(|p| p.is_quantized)
    }

    /// Names of tensors that will be quantized
    pub fn quantized_tensors(&self) -> impl Iterator<Item = &str> {
        self.tensors.iter().filter(|(_, p)| p.is_quantized).map(|(name, _)| name.as_str())
    }
}

/// Applies a [`QuantsimConfig`] to a graph
pub struct ConfigResolver<'a> {
    config: &'a QuantsimConfig,
    registry: &'a OpRegistry,
}

impl<'a> ConfigResolver<'a> {
    /// Validate the policy against the registry
    pub fn new(config: &'a QuantsimConfig, registry: &'a OpRegistry) -> Result<Self> {
        config.validate(registry)?;
        Ok(Self { config, registry })
    }

    /// Decide quantization for every float candidate tensor of `graph`
    pub fn resolve(&self, graph: &Graph) -> Result<ResolvedPolicy> {
        graph.validate()?;
        let mut tensors = BTreeMap::new();

        for input in graph.inputs.iter().filter(|v| v.elem_type == ElemType::Float) {
            tensors.insert(input.name.clone(), self.input_policy());
        }

        for node in &graph.nodes {
            for output in &node.outputs {
                if graph.elem_type_of(output) != ElemType::Float || graph.is_graph_input(output) {
                    continue;
                }
                tensors.insert(output.clone(), self.output_policy(node, output));
            }
            for (index, name) in node.present_inputs() {
                if !graph.is_initializer(name) || tensors.contains_key(name) {
                    continue;
                }
                let role = self.registry.param_role(node, index);
                tensors.insert(name.to_string(), self.param_policy(graph, node, name, role));
            }
        }

        for node in &graph.nodes {
            let forced = self
                .config
                .op_type
                .get(&node.op_type)
                .and_then(|r| r.is_input_quantized)
                .or(self.config.defaults.ops.is_input_quantized);
            if forced != Some(true) {
                continue;
            }
            for (_, name) in node.present_inputs() {
                if let Some(policy) = tensors.get_mut(name) {
                    if policy.role == TensorRole::Activation {
                        policy.is_quantized = true;
                    }
                }
            }
        }

        if let Some(quantized) = self.config.model_output.is_output_quantized {
            for output in &graph.outputs {
                if let Some(policy) = tensors.get_mut(&output.name) {
                    policy.is_quantized = quantized;
                }
            }
        }

        for edge in self.supergroup_interior(graph) {
            if let Some(policy) = tensors.get_mut(&edge) {
                policy.is_quantized = false;
            }
        }

        Ok(ResolvedPolicy {
            tensors,
            strict_symmetric: self.config.strict_symmetric(),
            unsigned_symmetric: self.config.unsigned_symmetric(),
            per_channel_quantization: self.config.per_channel_quantization(),
            param_symmetric: self.config.defaults.params.is_symmetric.unwrap_or(false),
        })
    }

    fn input_policy(&self) -> TensorPolicy {
        TensorPolicy {
            role: TensorRole::Activation,
            is_quantized: self.config.model_input.is_input_quantized.unwrap_or(true),
            is_symmetric: self.config.defaults.ops.is_symmetric.unwrap_or(false),
            channel_axis: None,
        }
    }

    fn output_policy(&self, node: &Node, output: &str) -> TensorPolicy {
        let rule = self.config.op_type.get(&node.op_type);
        let defaults = &self.config.defaults.ops;

        let is_quantized = match rule.and_then(|r| r.is_output_quantized).or(defaults.is_output_quantized) {
            Some(q) => q,
            None => {
                debug!(tensor = output, op_type = %node.op_type, "no output rule, leaving unquantized");
                false
            }
        };
        TensorPolicy {
            role: TensorRole::Activation,
            is_quantized,
            is_symmetric: rule.and_then(|r| r.is_symmetric).or(defaults.is_symmetric).unwrap_or(false),
            channel_axis: None,
        }
    }

    fn param_policy(&self, graph: &Graph, node: &Node, name: &str, role: ParamRole) -> TensorPolicy {
        let op_rule = self.config.op_type.get(&node.op_type);
        let op_param = op_rule.and_then(|r| r.params.get(role.name()));
        let global = self.config.params.get(role.name());
        let defaults = &self.config.defaults.params;

        let is_quantized = match op_param
            .and_then(|p| p.is_quantized)
            .or(global.and_then(|p| p.is_quantized))
            .or(defaults.is_quantized)
        {
            Some(q) => q,
            None => {
                debug!(tensor = name, role = %role, "no parameter rule, leaving unquantized");
                false
            }
        };
        let is_symmetric = op_param
            .and_then(|p| p.is_symmetric)
            .or(global.and_then(|p| p.is_symmetric))
            .or(op_rule.and_then(|r| r.is_symmetric))
            .or(defaults.is_symmetric)
            .unwrap_or(false);

        let rank = graph.initializers.get(name).map_or(0, |w| w.ndim());
        let per_channel = role == ParamRole::Weight
            && rank >= 2
            && op_rule
                .and_then(|r| r.per_channel_quantization)
                .unwrap_or_else(|| self.config.per_channel_quantization());

        TensorPolicy {
            role: TensorRole::Param(role),
            is_quantized,
            is_symmetric,
            channel_axis: per_channel.then(|| self.registry.channel_axis(node, rank)),
        }
    }

    /// Edges strictly inside a matched supergroup chain
    ///
    /// An edge is interior when it is the single output of one chain member,
    /// consumed only by the next member, and not a graph output.
    fn supergroup_interior(&self, graph: &Graph) -> Vec<String> {
        let mut interior = Vec::new();
        for group in &self.config.supergroups {
            let Some((first, rest)) = group.op_list.split_first() else {
                continue;
            };
            for (start, node) in graph.nodes.iter().enumerate() {
                if &node.op_type != first {
                    continue;
                }
                let mut edges = Vec::with_capacity(rest.len());
                let mut current = start;
                let matched = rest.iter().all(|next_type| {
                    let [edge] = graph.nodes[current].outputs.as_slice() else {
                        return false;
                    };
                    if graph.is_graph_output(edge) {
                        return false;
                    }
                    match graph.consumers_of(edge).as_slice() {
                        [consumer] if graph.nodes[*consumer].op_type == *next_type => {
                            edges.push(edge.clone());
                            current = *consumer;
                            true
                        }
                        _ => false,
                    }
                });
                if matched {
                    debug!(ops = ?group.op_list, start = %node.name, "supergroup matched");
                    interior.extend(edges);
                }
            }
        }
        interior
    }
}
