//! Host computational graph
//!
//! A small ONNX-shaped graph representation: named tensors flow between
//! nodes, parameters live in an initializer table, and graph inputs may carry
//! symbolic (dynamic) dimensions such as a variable batch size.
//!
//! The simulation core only relies on the structural queries defined here
//! (producers, consumers, element types, shapes); execution goes through
//! [`Session`] and the op dispatch table in [`OpRegistry`].

mod kernels;
mod registry;
mod session;
#[cfg(test)]
mod tests;

pub use registry::{KernelFn, OpRegistry, OpSpec, ParamRole, QC_QUANTIZE_OP};
pub use session::{Passthrough, QuantizeHook, Session};

use std::collections::{BTreeMap, HashSet};

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Element type of a graph tensor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElemType {
    /// 32-bit float; the only type that is ever quantized
    #[default]
    Float,
    /// 64-bit integer (indices, shape operands)
    Int64,
}

/// One dimension of a tensor shape
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dim {
    /// Static extent
    Fixed(usize),
    /// Symbolic extent resolved at run time (e.g. `"batch_size"`)
    Dynamic(String),
}

impl Dim {
    /// Whether a concrete extent satisfies this dimension
    pub fn accepts(&self, extent: usize) -> bool {
        match self {
            Dim::Fixed(n) => *n == extent,
            Dim::Dynamic(_) => true,
        }
    }
}

/// Name, element type and shape of a graph tensor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueInfo {
    pub name: String,
    #[serde(default)]
    pub elem_type: ElemType,
    #[serde(default)]
    pub shape: Vec<Dim>,
}

impl ValueInfo {
    /// Float tensor with the given shape
    pub fn float(name: impl Into<String>, shape: Vec<Dim>) -> Self {
        Self { name: name.into(), elem_type: ElemType::Float, shape }
    }

    /// Integer tensor with the given shape
    pub fn int64(name: impl Into<String>, shape: Vec<Dim>) -> Self {
        Self { name: name.into(), elem_type: ElemType::Int64, shape }
    }

    /// Copy of this value info under another tensor name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }
}

/// Device a node executes on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Accelerator,
}

/// Dense f32 tensor in serializable form
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    /// Capture an array in row-major order
    pub fn from_array(array: &ArrayD<f32>) -> Self {
        Self { dims: array.shape().to_vec(), data: array.iter().copied().collect() }
    }

    /// Rebuild the array
    pub fn to_array(&self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.dims), self.data.clone()).map_err(|e| {
            Error::Graph(format!("tensor data does not fit dims {:?}: {e}", self.dims))
        })
    }
}

/// Node attribute value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    Str(String),
    Tensor(TensorRecord),
}

/// A node in the computational graph
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    /// Operator domain; empty for the default domain
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttrValue>,
    /// Placement; `None` follows the sim-wide default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
}

impl Node {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.into(),
            domain: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: BTreeMap::new(),
            device: None,
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn on_device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attributes.get(key) {
            Some(AttrValue::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_float(&self, key: &str) -> Option<f32> {
        match self.attributes.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Non-empty input names (optional inputs are encoded as `""`)
    pub fn present_inputs(&self) -> impl Iterator<Item = (usize, &str)> {
        self.inputs.iter().enumerate().filter(|(_, n)| !n.is_empty()).map(|(i, n)| (i, n.as_str()))
    }
}

/// Computational graph with named tensors
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub name: String,
    /// Nodes in topological order
    pub nodes: Vec<Node>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    /// Constant parameters keyed by tensor name
    pub initializers: BTreeMap<String, ArrayD<f32>>,
    /// Shape/type annotations for intermediate tensors
    pub value_info: BTreeMap<String, ValueInfo>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn add_input(&mut self, info: ValueInfo) -> &mut Self {
        self.inputs.push(info);
        self
    }

    pub fn add_output(&mut self, info: ValueInfo) -> &mut Self {
        self.outputs.push(info);
        self
    }

    pub fn add_initializer(&mut self, name: impl Into<String>, value: ArrayD<f32>) -> &mut Self {
        self.initializers.insert(name.into(), value);
        self
    }

    pub fn add_value_info(&mut self, info: ValueInfo) -> &mut Self {
        self.value_info.insert(info.name.clone(), info);
        self
    }

    pub fn add_node(&mut self, node: Node) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn is_graph_input(&self, tensor: &str) -> bool {
        self.inputs.iter().any(|v| v.name == tensor)
    }

    pub fn is_graph_output(&self, tensor: &str) -> bool {
        self.outputs.iter().any(|v| v.name == tensor)
    }

    pub fn is_initializer(&self, tensor: &str) -> bool {
        self.initializers.contains_key(tensor)
    }

    /// Index of the node producing `tensor`
    pub fn producer_of(&self, tensor: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.outputs.iter().any(|o| o == tensor))
    }

    /// Indices of every node reading `tensor`
    pub fn consumers_of(&self, tensor: &str) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.inputs.iter().any(|i| i == tensor))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Type/shape annotation for any named tensor
    pub fn value_info_of(&self, tensor: &str) -> Option<&ValueInfo> {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .find(|v| v.name == tensor)
            .or_else(|| self.value_info.get(tensor))
    }

    /// Element type; unannotated tensors and initializers are float
    pub fn elem_type_of(&self, tensor: &str) -> ElemType {
        self.value_info_of(tensor).map(|v| v.elem_type).unwrap_or_default()
    }

    /// Total bytes held by initializers
    pub fn initializer_bytes(&self) -> usize {
        self.initializers.values().map(|a| a.len() * std::mem::size_of::<f32>()).sum()
    }

    /// Check topological order and name uniqueness
    ///
    /// Every node input must be a graph input, an initializer, or the output
    /// of an earlier node; no tensor may be produced twice; every graph
    /// output must be produced (or be a pass-through input).
    pub fn validate(&self) -> Result<()> {
        let mut defined: HashSet<&str> = self.inputs.iter().map(|v| v.name.as_str()).collect();
        defined.extend(self.initializers.keys().map(String::as_str));

        let mut produced: HashSet<&str> = HashSet::new();
        for node in &self.nodes {
            for (_, input) in node.present_inputs() {
                if !defined.contains(input) {
                    return Err(Error::Graph(format!(
                        "node '{}' reads '{}' before it is defined",
                        node.name, input
                    )));
                }
            }
            for output in &node.outputs {
                if !produced.insert(output.as_str()) || self.is_graph_input(output) {
                    return Err(Error::Graph(format!(
                        "tensor '{}' is produced more than once",
                        output
                    )));
                }
                defined.insert(output.as_str());
            }
        }

        for output in &self.outputs {
            if !defined.contains(output.name.as_str()) {
                return Err(Error::Graph(format!("graph output '{}' is never produced", output.name)));
            }
        }
        Ok(())
    }

    /// Names of every tensor referenced by the graph
    pub fn tensor_names(&self) -> HashSet<&str> {
        let mut names: HashSet<&str> = self.inputs.iter().map(|v| v.name.as_str()).collect();
        names.extend(self.outputs.iter().map(|v| v.name.as_str()));
        names.extend(self.initializers.keys().map(String::as_str));
        names.extend(self.value_info.keys().map(String::as_str));
        for node in &self.nodes {
            names.extend(node.inputs.iter().map(String::as_str));
            names.extend(node.outputs.iter().map(String::as_str));
        }
        names
    }
}
