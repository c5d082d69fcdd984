//! Serializable graph document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Graph, Node, TensorRecord, ValueInfo};

/// Reference to initializers stored outside the JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalData {
    /// File name of the safetensors blob, relative to the document
    pub location: String,

    /// Initializers held in the blob
    pub tensors: Vec<String>,
}

/// On-disk form of a [`Graph`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_info: BTreeMap<String, ValueInfo>,

    pub nodes: Vec<Node>,

    /// Inline initializers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub initializers: BTreeMap<String, TensorRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_data: Option<ExternalData>,
}

impl GraphDocument {
    /// Capture the structure of `graph` without its initializers
    pub fn structure(graph: &Graph) -> Self {
        Self {
            name: graph.name.clone(),
            inputs: graph.inputs.clone(),
            outputs: graph.outputs.clone(),
            value_info: graph.value_info.clone(),
            nodes: graph.nodes.clone(),
            initializers: BTreeMap::new(),
            external_data: None,
        }
    }

    /// Capture `graph` with every initializer inline
    pub fn inline(graph: &Graph) -> Self {
        let mut doc = Self::structure(graph);
        doc.initializers =
            graph.initializers.iter().map(|(name, value)| (name.clone(), TensorRecord::from_array(value))).collect();
        doc
    }

    /// Rebuild a graph from the inline part of the document
    ///
    /// External initializers are attached by the loader.
    pub fn into_graph(self) -> Result<Graph> {
        let mut graph = Graph::new(self.name);
        graph.inputs = self.inputs;
        graph.outputs = self.outputs;
        graph.value_info = self.value_info;
        graph.nodes = self.nodes;
        for (name, record) in self.initializers {
            let value = record.to_array()?;
            graph.initializers.insert(name, value);
        }
        Ok(graph)
    }
}
