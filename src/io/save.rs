//! Graph saving

use std::fs;
use std::path::Path;

use safetensors::tensor::{Dtype, TensorView};
use tracing::info;

use super::model::{ExternalData, GraphDocument};
use crate::error::{Error, Result};
use crate::graph::Graph;

/// Largest initializer payload kept inline (2 GiB - 1)
pub const DEFAULT_MAX_INLINE_BYTES: usize = (1 << 31) - 1;

/// Options for [`save_graph`]
#[derive(Debug, Clone, PartialEq)]
pub struct SaveConfig {
    /// Pretty-print the JSON document
    pub pretty: bool,

    /// Initializers larger than this in total go to a safetensors file
    pub max_inline_bytes: usize,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self { pretty: true, max_inline_bytes: DEFAULT_MAX_INLINE_BYTES }
    }
}

impl SaveConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn with_max_inline_bytes(mut self, bytes: usize) -> Self {
        self.max_inline_bytes = bytes;
        self
    }
}

/// Save a graph as a JSON document
///
/// When the initializers exceed [`SaveConfig::max_inline_bytes`] they are
/// written next to `path` with the extension replaced by `safetensors`, and
/// the document references that file.
///
/// # Example
///
/// ```no_run
/// use quantsim::graph::Graph;
/// use quantsim::io::{save_graph, SaveConfig};
///
/// let graph = Graph::new("model");
/// save_graph(&graph, "model.graph.json", &SaveConfig::default()).unwrap();
/// ```
pub fn save_graph(graph: &Graph, path: impl AsRef<Path>, config: &SaveConfig) -> Result<()> {
    let path = path.as_ref();
    let bytes = graph.initializer_bytes();

    let doc = if bytes <= config.max_inline_bytes {
        GraphDocument::inline(graph)
    } else {
        let data_path = path.with_extension("safetensors");
        write_safetensors(graph, &data_path)?;
        let location = data_path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Serialization(format!("invalid data path {}", data_path.display())))?
            .to_string();
        info!(path = %data_path.display(), bytes, "initializers written as external data");

        let mut doc = GraphDocument::structure(graph);
        doc.external_data = Some(ExternalData { location, tensors: graph.initializers.keys().cloned().collect() });
        doc
    };

    let json = if config.pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    }
    .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;

    fs::write(path, json)?;
    Ok(())
}

fn write_safetensors(graph: &Graph, path: &Path) -> Result<()> {
    let tensor_data: Vec<(&str, Vec<u8>, Vec<usize>)> = graph
        .initializers
        .iter()
        .map(|(name, value)| {
            let data: Vec<f32> = value.iter().copied().collect();
            (name.as_str(), bytemuck::cast_slice(&data).to_vec(), value.shape().to_vec())
        })
        .collect();

    let views = tensor_data
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (*name, view))
                .map_err(|e| Error::Serialization(format!("tensor '{name}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let bytes = safetensors::serialize(views, None)
        .map_err(|e| Error::Serialization(format!("SafeTensors serialization failed: {e}")))?;
    fs::write(path, bytes)?;
    Ok(())
}
