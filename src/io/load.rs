//! Graph loading

use std::fs;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::Dtype;
use safetensors::SafeTensors;

use super::model::GraphDocument;
use crate::error::{Error, Result};
use crate::graph::Graph;

/// Load a graph saved by [`super::save_graph`]
///
/// Inline initializers and an external safetensors blob are both accepted;
/// the blob is resolved relative to the document's directory.
pub fn load_graph(path: impl AsRef<Path>) -> Result<Graph> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let doc: GraphDocument = serde_json::from_str(&content)
        .map_err(|e| Error::Serialization(format!("JSON deserialization failed: {e}")))?;

    let external = doc.external_data.clone();
    let mut graph = doc.into_graph()?;

    if let Some(external) = external {
        let data_path = path.parent().unwrap_or_else(|| Path::new(".")).join(&external.location);
        let data = fs::read(&data_path)?;
        let tensors = SafeTensors::deserialize(&data)
            .map_err(|e| Error::Serialization(format!("SafeTensors parsing failed: {e}")))?;

        for name in &external.tensors {
            let view = tensors
                .tensor(name)
                .map_err(|e| Error::Serialization(format!("external tensor '{name}': {e}")))?;
            if view.dtype() != Dtype::F32 {
                return Err(Error::Serialization(format!("external tensor '{name}' is {:?}, expected F32", view.dtype())));
            }
            let values: Vec<f32> = view
                .data()
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), values)
                .map_err(|e| Error::Serialization(format!("external tensor '{name}': {e}")))?;
            graph.initializers.insert(name.clone(), array);
        }
    }

    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Dim, Node, ValueInfo};
    use crate::io::{save_graph, SaveConfig};
    use ndarray::Array;
    use tempfile::{tempdir, NamedTempFile};

    fn conv_graph() -> Graph {
        let mut graph = Graph::new("conv");
        graph
            .add_input(ValueInfo::float("x", vec![Dim::Dynamic("batch".into()), Dim::Fixed(1), Dim::Fixed(3), Dim::Fixed(3)]))
            .add_output(ValueInfo::float("y", vec![]))
            .add_initializer("w", Array::from_shape_fn(IxDyn(&[2, 1, 2, 2]), |d| d[0] as f32 - d[3] as f32 * 0.5))
            .add_initializer("b", Array::from_shape_vec(IxDyn(&[2]), vec![0.1, -0.2]).unwrap())
            .add_node(Node::new("conv", "Conv").with_inputs(["x", "w", "b"]).with_outputs(["y"]));
        graph
    }

    #[test]
    fn test_load_inline() {
        let graph = conv_graph();
        let temp_file = NamedTempFile::new().expect("temp file creation should succeed");
        save_graph(&graph, temp_file.path(), &SaveConfig::default()).unwrap();

        let loaded = load_graph(temp_file.path()).unwrap();
        assert_eq!(loaded.name, "conv");
        assert_eq!(loaded.nodes, graph.nodes);
        assert_eq!(loaded.inputs, graph.inputs);
        assert_eq!(loaded.initializers, graph.initializers);
    }

    #[test]
    fn test_load_external() {
        let graph = conv_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("conv.graph.json");
        save_graph(&graph, &path, &SaveConfig::new().with_max_inline_bytes(0)).unwrap();

        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded.initializers, graph.initializers);
    }

    #[test]
    fn test_load_missing_external_blob() {
        let graph = conv_graph();
        let dir = tempdir().unwrap();
        let path = dir.path().join("conv.graph.json");
        save_graph(&graph, &path, &SaveConfig::new().with_max_inline_bytes(0)).unwrap();
        std::fs::remove_file(dir.path().join("conv.graph.safetensors")).unwrap();

        assert!(matches!(load_graph(&path), Err(Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "{ nodes: ").unwrap();
        assert!(matches!(load_graph(temp_file.path()), Err(Error::Serialization(_))));
    }
}
