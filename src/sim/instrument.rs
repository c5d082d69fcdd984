//! Graph instrumentation
//!
//! Inserts one `QcQuantizeOp` per candidate tensor. Every consumer of a
//! tensor shares the single inserted node. Graph outputs keep their names:
//! the producer is renamed to write `<t>_updated` and the inserted node
//! writes `<t>`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::Result;
use crate::graph::{AttrValue, Device, Graph, Node, QC_QUANTIZE_OP};
use crate::quant::Backend;

/// Suffix of the tensor written by an inserted node
const UPDATED_SUFFIX: &str = "_updated";

/// Return `base`, or `base_<n>` for the first `n` not already taken
fn unique_name(base: String, taken: &mut HashSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 1;
    while taken.contains(&name) {
        name = format!("{base}_{n}");
        n += 1;
    }
    taken.insert(name.clone());
    name
}

/// Quantize node reading `input` and writing `output`
fn quantize_node(name: String, tensor: &str, input: String, output: String, backend: Backend) -> Node {
    Node::new(name, QC_QUANTIZE_OP)
        .with_domain(backend.domain())
        .with_inputs([input])
        .with_outputs([output])
        .with_attr("quantizer", AttrValue::Str(tensor.to_string()))
}

/// Rewrite `graph` with a quantize node on every tensor in `tensors`
///
/// Nodes quantizing graph inputs and initializers go first; every other
/// inserted node directly follows its producer, so the result stays in
/// topological order.
pub(crate) fn instrument<'a>(
    graph: &Graph,
    tensors: impl IntoIterator<Item = &'a str>,
    default_device: Device,
) -> Result<Graph> {
    let mut out = graph.clone();
    let mut tensor_names: HashSet<String> = graph.tensor_names().into_iter().map(str::to_string).collect();
    let mut node_names: HashSet<String> = graph.nodes.iter().map(|n| n.name.clone()).collect();

    let mut leading = Vec::new();
    let mut trailing: HashMap<usize, Vec<Node>> = HashMap::new();

    for tensor in tensors {
        let producer = graph.producer_of(tensor);
        let device = producer
            .and_then(|idx| graph.nodes[idx].device)
            .or_else(|| graph.consumers_of(tensor).first().and_then(|&idx| graph.nodes[idx].device))
            .unwrap_or(default_device);
        let backend = Backend::for_device(device);

        let updated = unique_name(format!("{tensor}{UPDATED_SUFFIX}"), &mut tensor_names);
        let node_name = unique_name(format!("{QC_QUANTIZE_OP}_{tensor}"), &mut node_names);

        let node = match producer {
            Some(idx) if graph.is_graph_output(tensor) => {
                for output in out.nodes[idx].outputs.iter_mut().filter(|o| o.as_str() == tensor) {
                    *output = updated.clone();
                }
                quantize_node(node_name, tensor, updated.clone(), tensor.to_string(), backend)
            }
            _ => {
                for consumer in graph.consumers_of(tensor) {
                    for input in out.nodes[consumer].inputs.iter_mut().filter(|i| i.as_str() == tensor) {
                        *input = updated.clone();
                    }
                }
                quantize_node(node_name, tensor, tensor.to_string(), updated.clone(), backend)
            }
        };

        if let Some(info) = graph.value_info_of(tensor) {
            out.add_value_info(info.renamed(updated.as_str()));
        }

        debug!(tensor, node = %node.name, domain = %node.domain, "quantize node inserted");
        match producer {
            Some(idx) => trailing.entry(idx).or_default().push(node),
            None => leading.push(node),
        }
    }

    let originals = std::mem::take(&mut out.nodes);
    let mut nodes = leading;
    for (idx, node) in originals.into_iter().enumerate() {
        nodes.push(node);
        if let Some(inserted) = trailing.remove(&idx) {
            nodes.extend(inserted);
        }
    }
    out.nodes = nodes;
    out.validate()?;
    Ok(out)
}
