//! Tests for graph structure, registry dispatch and session execution

use super::*;
use std::collections::HashMap;

use approx::assert_abs_diff_eq;
use ndarray::{Array, ArrayD, IxDyn};

fn linear_graph() -> Graph {
    let mut graph = Graph::new("linear");
    graph
        .add_input(ValueInfo::float("x", vec![Dim::Dynamic("batch".into()), Dim::Fixed(3)]))
        .add_output(ValueInfo::float("y", vec![Dim::Dynamic("batch".into()), Dim::Fixed(2)]))
        .add_initializer("w", Array::from_shape_vec(IxDyn(&[3, 2]), vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap())
        .add_initializer("b", Array::from_shape_vec(IxDyn(&[2]), vec![0.5, -0.5]).unwrap())
        .add_node(Node::new("mm", "MatMul").with_inputs(["x", "w"]).with_outputs(["h"]))
        .add_node(Node::new("add", "Add").with_inputs(["h", "b"]).with_outputs(["h2"]))
        .add_node(Node::new("relu", "Relu").with_inputs(["h2"]).with_outputs(["y"]));
    graph
}

fn feeds(batch: usize) -> HashMap<String, ArrayD<f32>> {
    HashMap::from([("x".to_string(), Array::ones(IxDyn(&[batch, 3])))])
}

// ========================================================================
// STRUCTURE
// ========================================================================

#[test]
fn test_validate_accepts_topological_graph() {
    assert!(linear_graph().validate().is_ok());
}

#[test]
fn test_validate_rejects_out_of_order_node() {
    let mut graph = linear_graph();
    graph.nodes.swap(0, 1);
    assert!(matches!(graph.validate(), Err(crate::Error::Graph(_))));
}

#[test]
fn test_validate_rejects_duplicate_output() {
    let mut graph = linear_graph();
    graph.add_node(Node::new("dup", "Identity").with_inputs(["x"]).with_outputs(["h"]));
    assert!(graph.validate().is_err());
}

#[test]
fn test_producer_and_consumers() {
    let graph = linear_graph();
    assert_eq!(graph.producer_of("h"), Some(0));
    assert_eq!(graph.producer_of("x"), None);
    assert_eq!(graph.consumers_of("h"), vec![1]);
    assert!(graph.is_graph_output("y"));
    assert!(graph.is_initializer("w"));
}

#[test]
fn test_elem_type_defaults_to_float() {
    let mut graph = linear_graph();
    graph.add_value_info(ValueInfo::int64("shape", vec![Dim::Fixed(2)]));
    assert_eq!(graph.elem_type_of("h"), ElemType::Float);
    assert_eq!(graph.elem_type_of("shape"), ElemType::Int64);
}

#[test]
fn test_dim_serde_untagged() {
    let dims: Vec<Dim> = serde_json::from_str(r#"["batch", 3]"#).unwrap();
    assert_eq!(dims, vec![Dim::Dynamic("batch".into()), Dim::Fixed(3)]);
}

// ========================================================================
// REGISTRY
// ========================================================================

#[test]
fn test_registry_param_roles() {
    let registry = OpRegistry::default();
    let conv = Node::new("c", "Conv");
    assert_eq!(registry.param_role(&conv, 1), ParamRole::Weight);
    assert_eq!(registry.param_role(&conv, 2), ParamRole::Bias);
    assert_eq!(registry.param_role(&Node::new("a", "Add"), 1), ParamRole::Bias);
    assert_eq!(registry.param_role(&Node::new("m", "Mul"), 1), ParamRole::Weight);
    assert_eq!(registry.param_role(&Node::new("u", "Unregistered"), 1), ParamRole::Weight);
}

#[test]
fn test_registry_channel_axes() {
    let registry = OpRegistry::default();
    assert_eq!(registry.channel_axis(&Node::new("c", "Conv"), 4), 0);
    assert_eq!(registry.channel_axis(&Node::new("t", "ConvTranspose"), 4), 1);
    assert_eq!(registry.channel_axis(&Node::new("g", "Gemm"), 2), 1);
    let gemm_t = Node::new("g", "Gemm").with_attr("transB", AttrValue::Int(1));
    assert_eq!(registry.channel_axis(&gemm_t, 2), 0);
    assert_eq!(registry.channel_axis(&Node::new("m", "MatMul"), 2), 1);
}

fn double(_: &Node, inputs: &[&ArrayD<f32>]) -> crate::Result<Vec<ArrayD<f32>>> {
    Ok(vec![inputs[0].mapv(|v| v * 2.0)])
}

#[test]
fn test_registry_custom_op() {
    let mut registry = OpRegistry::default();
    registry.register("Double", OpSpec::new(double));
    assert!(registry.contains("Double"));

    let mut graph = Graph::new("custom");
    graph
        .add_input(ValueInfo::float("x", vec![Dim::Fixed(2)]))
        .add_output(ValueInfo::float("y", vec![Dim::Fixed(2)]))
        .add_node(Node::new("d", "Double").with_inputs(["x"]).with_outputs(["y"]));

    let mut hook = Passthrough;
    let mut session = Session::new(&graph, &registry, &mut hook);
    let x = HashMap::from([("x".to_string(), Array::from_shape_vec(IxDyn(&[2]), vec![1.0, -3.0]).unwrap())]);
    let out = session.run(&x).unwrap();
    assert_eq!(out[0].as_slice().unwrap(), &[2.0, -6.0]);
}

// ========================================================================
// SESSION
// ========================================================================

#[test]
fn test_session_runs_linear_graph() {
    let graph = linear_graph();
    let registry = OpRegistry::default();
    let mut hook = Passthrough;
    let out = Session::new(&graph, &registry, &mut hook).run(&feeds(1)).unwrap();
    assert_eq!(out[0].shape(), &[1, 2]);
    assert_abs_diff_eq!(out[0][[0, 0]], 2.5);
    assert_abs_diff_eq!(out[0][[0, 1]], 1.5);
}

#[test]
fn test_session_accepts_any_dynamic_batch() {
    let graph = linear_graph();
    let registry = OpRegistry::default();
    let mut hook = Passthrough;
    let mut session = Session::new(&graph, &registry, &mut hook);
    for batch in [1, 4, 7] {
        assert_eq!(session.run(&feeds(batch)).unwrap()[0].shape(), &[batch, 2]);
    }
}

#[test]
fn test_session_rejects_fixed_dim_mismatch() {
    let graph = linear_graph();
    let registry = OpRegistry::default();
    let mut hook = Passthrough;
    let bad = HashMap::from([("x".to_string(), Array::ones(IxDyn(&[2, 4])))]);
    let result = Session::new(&graph, &registry, &mut hook).run(&bad);
    assert!(matches!(result, Err(crate::Error::ShapeMismatch { .. })));
}

#[test]
fn test_session_unknown_op() {
    let mut graph = Graph::new("bad");
    graph
        .add_input(ValueInfo::float("x", vec![]))
        .add_output(ValueInfo::float("y", vec![]))
        .add_node(Node::new("n", "Softmax").with_inputs(["x"]).with_outputs(["y"]));
    let registry = OpRegistry::default();
    let mut hook = Passthrough;
    let x = HashMap::from([("x".to_string(), Array::ones(IxDyn(&[3])))]);
    let result = Session::new(&graph, &registry, &mut hook).run(&x);
    assert!(matches!(result, Err(crate::Error::UnknownOp(op)) if op == "Softmax"));
}

#[test]
fn test_session_missing_feed() {
    let graph = linear_graph();
    let registry = OpRegistry::default();
    let mut hook = Passthrough;
    let result = Session::new(&graph, &registry, &mut hook).run(&HashMap::new());
    assert!(result.is_err());
}
