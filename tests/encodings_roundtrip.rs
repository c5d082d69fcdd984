//! Integration tests for exporting and reloading encodings and graphs

use std::collections::HashMap;

use ndarray::{Array, ArrayD, IxDyn};
use quantsim::graph::{Dim, Graph, Node, Session, ValueInfo};
use quantsim::io::{load_graph, SaveConfig};
use quantsim::{EncodingsFile, Error, MismatchKind, QuantSimModel, QuantSimOptions, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

type Feeds = HashMap<String, ArrayD<f32>>;

/// x -> Gemm(w, b) -> h -> Relu -> y
fn mlp_graph() -> Graph {
    let mut rng = StdRng::seed_from_u64(3);
    let w = Array::from_shape_fn(IxDyn(&[6, 4]), |_| rng.random::<f32>() - 0.5);
    let b = Array::from_shape_fn(IxDyn(&[6]), |_| rng.random::<f32>() * 0.1);

    let mut graph = Graph::new("mlp");
    graph
        .add_input(ValueInfo::float("x", vec![Dim::Dynamic("batch".into()), Dim::Fixed(4)]))
        .add_output(ValueInfo::float("y", vec![Dim::Dynamic("batch".into()), Dim::Fixed(6)]))
        .add_initializer("fc.w", w)
        .add_initializer("fc.b", b)
        .add_node(
            Node::new("fc", "Gemm")
                .with_inputs(["x", "fc.w", "fc.b"])
                .with_outputs(["h"])
                .with_attr("transB", quantsim::graph::AttrValue::Int(1)),
        )
        .add_node(Node::new("relu", "Relu").with_inputs(["h"]).with_outputs(["y"]));
    graph
}

fn batches() -> Vec<Feeds> {
    let mut rng = StdRng::seed_from_u64(17);
    (0..3)
        .map(|_| {
            let x = Array::from_shape_fn(IxDyn(&[5, 4]), |_| rng.random::<f32>() * 2.0 - 1.0);
            HashMap::from([("x".to_string(), x)])
        })
        .collect()
}

fn run_all(session: &mut Session<'_>, data: &[Feeds]) -> Result<()> {
    for feeds in data {
        session.run(feeds)?;
    }
    Ok(())
}

fn calibrated() -> QuantSimModel {
    let mut sim = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    sim.compute_encodings(run_all, batches().as_slice()).unwrap();
    sim
}

// ============================================================================
// Load
// ============================================================================

#[test]
fn test_loaded_sim_reproduces_outputs() {
    let mut source = calibrated();
    let dir = tempdir().unwrap();
    source.export(dir.path(), "mlp").unwrap();

    let mut target = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    let mismatches = target.load_encodings(dir.path().join("mlp.encodings"), true).unwrap();
    assert!(mismatches.is_empty());

    let probe = &batches()[0];
    assert_eq!(source.run(probe).unwrap(), target.run(probe).unwrap());
}

#[test]
fn test_renamed_tensor_strict_and_lenient() {
    let source = calibrated();
    let mut file = source.encodings_file();
    let h = file.activation_encodings.remove("h").unwrap();
    file.activation_encodings.insert("h_renamed".to_string(), h);

    let dir = tempdir().unwrap();
    let path = dir.path().join("renamed.encodings");
    file.save(&path).unwrap();

    let mut strict = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    assert!(matches!(strict.load_encodings(&path, true), Err(Error::EncodingMismatch { .. })));
    assert!(strict.quantizers().all(|(_, q)| q.encodings().is_none()));

    let mut lenient = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    let mismatches = lenient.load_encodings(&path, false).unwrap();
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].name, "h_renamed");
    assert_eq!(mismatches[0].kind, MismatchKind::MissingQuantizer);

    // every other entry is installed exactly as exported
    for name in ["x", "y", "fc.w"] {
        assert_eq!(
            lenient.quantizer(name).unwrap().encodings(),
            source.quantizer(name).unwrap().encodings(),
            "{name}"
        );
    }
    assert!(!lenient.quantizer("h").unwrap().enabled());
}

#[test]
fn test_load_accepts_boolean_literals() {
    let source = calibrated();
    let json = source.encodings_file().to_json_string().unwrap();
    let relaxed = json.replace("\"True\"", "true").replace("\"False\"", "false");

    let dir = tempdir().unwrap();
    let path = dir.path().join("relaxed.encodings");
    std::fs::write(&path, relaxed).unwrap();

    let mut target = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    assert!(target.load_encodings(&path, true).unwrap().is_empty());
    assert!(target.quantizer("fc.w").unwrap().encodings().unwrap()[0].is_symmetric);
}

#[test]
fn test_load_missing_file_is_io_error() {
    let mut sim = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    assert!(matches!(sim.load_encodings("/nonexistent/none.encodings", false), Err(Error::Io(_))));
}

#[test]
fn test_loaded_encodings_survive_reexport() {
    let source = calibrated();
    let dir = tempdir().unwrap();
    source.save_encodings(dir.path().join("a.encodings")).unwrap();

    let mut target = QuantSimModel::new(mlp_graph(), QuantSimOptions::default()).unwrap();
    target.load_encodings(dir.path().join("a.encodings"), true).unwrap();
    target.save_encodings(dir.path().join("b.encodings")).unwrap();

    let a = EncodingsFile::from_file(dir.path().join("a.encodings")).unwrap();
    let b = EncodingsFile::from_file(dir.path().join("b.encodings")).unwrap();
    assert_eq!(a, b);
}

// ============================================================================
// Graph export
// ============================================================================

#[test]
fn test_export_writes_original_graph() {
    let sim = calibrated();
    let dir = tempdir().unwrap();
    sim.export(dir.path(), "mlp").unwrap();

    let graph = load_graph(dir.path().join("mlp.graph.json")).unwrap();
    assert_eq!(graph.nodes, mlp_graph().nodes);
    assert!(graph.nodes.iter().all(|n| n.op_type != "QcQuantizeOp"));
    assert!(!dir.path().join("mlp.graph.safetensors").exists());
}

#[test]
fn test_export_with_external_data() {
    let sim = calibrated();
    let dir = tempdir().unwrap();
    sim.export_with(dir.path(), "big", &SaveConfig::new().with_max_inline_bytes(16)).unwrap();

    assert!(dir.path().join("big.encodings").exists());
    assert!(dir.path().join("big.graph.safetensors").exists());
    let json = std::fs::read_to_string(dir.path().join("big.graph.json")).unwrap();
    assert!(json.contains("external_data"));

    let graph = load_graph(dir.path().join("big.graph.json")).unwrap();
    assert_eq!(graph.initializers, sim.original_graph().initializers);
}

#[test]
fn test_export_creates_directory() {
    let sim = calibrated();
    let dir = tempdir().unwrap();
    let nested = dir.path().join("a").join("b");
    sim.export(&nested, "m").unwrap();
    assert!(nested.join("m.encodings").exists());
}
