//! Post-training quantization simulation
//!
//! Instruments a computational graph with simulated quantize-dequantize
//! operators, calibrates their encodings on sample data, and persists the
//! result as an encodings file next to the original graph.
//!
//! - `graph`: host graph, op registry and execution session
//! - `quant`: encodings, calibration and per-tensor quantizers
//! - `config`: policy file and its resolution against a graph
//! - `sim`: the simulation model, calibration driver and encodings codec
//! - `io`: graph persistence with external tensor data
//!
//! ```no_run
//! use std::collections::HashMap;
//! use quantsim::{Graph, QuantSimModel, QuantSimOptions};
//! # fn build() -> Graph { Graph::new("model") }
//! # fn batches() -> Vec<HashMap<String, ndarray::ArrayD<f32>>> { Vec::new() }
//!
//! let mut sim = QuantSimModel::new(build(), QuantSimOptions::default())?;
//! sim.compute_encodings(
//!     |session, data: &Vec<HashMap<String, ndarray::ArrayD<f32>>>| {
//!         for feeds in data {
//!             session.run(feeds)?;
//!         }
//!         Ok(())
//!     },
//!     &batches(),
//! )?;
//! sim.export("out", "model")?;
//! # Ok::<(), quantsim::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod io;
pub mod quant;
pub mod sim;

pub use config::{QuantSimOptions, QuantsimConfig};
pub use error::{Error, Result};
pub use graph::{Dim, Graph, Node, OpRegistry, Session, ValueInfo};
pub use quant::{Encoding, QuantDataType, QuantScheme, TensorQuantizer};
pub use sim::{EncodingMismatch, EncodingsFile, MismatchKind, QuantSimModel};
