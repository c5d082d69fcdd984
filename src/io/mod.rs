//! Graph persistence
//!
//! Graphs are stored as a JSON document. Initializer payloads that would not
//! fit a single serialized model are moved to a safetensors file referenced
//! from the document.

mod load;
mod model;
mod save;

pub use load::load_graph;
pub use model::{ExternalData, GraphDocument};
pub use save::{save_graph, SaveConfig, DEFAULT_MAX_INLINE_BYTES};
