//! Quantization policy and simulation options
//!
//! A JSON policy file decides which tensors are quantized and how; the
//! [`ConfigResolver`] turns it into a [`ResolvedPolicy`] for one graph.

mod options;
mod resolver;
mod schema;


pub use options::QuantSimOptions;
pub use resolver::{ConfigResolver, ResolvedPolicy, TensorPolicy};
pub use schema::{
    DefaultsConfig, ModelInputRule, ModelOutputRule, OpRule, OpTypeRule, ParamRule, QuantsimConfig,
    SupergroupRule,
};
pub(crate) use schema::{deserialize_opt_bool_lenient, serialize_opt_bool_string};
