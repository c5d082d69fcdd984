//! JSON schema of the quantization policy file
//!
//! ```json
//! {
//!   "defaults": {
//!     "ops": { "is_output_quantized": "True" },
//!     "params": { "is_quantized": "True", "is_symmetric": "True" },
//!     "strict_symmetric": "False",
//!     "unsigned_symmetric": "True",
//!     "per_channel_quantization": "False"
//!   },
//!   "params": { "bias": { "is_quantized": "False" } },
//!   "op_type": { "Gemm": { "per_channel_quantization": "True" } },
//!   "supergroups": [ { "op_list": ["Conv", "Relu"] } ],
//!   "model_input": { "is_input_quantized": "True" },
//!   "model_output": {}
//! }
//! ```
//!
//! Booleans may be JSON booleans or the strings `"True"` / `"False"`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::graph::{OpRegistry, ParamRole};

/// Deserialize an optional bool from a JSON boolean or a `"True"`/`"False"` string
pub(crate) fn deserialize_opt_bool_lenient<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    match Option::<BoolOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(BoolOrString::Bool(b)) => Ok(Some(b)),
        Some(BoolOrString::Str(s)) => match s.to_lowercase().as_str() {
            "true" => Ok(Some(true)),
            "false" => Ok(Some(false)),
            other => Err(serde::de::Error::custom(format!("expected 'True' or 'False', got '{other}'"))),
        },
    }
}

/// Serialize an optional bool as `"True"` / `"False"`
pub(crate) fn serialize_opt_bool_string<S>(value: &Option<bool>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(true) => serializer.serialize_str("True"),
        Some(false) => serializer.serialize_str("False"),
        None => serializer.serialize_none(),
    }
}

/// Rule for op outputs (and inputs) under `defaults.ops` and `op_type.<T>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_input_quantized: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_output_quantized: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_symmetric: Option<bool>,
}

/// Rule for parameters under `defaults.params`, `params.<role>` and
/// `op_type.<T>.params.<role>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_quantized: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_symmetric: Option<bool>,
}

/// `defaults` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub ops: OpRule,

    #[serde(default)]
    pub params: ParamRule,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub strict_symmetric: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub unsigned_symmetric: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub per_channel_quantization: Option<bool>,
}

/// `op_type.<T>` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpTypeRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_input_quantized: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_output_quantized: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_symmetric: Option<bool>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub per_channel_quantization: Option<bool>,

    /// Parameter overrides keyed by role name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamRule>,
}

/// One fusable op sequence whose interior edges are never quantized
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupergroupRule {
    pub op_list: Vec<String>,
}

/// `model_input` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelInputRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_input_quantized: Option<bool>,
}

/// `model_output` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelOutputRule {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_output_quantized: Option<bool>,
}

/// Declarative quantization policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantsimConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Parameter rules keyed by role name
    #[serde(default)]
    pub params: BTreeMap<String, ParamRule>,

    /// Rules keyed by op type
    #[serde(default)]
    pub op_type: BTreeMap<String, OpTypeRule>,

    #[serde(default)]
    pub supergroups: Vec<SupergroupRule>,

    #[serde(default)]
    pub model_input: ModelInputRule,

    #[serde(default)]
    pub model_output: ModelOutputRule,

    /// Top-level form of `defaults.strict_symmetric`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub strict_symmetric: Option<bool>,

    /// Top-level form of `defaults.per_channel_quantization`
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub per_channel_quantization: Option<bool>,
}

impl QuantsimConfig {
    /// Policy with no rules at all; every tensor fails open to unquantized
    pub fn empty() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            params: BTreeMap::new(),
            op_type: BTreeMap::new(),
            supergroups: Vec::new(),
            model_input: ModelInputRule::default(),
            model_output: ModelOutputRule::default(),
            strict_symmetric: None,
            per_channel_quantization: None,
        }
    }

    /// Parse a policy from JSON text
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ConfigError(format!("invalid policy file: {e}")))
    }

    /// Read a policy file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| Error::ConfigError(format!("{}: {e}", path.display())))
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))
    }

    /// Effective strict-symmetric flag
    pub fn strict_symmetric(&self) -> bool {
        self.strict_symmetric.or(self.defaults.strict_symmetric).unwrap_or(false)
    }

    /// Effective unsigned-symmetric flag
    pub fn unsigned_symmetric(&self) -> bool {
        self.defaults.unsigned_symmetric.unwrap_or(true)
    }

    /// Effective global per-channel flag
    pub fn per_channel_quantization(&self) -> bool {
        self.per_channel_quantization.or(self.defaults.per_channel_quantization).unwrap_or(false)
    }

    /// Check rule names against the registry and parameter roles
    pub fn validate(&self, registry: &OpRegistry) -> Result<()> {
        for role in self.params.keys() {
            check_role(role, "params")?;
        }
        for (op_type, rule) in &self.op_type {
            if !registry.contains(op_type) {
                return Err(Error::ConfigError(format!(
                    "op_type rule names unknown op type '{op_type}'"
                )));
            }
            for role in rule.params.keys() {
                check_role(role, &format!("op_type.{op_type}.params"))?;
            }
        }
        for group in &self.supergroups {
            if group.op_list.len() < 2 {
                return Err(Error::ConfigError(format!(
                    "supergroup {:?} must list at least two op types",
                    group.op_list
                )));
            }
            if let Some(unknown) = group.op_list.iter().find(|op| !registry.contains(op)) {
                return Err(Error::ConfigError(format!(
                    "supergroup {:?} names unknown op type '{unknown}'",
                    group.op_list
                )));
            }
        }
        Ok(())
    }
}

fn check_role(role: &str, section: &str) -> Result<()> {
    ParamRole::from_name(role).map(|_| ()).ok_or_else(|| {
        Error::ConfigError(format!("{section} names unknown parameter role '{role}' (expected weight or bias)"))
    })
}

impl Default for QuantsimConfig {
    /// Built-in policy: asymmetric activations, symmetric weights, float biases
    fn default() -> Self {
        let mut config = Self::empty();
        config.defaults = DefaultsConfig {
            ops: OpRule { is_input_quantized: None, is_output_quantized: Some(true), is_symmetric: Some(false) },
            params: ParamRule { is_quantized: Some(true), is_symmetric: Some(true) },
            strict_symmetric: Some(false),
            unsigned_symmetric: Some(true),
            per_channel_quantization: Some(false),
        };
        config.params.insert(
            ParamRole::Bias.name().to_string(),
            ParamRule { is_quantized: Some(false), is_symmetric: None },
        );
        config.model_input.is_input_quantized = Some(true);
        config
    }
}
