//! Encodings file export and import
//!
//! ```json
//! {
//!   "activation_encodings": {
//!     "conv_out": [
//!       {"bitwidth": 8, "dtype": "int", "is_symmetric": "False",
//!        "max": 2.5, "min": -0.5, "offset": -26, "scale": 0.011764706}
//!     ]
//!   },
//!   "param_encodings": { "conv.w": [ ... one entry per channel ... ] },
//!   "quantizer_args": {
//!     "activation_bitwidth": 8, "dtype": "int", "is_symmetric": "True",
//!     "param_bitwidth": 8, "per_channel_quantization": false,
//!     "quant_scheme": "post_training_tf_enhanced"
//!   }
//! }
//! ```
//!
//! Symmetric entries on the strict grid also carry `"is_strict": "True"`.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::QuantSimModel;
use crate::config::{deserialize_opt_bool_lenient, serialize_opt_bool_string};
use crate::error::{Error, Result};
use crate::io::{save_graph, SaveConfig};
use crate::quant::{Encoding, QuantDataType, QuantScheme};

/// One encoding as stored on disk
///
/// Float encodings carry only `bitwidth` and `dtype`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodingRecord {
    pub bitwidth: u8,
    pub dtype: QuantDataType,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_symmetric: Option<bool>,
    /// Strict symmetric grid; written only when set
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_strict: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

impl From<&Encoding> for EncodingRecord {
    fn from(enc: &Encoding) -> Self {
        match enc.dtype {
            QuantDataType::Float => Self {
                bitwidth: enc.bitwidth,
                dtype: enc.dtype,
                is_symmetric: None,
                is_strict: None,
                max: None,
                min: None,
                offset: None,
                scale: None,
            },
            QuantDataType::Int => Self {
                bitwidth: enc.bitwidth,
                dtype: enc.dtype,
                is_symmetric: Some(enc.is_symmetric),
                is_strict: None,
                max: Some(enc.max),
                min: Some(enc.min),
                offset: Some(enc.offset),
                scale: Some(enc.scale),
            },
        }
    }
}

impl EncodingRecord {
    /// Mark a symmetric integer record as using the strict grid
    pub fn with_strict_symmetric(mut self, strict: bool) -> Self {
        let symmetric_int = self.dtype == QuantDataType::Int && self.is_symmetric == Some(true);
        self.is_strict = (strict && symmetric_int).then_some(true);
        self
    }

    /// Rebuild the in-memory encoding
    pub fn to_encoding(&self) -> Result<Encoding> {
        match self.dtype {
            QuantDataType::Float if self.bitwidth == 16 => Ok(Encoding::float(self.bitwidth)),
            QuantDataType::Float => {
                Err(Error::Serialization(format!("unsupported float bitwidth {}", self.bitwidth)))
            }
            QuantDataType::Int => {
                let (Some(min), Some(max), Some(offset), Some(scale)) = (self.min, self.max, self.offset, self.scale)
                else {
                    return Err(Error::Serialization(
                        "int encoding requires min, max, offset and scale".to_string(),
                    ));
                };
                let encoding = Encoding {
                    bitwidth: self.bitwidth,
                    dtype: self.dtype,
                    is_symmetric: self.is_symmetric.unwrap_or(false),
                    min,
                    max,
                    offset,
                    scale,
                };
                if !(1..=32).contains(&self.bitwidth) {
                    return Err(Error::Serialization(format!(
                        "integer bitwidth must be between 1 and 32, got {}",
                        self.bitwidth
                    )));
                }
                if !encoding.is_valid() {
                    return Err(Error::Serialization(format!(
                        "invalid encoding: bitwidth {}, scale {}",
                        self.bitwidth, scale
                    )));
                }
                Ok(encoding)
            }
        }
    }
}

/// Sim-wide settings recorded for downstream tooling
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizerArgs {
    pub activation_bitwidth: u8,
    pub dtype: QuantDataType,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_opt_bool_string",
        deserialize_with = "deserialize_opt_bool_lenient"
    )]
    pub is_symmetric: Option<bool>,
    pub param_bitwidth: u8,
    pub per_channel_quantization: bool,
    pub quant_scheme: QuantScheme,
}

/// Contents of a `.encodings` file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingsFile {
    #[serde(default)]
    pub activation_encodings: BTreeMap<String, Vec<EncodingRecord>>,
    #[serde(default)]
    pub param_encodings: BTreeMap<String, Vec<EncodingRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantizer_args: Option<QuantizerArgs>,
}

impl EncodingsFile {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("encodings JSON deserialization failed: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("encodings JSON serialization failed: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }

    /// Number of tensors with encodings
    pub fn len(&self) -> usize {
        self.activation_encodings.len() + self.param_encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> impl Iterator<Item = (&String, &Vec<EncodingRecord>)> {
        self.activation_encodings.iter().chain(self.param_encodings.iter())
    }
}

/// Why a file entry did not match the live sim
#[derive(Clone, Debug, PartialEq)]
pub enum MismatchKind {
    /// The file names a tensor the sim has no quantizer for; entry skipped
    MissingQuantizer,
    /// An enabled quantizer has no entry in the file
    MissingEncoding,
    /// Per-channel count differs; entry skipped
    ChannelCount { expected: usize, found: usize },
    Bitwidth { expected: u8, found: u8 },
    DataType { expected: QuantDataType, found: QuantDataType },
    Symmetry { expected: bool, found: bool },
    /// The live quantizer was disabled
    Disabled,
}

/// A file entry that does not match the live sim
#[derive(Clone, Debug, PartialEq)]
pub struct EncodingMismatch {
    pub name: String,
    pub kind: MismatchKind,
}

impl EncodingMismatch {
    fn new(name: impl Into<String>, kind: MismatchKind) -> Self {
        Self { name: name.into(), kind }
    }

    /// Entries of this kind are not installed
    pub fn is_skipped(&self) -> bool {
        matches!(self.kind, MismatchKind::MissingQuantizer | MismatchKind::ChannelCount { .. })
    }
}

impl fmt::Display for EncodingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MismatchKind::MissingQuantizer => write!(f, "'{}': no such quantizer", self.name),
            MismatchKind::MissingEncoding => write!(f, "'{}': no encoding in file", self.name),
            MismatchKind::ChannelCount { expected, found } => {
                write!(f, "'{}': expected {expected} channel encodings, found {found}", self.name)
            }
            MismatchKind::Bitwidth { expected, found } => {
                write!(f, "'{}': bitwidth {found} in file, {expected} live", self.name)
            }
            MismatchKind::DataType { expected, found } => {
                write!(f, "'{}': dtype {found} in file, {expected} live", self.name)
            }
            MismatchKind::Symmetry { expected, found } => {
                write!(f, "'{}': is_symmetric {found} in file, {expected} live", self.name)
            }
            MismatchKind::Disabled => write!(f, "'{}': quantizer is disabled", self.name),
        }
    }
}

impl QuantSimModel {
    /// Encodings of every enabled, calibrated quantizer
    pub fn encodings_file(&self) -> EncodingsFile {
        let mut file = EncodingsFile {
            quantizer_args: Some(QuantizerArgs {
                activation_bitwidth: self.options.default_activation_bw,
                dtype: self.options.default_data_type,
                is_symmetric: Some(self.policy.param_symmetric),
                param_bitwidth: self.options.default_param_bw,
                per_channel_quantization: self.policy.per_channel_quantization,
                quant_scheme: self.options.quant_scheme,
            }),
            ..EncodingsFile::default()
        };
        for (name, quantizer) in &self.quantizers.0 {
            if !quantizer.enabled() || !quantizer.is_encoding_valid() {
                continue;
            }
            let Some(encodings) = quantizer.encodings() else {
                continue;
            };
            let strict = quantizer.use_strict_symmetric();
            let records = encodings
                .iter()
                .map(|enc| EncodingRecord::from(enc).with_strict_symmetric(strict))
                .collect();
            let section = if quantizer.role().is_param() {
                &mut file.param_encodings
            } else {
                &mut file.activation_encodings
            };
            section.insert(name.clone(), records);
        }
        file
    }

    /// Write the encodings file alone
    pub fn save_encodings(&self, path: impl AsRef<Path>) -> Result<()> {
        self.encodings_file().save(path)
    }

    /// Write `<prefix>.encodings` and `<prefix>.graph.json` into `dir`
    pub fn export(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<()> {
        self.export_with(dir, prefix, &SaveConfig::default())
    }

    /// [`Self::export`] with explicit graph save settings
    pub fn export_with(&self, dir: impl AsRef<Path>, prefix: &str, config: &SaveConfig) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let file = self.encodings_file();
        file.save(dir.join(format!("{prefix}.encodings")))?;
        save_graph(&self.original, dir.join(format!("{prefix}.graph.json")), config)?;
        info!(
            dir = %dir.display(),
            prefix,
            activations = file.activation_encodings.len(),
            params = file.param_encodings.len(),
            "sim exported"
        );
        Ok(())
    }

    /// Install encodings from a file, bypassing calibration
    ///
    /// With `strict`, any mismatch fails with [`Error::EncodingMismatch`] and
    /// nothing is changed. Otherwise matching entries are installed,
    /// entries without a usable quantizer are skipped, enabled quantizers the
    /// file does not cover are disabled, and the file-side mismatches are
    /// returned.
    pub fn load_encodings(&mut self, path: impl AsRef<Path>, strict: bool) -> Result<Vec<EncodingMismatch>> {
        let file = EncodingsFile::from_file(path)?;
        self.apply_encodings(&file, strict)
    }

    /// [`Self::load_encodings`] from an in-memory file
    pub fn apply_encodings(&mut self, file: &EncodingsFile, strict: bool) -> Result<Vec<EncodingMismatch>> {
        let mut mismatches = Vec::new();
        let mut plan = Vec::new();

        for (name, records) in file.entries() {
            let Some(quantizer) = self.quantizers.0.get(name) else {
                mismatches.push(EncodingMismatch::new(name, MismatchKind::MissingQuantizer));
                continue;
            };
            let encodings = records.iter().map(EncodingRecord::to_encoding).collect::<Result<Vec<_>>>()?;
            let Some(first) = encodings.first() else {
                return Err(Error::Serialization(format!("empty encoding list for '{name}'")));
            };
            let strict_symmetric = records.first().and_then(|r| r.is_strict);

            let expected = if quantizer.is_per_channel() { quantizer.num_channels() } else { Some(1) };
            if let Some(expected) = expected.filter(|&n| n != encodings.len()) {
                mismatches.push(EncodingMismatch::new(
                    name,
                    MismatchKind::ChannelCount { expected, found: encodings.len() },
                ));
                continue;
            }
            if first.bitwidth != quantizer.bitwidth() {
                mismatches.push(EncodingMismatch::new(
                    name,
                    MismatchKind::Bitwidth { expected: quantizer.bitwidth(), found: first.bitwidth },
                ));
            }
            if first.dtype != quantizer.data_type() {
                mismatches.push(EncodingMismatch::new(
                    name,
                    MismatchKind::DataType { expected: quantizer.data_type(), found: first.dtype },
                ));
            } else if first.dtype == QuantDataType::Int && first.is_symmetric != quantizer.use_symmetric_encodings() {
                mismatches.push(EncodingMismatch::new(
                    name,
                    MismatchKind::Symmetry { expected: quantizer.use_symmetric_encodings(), found: first.is_symmetric },
                ));
            }
            if !quantizer.enabled() {
                mismatches.push(EncodingMismatch::new(name, MismatchKind::Disabled));
            }
            plan.push((name.clone(), encodings, strict_symmetric));
        }

        let uncovered: Vec<String> = self
            .quantizers
            .0
            .iter()
            .filter(|(name, q)| {
                q.enabled()
                    && !file.activation_encodings.contains_key(*name)
                    && !file.param_encodings.contains_key(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();

        if strict {
            mismatches.extend(uncovered.iter().map(|name| EncodingMismatch::new(name, MismatchKind::MissingEncoding)));
            if !mismatches.is_empty() {
                return Err(Error::EncodingMismatch { mismatches });
            }
        }

        for mismatch in &mismatches {
            warn!(%mismatch, "encoding mismatch");
        }
        let installed = plan.len();
        for (name, encodings, strict_symmetric) in plan {
            if let Some(quantizer) = self.quantizers.0.get_mut(&name) {
                if quantizer.is_per_channel() {
                    quantizer.set_num_channels(encodings.len());
                }
                quantizer.install_encodings(encodings, strict_symmetric);
            }
        }
        for name in &uncovered {
            if let Some(quantizer) = self.quantizers.0.get_mut(name) {
                warn!(quantizer = %name, "no encoding in file, disabling");
                quantizer.set_enabled(false);
            }
        }
        info!(
            installed,
            skipped = mismatches.iter().filter(|m| m.is_skipped()).count(),
            disabled = uncovered.len(),
            "encodings loaded"
        );
        Ok(mismatches)
    }
}
