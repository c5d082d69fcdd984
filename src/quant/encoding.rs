//! Quantization encodings and quantize-dequantize math
//!
//! An [`Encoding`] maps floats onto an integer grid of `2^bitwidth` codes:
//!
//! ```text
//! q = clamp(round(x / scale) - offset, qmin, 2^bw - 1)
//! x' = (q + offset) * scale
//! ```
//!
//! Encodings are derived from an observed range by [`Encoding::from_range`]
//! which snaps the range onto the grid so that `min`, `max`, `scale` and
//! `offset` stay mutually consistent.

use half::f16;
use serde::{Deserialize, Serialize};

/// Smallest range an encoding may cover
pub const MIN_ENCODING_RANGE: f32 = 1e-5;

/// Numeric representation being simulated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantDataType {
    /// Fixed-point integer grid
    #[default]
    Int,
    /// Reduced-precision float (16 bit rounds through IEEE half)
    Float,
}

impl std::fmt::Display for QuantDataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuantDataType::Int => f.write_str("int"),
            QuantDataType::Float => f.write_str("float"),
        }
    }
}

/// How an integer range is derived from observed statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct EncodingSettings {
    pub bitwidth: u8,
    pub symmetric: bool,
    /// Exclude the most negative code so the grid is symmetric around zero
    pub strict_symmetric: bool,
    /// Use the full unsigned grid for symmetric encodings of non-negative data
    pub unsigned_symmetric: bool,
}

impl EncodingSettings {
    pub fn new(bitwidth: u8, symmetric: bool) -> Self {
        Self { bitwidth, symmetric, strict_symmetric: false, unsigned_symmetric: false }
    }

    pub fn with_strict_symmetric(mut self, strict: bool) -> Self {
        self.strict_symmetric = strict;
        self
    }

    pub fn with_unsigned_symmetric(mut self, unsigned: bool) -> Self {
        self.unsigned_symmetric = unsigned;
        self
    }
}

/// Parameters mapping floats to and from an integer grid
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Encoding {
    pub bitwidth: u8,
    pub dtype: QuantDataType,
    pub is_symmetric: bool,
    pub min: f32,
    pub max: f32,
    pub offset: i32,
    pub scale: f32,
}

/// Number of steps on a `bitwidth` grid
pub fn num_steps(bitwidth: u8) -> f32 {
    ((1u64 << bitwidth) - 1) as f32
}

impl Encoding {
    /// Derive an integer encoding covering `[min, max]`
    pub fn from_range(min: f32, max: f32, settings: EncodingSettings) -> Self {
        let steps = num_steps(settings.bitwidth);

        if settings.symmetric {
            let abs_max = min.abs().max(max.abs());
            if settings.unsigned_symmetric && min >= 0.0 {
                let max = abs_max.max(MIN_ENCODING_RANGE);
                return Self {
                    bitwidth: settings.bitwidth,
                    dtype: QuantDataType::Int,
                    is_symmetric: true,
                    min: 0.0,
                    max,
                    offset: 0,
                    scale: max / steps,
                };
            }
            let abs_max = abs_max.max(MIN_ENCODING_RANGE / 2.0);
            return Self {
                bitwidth: settings.bitwidth,
                dtype: QuantDataType::Int,
                is_symmetric: true,
                min: -abs_max,
                max: abs_max,
                offset: -(1i64 << (settings.bitwidth - 1)) as i32,
                scale: 2.0 * abs_max / steps,
            };
        }

        // the grid must represent zero exactly
        let mut min = min.min(0.0);
        let mut max = max.max(0.0);
        if max - min < MIN_ENCODING_RANGE {
            max = min + MIN_ENCODING_RANGE;
        }
        let scale = (max - min) / steps;
        let offset = (min / scale).round();
        min = offset * scale;
        max = min + steps * scale;

        Self {
            bitwidth: settings.bitwidth,
            dtype: QuantDataType::Int,
            is_symmetric: false,
            min,
            max,
            offset: offset as i32,
            scale,
        }
    }

    /// Float encoding; carries no range
    pub fn float(bitwidth: u8) -> Self {
        Self {
            bitwidth,
            dtype: QuantDataType::Float,
            is_symmetric: false,
            min: 0.0,
            max: 0.0,
            offset: 0,
            scale: 0.0,
        }
    }

    pub fn num_steps(&self) -> f32 {
        num_steps(self.bitwidth)
    }

    /// Structural validity: supported bitwidth, positive scale and a
    /// consistent range
    pub fn is_valid(&self) -> bool {
        match self.dtype {
            QuantDataType::Float => self.bitwidth == 16,
            QuantDataType::Int => {
                (1..=32).contains(&self.bitwidth)
                    && self.scale.is_finite()
                    && self.scale > 0.0
                    && self.min.is_finite()
                    && self.max >= self.min
            }
        }
    }

    /// Lowest integer code in use
    fn qmin(&self, strict: bool) -> f32 {
        if strict && self.is_symmetric && self.offset != 0 {
            1.0
        } else {
            0.0
        }
    }

    /// Integer code for `x`
    pub fn quantize(&self, x: f32, strict: bool) -> f32 {
        ((x / self.scale).round() - self.offset as f32).clamp(self.qmin(strict), self.num_steps())
    }

    /// Float value of an integer code
    pub fn dequantize(&self, q: f32) -> f32 {
        (q + self.offset as f32) * self.scale
    }

    /// Simulated round trip through the integer or half-precision grid
    pub fn quantize_dequantize(&self, x: f32, strict: bool) -> f32 {
        match self.dtype {
            QuantDataType::Float => f16::from_f32(x).to_f32(),
            QuantDataType::Int => self.dequantize(self.quantize(x, strict)),
        }
    }
}
