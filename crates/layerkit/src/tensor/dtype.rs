//! Enumerates the scalar element types understood by layers and backends.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error, Result};
use half::{bf16, f16};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Logical dtype identifier shared between tensors, placeholders, and variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DType {
    /// 16-bit floating point with full mantissa (fp16).
    F16,
    /// 16-bit bfloat16 precision as used by many accelerators.
    BF16,
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
    I16,
    I32,
    I64,
    Bool,
}

impl DType {
    /// Every dtype, in tag order.
    pub const ALL: [DType; 8] = [
        DType::F16,
        DType::BF16,
        DType::F32,
        DType::F64,
        DType::I16,
        DType::I32,
        DType::I64,
        DType::Bool,
    ];

    /// Canonical lowercase name, e.g. `"float32"`.
    pub fn name(self) -> &'static str {
        match self {
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::I16 => "int16",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::Bool => "bool",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I16 | DType::I32 | DType::I64)
    }

    /// Parses canonical names (`"float32"`) and the short aliases (`"f32"`, `"float"`).
    pub fn parse(name: &str) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let dtype = match normalized.as_str() {
            "float16" | "f16" | "half" => DType::F16,
            "bfloat16" | "bf16" => DType::BF16,
            "float32" | "f32" | "float" => DType::F32,
            "float64" | "f64" | "double" => DType::F64,
            "int16" | "i16" => DType::I16,
            "int32" | "i32" | "int" => DType::I32,
            "int64" | "i64" => DType::I64,
            "bool" | "boolean" => DType::Bool,
            _ => bail!("unknown dtype '{name}'"),
        };
        Ok(dtype)
    }

    /// Rounds an `f64` value to the nearest value representable in this dtype.
    ///
    /// Integer dtypes truncate toward zero and saturate at their bounds; NaN maps to zero.
    pub fn round(self, value: f64) -> f64 {
        match self {
            DType::F16 => f16::from_f64(value).to_f64(),
            DType::BF16 => bf16::from_f64(value).to_f64(),
            DType::F32 => value as f32 as f64,
            DType::F64 => value,
            DType::I16 => value as i16 as f64,
            DType::I32 => value as i32 as f64,
            DType::I64 => value as i64 as f64,
            DType::Bool => {
                if value != 0.0 && !value.is_nan() {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DType::parse(s)
    }
}

impl Serialize for DType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        DType::parse(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::DType;

    #[test]
    fn names_roundtrip_through_parse() {
        for dtype in DType::ALL {
            assert_eq!(DType::parse(dtype.name()).unwrap(), dtype);
        }
    }

    #[test]
    fn integer_rounding_truncates_and_saturates() {
        assert_eq!(DType::I16.round(2.9), 2.0);
        assert_eq!(DType::I16.round(-2.9), -2.0);
        assert_eq!(DType::I16.round(1e9), i16::MAX as f64);
        assert_eq!(DType::I32.round(f64::NAN), 0.0);
    }

    #[test]
    fn half_rounding_loses_precision() {
        let value = 0.1f64;
        assert_ne!(DType::F16.round(value), value);
        assert!((DType::F16.round(value) - value).abs() < 1e-3);
    }
}
