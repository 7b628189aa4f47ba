//! Dtype policies: the storage dtype of variables versus the dtype computations run in.

use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::tensor::DType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DTypePolicy {
    name: String,
    compute: DType,
    variable: DType,
}

impl DTypePolicy {
    /// Parses a plain dtype name (`"float32"`) or a mixed policy (`"mixed_float16"`).
    pub fn parse(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        let (compute, variable) = match trimmed {
            "mixed_float16" => (DType::F16, DType::F32),
            "mixed_bfloat16" => (DType::BF16, DType::F32),
            other => {
                let dtype = DType::parse(other)?;
                if !dtype.is_float() {
                    bail!("dtype policy must be floating point, got '{name}'");
                }
                (dtype, dtype)
            }
        };
        Ok(Self {
            name: trimmed.to_string(),
            compute,
            variable,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dtype inputs are autocast to and outputs are produced in.
    pub fn compute_dtype(&self) -> DType {
        self.compute
    }

    /// Dtype weights are stored in.
    pub fn variable_dtype(&self) -> DType {
        self.variable
    }

    pub fn is_mixed(&self) -> bool {
        self.compute != self.variable
    }
}

impl Default for DTypePolicy {
    fn default() -> Self {
        Self {
            name: DType::F32.name().to_string(),
            compute: DType::F32,
            variable: DType::F32,
        }
    }
}

impl fmt::Display for DTypePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Serialize for DTypePolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> Deserialize<'de> for DTypePolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        DTypePolicy::parse(&name).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_policy_separates_compute_and_storage() {
        let policy = DTypePolicy::parse("mixed_float16").unwrap();
        assert_eq!(policy.compute_dtype(), DType::F16);
        assert_eq!(policy.variable_dtype(), DType::F32);
        assert!(policy.is_mixed());
    }

    #[test]
    fn integer_policies_are_rejected() {
        assert!(DTypePolicy::parse("int32").is_err());
    }
}
