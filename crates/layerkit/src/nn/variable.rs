use anyhow::{ensure, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::tensor::{DType, Shape, Tensor};

/// Named tensor owned by a layer.
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    value: Tensor,
    trainable: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Tensor, trainable: bool) -> Self {
        Self {
            name: name.into(),
            value,
            trainable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Tensor {
        &self.value
    }

    pub fn shape(&self) -> &Shape {
        self.value.shape()
    }

    pub fn dtype(&self) -> DType {
        self.value.dtype()
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    /// Replaces the value, keeping the variable's shape and storage dtype.
    pub fn assign(&mut self, value: &Tensor) -> Result<()> {
        ensure!(
            value.shape() == self.value.shape(),
            "cannot assign value of shape {} to variable '{}' of shape {}",
            value.shape(),
            self.name,
            self.value.shape()
        );
        self.value = value.to_dense().cast(self.value.dtype());
        Ok(())
    }

    /// Overwrites dense values in place, rounding to the variable dtype.
    pub fn assign_values(&mut self, values: &[f64]) -> Result<()> {
        let value = Tensor::from_values(self.value.shape().clone(), self.value.dtype(), values.to_vec())?;
        self.assign(&value)
    }
}

/// Reproducible random stream owned by a layer.
///
/// The state is an `int64` `[seed_low_bits, counter]` pair exposed as a non-trainable
/// variable; every draw advances the counter.
#[derive(Debug, Clone)]
pub struct SeedGenerator {
    seed: u64,
    state: Variable,
}

impl SeedGenerator {
    pub fn new(name: impl Into<String>, seed: u64) -> Result<Self> {
        let low_bits = (seed & 0xFFFF_FFFF) as f64;
        let state = Tensor::from_values([2], DType::I64, vec![low_bits, 0.0])?;
        Ok(Self {
            seed,
            state: Variable::new(name, state, false),
        })
    }

    pub fn state(&self) -> &Variable {
        &self.state
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of draws taken so far.
    pub fn counter(&self) -> u64 {
        self.state.value().values()[1] as u64
    }

    /// Returns a generator for the next draw and advances the counter.
    pub fn next_rng(&mut self) -> Result<StdRng> {
        let values = self.state.value().values().into_owned();
        let counter = values[1] as u64;
        self.state.assign_values(&[values[0], (counter + 1) as f64])?;
        let mixed = self.seed ^ counter.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Ok(StdRng::seed_from_u64(mixed))
    }
}
