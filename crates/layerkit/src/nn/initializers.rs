//! Weight initialisers referenced by name in layer configs.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::tensor::{DType, Shape, Tensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    Zeros,
    Ones,
    #[default]
    GlorotUniform,
    RandomNormal,
    RandomUniform,
}

impl Initializer {
    /// Materialises a tensor of `shape` in `dtype`.
    pub fn sample(self, shape: &Shape, dtype: DType, rng: &mut StdRng) -> Result<Tensor> {
        let len = shape.num_elements();
        let values: Vec<f64> = match self {
            Initializer::Zeros => vec![0.0; len],
            Initializer::Ones => vec![1.0; len],
            Initializer::GlorotUniform => {
                let (fan_in, fan_out) = fans(shape);
                let limit = (6.0 / (fan_in + fan_out).max(1.0)).sqrt();
                (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
            }
            Initializer::RandomNormal => (0..len).map(|_| 0.05 * standard_normal(rng)).collect(),
            Initializer::RandomUniform => (0..len).map(|_| rng.gen_range(-0.05..0.05)).collect(),
        };
        Tensor::from_values(shape.clone(), dtype, values)
    }
}

fn fans(shape: &Shape) -> (f64, f64) {
    match shape.dims() {
        [] => (1.0, 1.0),
        [n] => (*n as f64, *n as f64),
        dims => {
            let receptive: usize = dims[..dims.len() - 2].iter().product();
            let fan_in = dims[dims.len() - 2] * receptive;
            let fan_out = dims[dims.len() - 1] * receptive;
            (fan_in as f64, fan_out as f64)
        }
    }
}

/// Samples `N(0, 1)` using the Box-Muller transform.
pub(crate) fn standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
