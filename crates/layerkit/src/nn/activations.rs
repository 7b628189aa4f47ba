//! Elementwise activations referenced by name in layer configs.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::ops::functional;
use crate::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
}

impl Activation {
    /// Applies the activation; the result keeps the input dtype.
    pub fn apply(self, x: &Tensor) -> Result<Tensor> {
        let out = match self {
            Activation::Linear => x.clone(),
            Activation::Relu => x.map(|v| v.max(0.0)),
            Activation::Sigmoid => x.map(|v| 1.0 / (1.0 + (-v).exp())),
            Activation::Tanh => x.map(f64::tanh),
            Activation::Softmax => functional::softmax_last_dim(x, x.dtype())?,
        };
        Ok(out)
    }
}
