use anyhow::{ensure, Result};

use crate::nn::Variable;

pub trait Optimizer: Send {
    fn name(&self) -> &str;

    /// Applies one update; `grads[i]` holds the dense gradient of `params[i]`.
    fn apply(&mut self, params: &mut [&mut Variable], grads: &[Vec<f64>]) -> Result<()>;
}

/// Stochastic gradient descent with optional momentum.
pub struct Sgd {
    pub learning_rate: f64,
    pub momentum: f64,
    velocities: Vec<Vec<f64>>,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Sgd {
            learning_rate,
            momentum: 0.0,
            velocities: Vec::new(),
        }
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd::new(0.01)
    }
}

impl Optimizer for Sgd {
    fn name(&self) -> &str {
        "sgd"
    }

    fn apply(&mut self, params: &mut [&mut Variable], grads: &[Vec<f64>]) -> Result<()> {
        ensure!(
            params.len() == grads.len(),
            "optimizer received {} parameters but {} gradients",
            params.len(),
            grads.len()
        );
        if self.velocities.len() != params.len() {
            self.velocities = grads.iter().map(|g| vec![0.0; g.len()]).collect();
        }
        for ((param, grad), velocity) in params.iter_mut().zip(grads).zip(&mut self.velocities) {
            let mut values = param.value().values().into_owned();
            ensure!(
                values.len() == grad.len(),
                "gradient length {} does not match variable '{}' ({} elements)",
                grad.len(),
                param.name(),
                values.len()
            );
            for ((v, g), m) in values.iter_mut().zip(grad).zip(velocity.iter_mut()) {
                *m = self.momentum * *m - self.learning_rate * g;
                *v += *m;
            }
            param.assign_values(&values)?;
        }
        Ok(())
    }
}
