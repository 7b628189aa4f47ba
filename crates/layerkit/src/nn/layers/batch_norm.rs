//! Batch normalisation over the last axis with running statistics.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{is_training, BaseConfig, CallKwargs, Initializer, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

fn default_axis() -> i64 {
    -1
}

fn default_momentum() -> f64 {
    0.99
}

fn default_epsilon() -> f64 {
    1e-3
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BatchNormalizationConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default = "default_axis")]
    axis: i64,
    #[serde(default = "default_momentum")]
    momentum: f64,
    #[serde(default = "default_epsilon")]
    epsilon: f64,
    #[serde(default = "default_true")]
    center: bool,
    #[serde(default = "default_true")]
    scale: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Slots {
    gamma: Option<usize>,
    beta: Option<usize>,
    moving_mean: usize,
    moving_variance: usize,
}

pub struct BatchNormalization {
    base: LayerBase,
    config: BatchNormalizationConfig,
    slots: Option<Slots>,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static BATCH_NORMALIZATION: LayerClass = LayerClass {
    module: MODULE,
    name: "BatchNormalization",
    from_config: BatchNormalization::from_config,
};

impl BatchNormalization {
    pub fn class() -> LayerClass {
        BATCH_NORMALIZATION
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: BatchNormalizationConfig = parse_config("BatchNormalization", config)?;
        ensure!(
            config.axis == -1,
            "BatchNormalization only normalises the last axis, got axis={}",
            config.axis
        );
        ensure!(
            (0.0..=1.0).contains(&config.momentum),
            "BatchNormalization momentum must be in [0, 1], got {}",
            config.momentum
        );
        let mut base = LayerBase::new(&config.base, "batch_normalization", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(BatchNormalization {
            base,
            config,
            slots: None,
        }))
    }
}

impl Layer for BatchNormalization {
    fn layer_class(&self) -> LayerClass {
        BATCH_NORMALIZATION
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()> {
        let shape = input_shape.expect_single("BatchNormalization")?;
        let channels = shape.last_dim().with_context(|| {
            format!("BatchNormalization requires an input of rank >= 1, got {shape}")
        })?;
        let gamma = if self.config.scale {
            Some(self.base.add_weight("gamma", [channels], Initializer::Ones, true)?)
        } else {
            None
        };
        let beta = if self.config.center {
            Some(self.base.add_weight("beta", [channels], Initializer::Zeros, true)?)
        } else {
            None
        };
        let moving_mean = self
            .base
            .add_weight("moving_mean", [channels], Initializer::Zeros, false)?;
        let moving_variance =
            self.base
                .add_weight("moving_variance", [channels], Initializer::Ones, false)?;
        self.slots = Some(Slots {
            gamma,
            beta,
            moving_mean,
            moving_variance,
        });
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let x = inputs.expect_single("BatchNormalization")?;
        let slots = self.slots.context("BatchNormalization is not built")?;
        let dtype = self.base.compute_dtype();
        let (mean, var) = if is_training(kwargs) {
            let (mean, var) = functional::moments_last_axis(x);
            let momentum = self.config.momentum;
            let update = |old: &[f64], new: &[f64]| -> Vec<f64> {
                old.iter()
                    .zip(new)
                    .map(|(o, n)| o * momentum + n * (1.0 - momentum))
                    .collect()
            };
            let old_mean = self.base.weight(slots.moving_mean)?.value().values().into_owned();
            let old_var = self
                .base
                .weight(slots.moving_variance)?
                .value()
                .values()
                .into_owned();
            let weights = self.base.weights_mut();
            weights[slots.moving_mean].assign_values(&update(&old_mean, &mean))?;
            weights[slots.moving_variance].assign_values(&update(&old_var, &var))?;
            (mean, var)
        } else {
            let mean = self.base.weight(slots.moving_mean)?.value().values().into_owned();
            let var = self
                .base
                .weight(slots.moving_variance)?
                .value()
                .values()
                .into_owned();
            (mean, var)
        };
        let channels = mean.len();
        let gamma = match slots.gamma {
            Some(i) => self.base.weight(i)?.value().values().into_owned(),
            None => vec![1.0; channels],
        };
        let beta = match slots.beta {
            Some(i) => self.base.weight(i)?.value().values().into_owned(),
            None => vec![0.0; channels],
        };
        let eps = self.config.epsilon;
        let values = x
            .values()
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let c = i % channels;
                (v - mean[c]) / (var[c] + eps).sqrt() * gamma[c] + beta[c]
            })
            .collect();
        let y = Tensor::from_values(x.shape().clone(), dtype, values)?;
        Ok(Structure::Single(y))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("BatchNormalization")?;
        Ok(Structure::Single(SymbolicTensor::dense(
            x.shape().clone(),
            self.base.compute_dtype(),
        )))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&BatchNormalizationConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
