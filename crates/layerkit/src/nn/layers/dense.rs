//! Fully connected layer `y = activation(x W + b)`.
//!
//! Accepts dense or sparse input; the output is always dense.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{Activation, BaseConfig, CallKwargs, Initializer, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

fn default_use_bias() -> bool {
    true
}

fn default_bias_initializer() -> Initializer {
    Initializer::Zeros
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DenseConfig {
    #[serde(flatten)]
    base: BaseConfig,
    units: usize,
    #[serde(default)]
    activation: Activation,
    #[serde(default = "default_use_bias")]
    use_bias: bool,
    #[serde(default)]
    kernel_initializer: Initializer,
    #[serde(default = "default_bias_initializer")]
    bias_initializer: Initializer,
}

pub struct Dense {
    base: LayerBase,
    config: DenseConfig,
    kernel: Option<usize>,
    bias: Option<usize>,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static DENSE: LayerClass = LayerClass {
    module: MODULE,
    name: "Dense",
    from_config: Dense::from_config,
};

impl Dense {
    pub fn class() -> LayerClass {
        DENSE
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: DenseConfig = parse_config("Dense", config)?;
        ensure!(config.units > 0, "Dense units must be positive, got {}", config.units);
        Ok(Box::new(Dense {
            base: LayerBase::new(&config.base, "dense", ctx),
            config,
            kernel: None,
            bias: None,
        }))
    }
}

impl Layer for Dense {
    fn layer_class(&self) -> LayerClass {
        DENSE
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()> {
        let shape = input_shape.expect_single("Dense")?;
        let in_features = shape
            .last_dim()
            .with_context(|| format!("Dense requires an input of rank >= 1, got {shape}"))?;
        let units = self.config.units;
        self.kernel = Some(self.base.add_weight(
            "kernel",
            [in_features, units],
            self.config.kernel_initializer,
            true,
        )?);
        if self.config.use_bias {
            self.bias = Some(
                self.base
                    .add_weight("bias", [units], self.config.bias_initializer, true)?,
            );
        }
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let x = inputs.expect_single("Dense")?;
        let dtype = self.base.compute_dtype();
        let kernel_index = self.kernel.context("Dense kernel is missing")?;
        let kernel = self.base.weight(kernel_index)?.value().cast(dtype);
        let mut y = functional::matmul_last(x, &kernel, dtype)?;
        if let Some(bias_index) = self.bias {
            let bias = self.base.weight(bias_index)?.value().cast(dtype);
            y = functional::add_bias(&y, &bias, dtype)?;
        }
        Ok(Structure::Single(self.config.activation.apply(&y)?))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("Dense")?;
        let shape = x.shape().with_last_dim(self.config.units);
        Ok(Structure::Single(SymbolicTensor::dense(
            shape,
            self.base.compute_dtype(),
        )))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&DenseConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
