//! Passes inputs through and records an L1/L2 activity penalty as a loss term.

use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActivityRegularizationConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default)]
    l1: f64,
    #[serde(default)]
    l2: f64,
}

pub struct ActivityRegularization {
    base: LayerBase,
    config: ActivityRegularizationConfig,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static ACTIVITY_REGULARIZATION: LayerClass = LayerClass {
    module: MODULE,
    name: "ActivityRegularization",
    from_config: ActivityRegularization::from_config,
};

impl ActivityRegularization {
    pub fn class() -> LayerClass {
        ACTIVITY_REGULARIZATION
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: ActivityRegularizationConfig = parse_config("ActivityRegularization", config)?;
        ensure!(
            config.l1 >= 0.0 && config.l2 >= 0.0,
            "regularization factors must be non-negative, got l1={} l2={}",
            config.l1,
            config.l2
        );
        let mut base = LayerBase::new(&config.base, "activity_regularization", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(ActivityRegularization { base, config }))
    }
}

impl Layer for ActivityRegularization {
    fn layer_class(&self) -> LayerClass {
        ACTIVITY_REGULARIZATION
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, _input_shape: &Structure<Shape>) -> Result<()> {
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let x = inputs.expect_single("ActivityRegularization")?;
        let batch = x.shape().dims().first().copied().unwrap_or(1).max(1) as f64;
        let penalty =
            (self.config.l1 * functional::sum_abs(x) + self.config.l2 * functional::sum_squares(x))
                / batch;
        self.base
            .add_loss(Tensor::scalar(penalty, self.base.compute_dtype()));
        Ok(Structure::Single(x.clone()))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        Ok(Structure::Single(
            inputs.expect_single("ActivityRegularization")?.clone(),
        ))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&ActivityRegularizationConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
