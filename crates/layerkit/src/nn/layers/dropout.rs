//! Inverted dropout driven by a layer-owned seed generator.

use anyhow::{ensure, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{is_training, BaseConfig, CallKwargs, Layer, LayerBase};
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DropoutConfig {
    #[serde(flatten)]
    base: BaseConfig,
    rate: f64,
    #[serde(default)]
    seed: Option<u64>,
}

pub struct Dropout {
    base: LayerBase,
    config: DropoutConfig,
    generator: usize,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static DROPOUT: LayerClass = LayerClass {
    module: MODULE,
    name: "Dropout",
    from_config: Dropout::from_config,
};

impl Dropout {
    pub fn class() -> LayerClass {
        DROPOUT
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: DropoutConfig = parse_config("Dropout", config)?;
        ensure!(
            (0.0..1.0).contains(&config.rate),
            "Dropout rate must be in [0, 1), got {}",
            config.rate
        );
        let mut base = LayerBase::new(&config.base, "dropout", ctx);
        base.set_supports_masking(true);
        let generator = base.add_seed_generator(config.seed)?;
        Ok(Box::new(Dropout {
            base,
            config,
            generator,
        }))
    }
}

impl Layer for Dropout {
    fn layer_class(&self) -> LayerClass {
        DROPOUT
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

    fn call(&mut self, inputs: &Structure<Tensor>, kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let x = inputs.expect_single("Dropout")?;
        let rate = self.config.rate;
        if !is_training(kwargs) || rate == 0.0 {
            return Ok(Structure::Single(x.clone()));
        }
        let mut rng = self.base.seed_generator_mut(self.generator)?.next_rng()?;
        let keep = 1.0 - rate;
        let y = x
            .to_dense()
            .map(|v| if rng.gen::<f64>() < keep { v / keep } else { 0.0 });
        let y = if x.is_sparse() { y.to_sparse() } else { y };
        Ok(Structure::Single(y))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("Dropout")?;
        Ok(Structure::Single(x.clone()))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&DropoutConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
