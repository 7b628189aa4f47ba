//! Masks timesteps whose features all equal `mask_value`.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{DType, Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MaskingConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default)]
    mask_value: f64,
}

pub struct Masking {
    base: LayerBase,
    config: MaskingConfig,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static MASKING: LayerClass = LayerClass {
    module: MODULE,
    name: "Masking",
    from_config: Masking::from_config,
};

impl Masking {
    pub fn class() -> LayerClass {
        MASKING
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: MaskingConfig = parse_config("Masking", config)?;
        let mut base = LayerBase::new(&config.base, "masking", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(Masking { base, config }))
    }
}

impl Layer for Masking {
    fn layer_class(&self) -> LayerClass {
        MASKING
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
        let x = inputs.expect_single("Masking")?.to_dense();
        let keep = functional::rows_not_equal(&x, self.config.mask_value);
        let width = x.shape().last_dim().unwrap_or(1).max(1);
        let values = x
            .values()
            .iter()
            .enumerate()
            .map(|(i, &v)| if keep[i / width] { v } else { 0.0 })
            .collect();
        let y = Tensor::from_values(x.shape().clone(), x.dtype(), values)?;
        Ok(Structure::Single(y))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("Masking")?;
        Ok(Structure::Single(SymbolicTensor::dense(
            x.shape().clone(),
            self.base.compute_dtype(),
        )))
    }

    fn compute_mask(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _previous_mask: Option<&SymbolicTensor>,
    ) -> Result<Option<SymbolicTensor>> {
        let x = inputs.expect_single("Masking")?;
        Ok(Some(SymbolicTensor::dense(
            x.shape().without_last_dim(),
            DType::Bool,
        )))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&MaskingConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
