//! Elementwise sum of a sequence of same-shaped inputs.

use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AddConfig {
    #[serde(flatten)]
    base: BaseConfig,
}

pub struct Add {
    base: LayerBase,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static ADD: LayerClass = LayerClass {
    module: MODULE,
    name: "Add",
    from_config: Add::from_config,
};

fn operands<T>(inputs: &Structure<T>) -> Result<Vec<&T>> {
    let Some(items) = inputs.as_sequence() else {
        bail!("Add expects a sequence of inputs, got a {}", inputs.kind());
    };
    ensure!(
        items.len() >= 2,
        "Add expects at least 2 inputs, got {}",
        items.len()
    );
    items
        .iter()
        .map(|item| item.expect_single("Add"))
        .collect()
}

fn check_shapes<'a>(shapes: impl IntoIterator<Item = &'a Shape>) -> Result<()> {
    let mut shapes = shapes.into_iter();
    let Some(first) = shapes.next() else {
        return Ok(());
    };
    for shape in shapes {
        ensure!(
            shape == first,
            "Add inputs must share a shape, got {first} and {shape}"
        );
    }
    Ok(())
}

impl Add {
    pub fn class() -> LayerClass {
        ADD
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: AddConfig = parse_config("Add", config)?;
        let mut base = LayerBase::new(&config.base, "add", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(Add { base }))
    }
}

impl Layer for Add {
    fn layer_class(&self) -> LayerClass {
        ADD
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()> {
        check_shapes(operands(input_shape)?)
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let items = operands(inputs)?;
        check_shapes(items.iter().map(|t| t.shape()))?;
        let dtype = self.base.compute_dtype();
        let mut sum = items[0].to_dense().cast(dtype);
        for item in &items[1..] {
            sum = functional::add(&sum, &item.to_dense(), dtype)?;
        }
        let all_sparse = items.iter().all(|t| t.is_sparse());
        Ok(Structure::Single(if all_sparse { sum.to_sparse() } else { sum }))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let items = operands(inputs)?;
        check_shapes(items.iter().map(|t| t.shape()))?;
        let all_sparse = items.iter().all(|t| t.is_sparse());
        Ok(Structure::Single(SymbolicTensor::new(
            items[0].shape().clone(),
            self.base.compute_dtype(),
            all_sparse,
        )))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&AddConfig {
            base: self.base.base_config(),
        })
    }
}
