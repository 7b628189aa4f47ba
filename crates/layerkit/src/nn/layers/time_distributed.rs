//! Applies a wrapped layer independently to every timestep of a `[batch, time, ...]` input.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::MODULE;
use crate::nn::{
    build_layer, invoke, BaseConfig, CallKwargs, Layer, LayerBase, SeedGenerator, Variable,
};
use crate::saving::{
    deserialize_layer, parse_config, serialize_layer, to_config, Config, LayerClass,
    LayerContext, LAYER_CLASSES,
};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TimeDistributedConfig {
    #[serde(flatten)]
    base: BaseConfig,
    layer: Value,
}

pub struct TimeDistributed {
    base: LayerBase,
    inner: Box<dyn Layer>,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static TIME_DISTRIBUTED: LayerClass = LayerClass {
    module: MODULE,
    name: "TimeDistributed",
    from_config: TimeDistributed::from_config,
};

/// `[B, T, rest..]` -> `[B * T, rest..]`
fn merge_time(shape: &Shape) -> Result<Shape> {
    let dims = shape.dims();
    if dims.len() < 3 {
        bail!("TimeDistributed requires an input of rank >= 3, got {shape}");
    }
    let mut merged = vec![dims[0] * dims[1]];
    merged.extend_from_slice(&dims[2..]);
    Ok(Shape::new(merged))
}

/// `[B * T, rest..]` -> `[B, T, rest..]`
fn split_time(shape: &Shape, batch: usize, steps: usize) -> Result<Shape> {
    let dims = shape.dims();
    if dims.first() != Some(&(batch * steps)) {
        bail!("wrapped layer changed the batch dimension: expected {}, got {shape}", batch * steps);
    }
    let mut split = vec![batch, steps];
    split.extend_from_slice(&dims[1..]);
    Ok(Shape::new(split))
}

impl TimeDistributed {
    pub fn class() -> LayerClass {
        TIME_DISTRIBUTED
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: TimeDistributedConfig = parse_config("TimeDistributed", config)?;
        let inner = deserialize_layer(&config.layer, ctx)?;
        let mut base = LayerBase::new(&config.base, "time_distributed", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(TimeDistributed { base, inner }))
    }

    pub fn inner(&self) -> &dyn Layer {
        self.inner.as_ref()
    }
}

impl Layer for TimeDistributed {
    fn layer_class(&self) -> LayerClass {
        TIME_DISTRIBUTED
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()> {
        let shape = input_shape.expect_single("TimeDistributed")?;
        let merged = merge_time(shape)?;
        if !self.inner.is_built() {
            build_layer(self.inner.as_mut(), &Structure::Single(merged))?;
        }
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let x = inputs.expect_single("TimeDistributed")?;
        let merged_shape = merge_time(x.shape())?;
        let (batch, steps) = (x.shape().dims()[0], x.shape().dims()[1]);
        let merged = x.reshape(merged_shape)?;
        let output = invoke(self.inner.as_mut(), &Structure::Single(merged), kwargs)?;
        let y = output.expect_single("TimeDistributed")?;
        let y = y.reshape(split_time(y.shape(), batch, steps)?)?;
        Ok(Structure::Single(y.cast(self.base.compute_dtype())))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("TimeDistributed")?;
        let merged = x.with_shape(merge_time(x.shape())?);
        let (batch, steps) = (x.shape().dims()[0], x.shape().dims()[1]);
        let inner_input = merged.with_dtype(self.inner.dtype_policy().compute_dtype());
        let output = self
            .inner
            .compute_output_spec(&Structure::Single(inner_input), kwargs)?;
        let y = output.expect_single("TimeDistributed")?;
        Ok(Structure::Single(SymbolicTensor::new(
            split_time(y.shape(), batch, steps)?,
            self.base.compute_dtype(),
            false,
        )))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&TimeDistributedConfig {
            base: self.base.base_config(),
            layer: serialize_layer(self.inner.as_ref())?,
        })
    }

    fn weights(&self) -> Vec<&Variable> {
        let mut out: Vec<&Variable> = self.base.weights().iter().collect();
        out.extend(self.inner.weights());
        out
    }

    fn weights_mut(&mut self) -> Vec<&mut Variable> {
        let mut out: Vec<&mut Variable> = self.base.weights_mut().iter_mut().collect();
        out.extend(self.inner.weights_mut());
        out
    }

    fn trainable_weights(&self) -> Vec<&Variable> {
        if !self.base.trainable() {
            return Vec::new();
        }
        self.inner.trainable_weights()
    }

    fn trainable_mask(&self) -> Vec<bool> {
        let trainable = self.base.trainable();
        let mut out = vec![false; self.base.weights().len()];
        out.extend(self.inner.trainable_mask().into_iter().map(|t| trainable && t));
        out
    }

    fn non_trainable_weights(&self) -> Vec<&Variable> {
        if !self.base.trainable() {
            return self.weights();
        }
        self.inner.non_trainable_weights()
    }

    fn seed_generators(&self) -> Vec<&SeedGenerator> {
        let mut out: Vec<&SeedGenerator> = self.base.seed_generators().iter().collect();
        out.extend(self.inner.seed_generators());
        out
    }

    fn losses(&self) -> Vec<&Tensor> {
        let mut out: Vec<&Tensor> = self.base.losses().iter().collect();
        out.extend(self.inner.losses());
        out
    }
}
