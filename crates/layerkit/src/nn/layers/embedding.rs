//! Lookup table mapping integer indices to dense vectors.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Initializer, Layer, LayerBase};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{DType, Shape, SymbolicTensor, Tensor};

fn default_embeddings_initializer() -> Initializer {
    Initializer::RandomUniform
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingConfig {
    #[serde(flatten)]
    base: BaseConfig,
    input_dim: usize,
    output_dim: usize,
    #[serde(default = "default_embeddings_initializer")]
    embeddings_initializer: Initializer,
    #[serde(default)]
    mask_zero: bool,
}

pub struct Embedding {
    base: LayerBase,
    config: EmbeddingConfig,
    embeddings: Option<usize>,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static EMBEDDING: LayerClass = LayerClass {
    module: MODULE,
    name: "Embedding",
    from_config: Embedding::from_config,
};

impl Embedding {
    pub fn class() -> LayerClass {
        EMBEDDING
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: EmbeddingConfig = parse_config("Embedding", config)?;
        ensure!(
            config.input_dim > 0 && config.output_dim > 0,
            "Embedding dimensions must be positive, got input_dim={} output_dim={}",
            config.input_dim,
            config.output_dim
        );
        let mut base = LayerBase::new(&config.base, "embedding", ctx);
        base.set_supports_masking(config.mask_zero);
        Ok(Box::new(Embedding {
            base,
            config,
            embeddings: None,
        }))
    }

    fn output_shape(&self, input: &Shape) -> Shape {
        let mut dims = input.dims().to_vec();
        dims.push(self.config.output_dim);
        Shape::new(dims)
    }
}

impl Layer for Embedding {
    fn layer_class(&self) -> LayerClass {
        EMBEDDING
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, _input_shape: &Structure<Shape>) -> Result<()> {
        self.embeddings = Some(self.base.add_weight(
            "embeddings",
            [self.config.input_dim, self.config.output_dim],
            self.config.embeddings_initializer,
            true,
        )?);
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let indices = inputs.expect_single("Embedding")?.to_dense();
        let dtype = self.base.compute_dtype();
        let index = self.embeddings.context("Embedding table is missing")?;
        let table = self.base.weight(index)?.value().cast(dtype);
        let indices = indices.map(f64::trunc);
        Ok(Structure::Single(functional::take_rows(
            &table, &indices, dtype,
        )?))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let x = inputs.expect_single("Embedding")?;
        Ok(Structure::Single(SymbolicTensor::dense(
            self.output_shape(x.shape()),
            self.base.compute_dtype(),
        )))
    }

    fn compute_mask(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _previous_mask: Option<&SymbolicTensor>,
    ) -> Result<Option<SymbolicTensor>> {
        if !self.config.mask_zero {
            return Ok(None);
        }
        let x = inputs.expect_single("Embedding")?;
        Ok(Some(SymbolicTensor::dense(x.shape().clone(), DType::Bool)))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&EmbeddingConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
