//! Returns its inputs unchanged, preserving structure and sparsity.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Layer, LayerBase};
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityConfig {
    #[serde(flatten)]
    base: BaseConfig,
}

pub struct Identity {
    base: LayerBase,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static IDENTITY: LayerClass = LayerClass {
    module: MODULE,
    name: "Identity",
    from_config: Identity::from_config,
};

impl Identity {
    pub fn class() -> LayerClass {
        IDENTITY
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: IdentityConfig = parse_config("Identity", config)?;
        let mut base = LayerBase::new(&config.base, "identity", ctx);
        base.set_supports_masking(true);
        Ok(Box::new(Identity { base }))
    }
}

impl Layer for Identity {
    fn layer_class(&self) -> LayerClass {
        IDENTITY
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
        Ok(inputs.clone())
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        Ok(inputs.clone())
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&IdentityConfig {
            base: self.base.base_config(),
        })
    }
}
