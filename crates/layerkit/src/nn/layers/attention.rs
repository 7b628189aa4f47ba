//! Dot-product attention over keyword inputs `query`, `value`, and optional `key`.
//!
//! With `return_attention_scores` the output is a mapping `{output, scores}`.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use super::MODULE;
use crate::nn::{BaseConfig, CallKwargs, Initializer, Layer, LayerBase, SHAPE_SUFFIX};
use crate::ops::functional;
use crate::saving::{parse_config, to_config, Config, LayerClass, LayerContext, LAYER_CLASSES};
use crate::structure::Structure;
use crate::tensor::{Shape, SymbolicTensor, Tensor, TensorLike};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DotProductAttentionConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default)]
    use_scale: bool,
    #[serde(default)]
    return_attention_scores: bool,
}

pub struct DotProductAttention {
    base: LayerBase,
    config: DotProductAttentionConfig,
    scale: Option<usize>,
}

#[linkme::distributed_slice(LAYER_CLASSES)]
static DOT_PRODUCT_ATTENTION: LayerClass = LayerClass {
    module: MODULE,
    name: "DotProductAttention",
    from_config: DotProductAttention::from_config,
};

struct Operands<'a, T> {
    query: &'a T,
    key: &'a T,
    value: &'a T,
}

/// Pulls `query`/`value`/`key` out of a mapping, accepting `_shape`-suffixed keys.
fn operands<T>(inputs: &Structure<T>) -> Result<Operands<'_, T>> {
    if !inputs.is_mapping() {
        bail!(
            "DotProductAttention expects mapping inputs with 'query' and 'value', got a {}",
            inputs.kind()
        );
    }
    let entry = |name: &str| -> Result<Option<&T>> {
        match inputs.get_with_suffix(name, SHAPE_SUFFIX) {
            Some(item) => Ok(Some(item.expect_single("DotProductAttention")?)),
            None => Ok(None),
        }
    };
    let query = entry("query")?.context("DotProductAttention requires a 'query' input")?;
    let value = entry("value")?.context("DotProductAttention requires a 'value' input")?;
    let key = entry("key")?.unwrap_or(value);
    Ok(Operands { query, key, value })
}

fn check_rank3(name: &str, shape: &Shape) -> Result<()> {
    if shape.rank() != 3 {
        bail!("DotProductAttention {name} must be rank 3 [batch, steps, dim], got {shape}");
    }
    Ok(())
}

impl DotProductAttention {
    pub fn class() -> LayerClass {
        DOT_PRODUCT_ATTENTION
    }

    pub fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: DotProductAttentionConfig = parse_config("DotProductAttention", config)?;
        Ok(Box::new(DotProductAttention {
            base: LayerBase::new(&config.base, "dot_product_attention", ctx),
            config,
            scale: None,
        }))
    }

    fn output_specs<T: TensorLike>(&self, ops: &Operands<'_, T>) -> Result<(Shape, Shape)> {
        let (q, k, v) = (ops.query.shape(), ops.key.shape(), ops.value.shape());
        check_rank3("query", q)?;
        check_rank3("key", k)?;
        check_rank3("value", v)?;
        let (qd, kd, vd) = (q.dims(), k.dims(), v.dims());
        if qd[0] != kd[0] || kd[0] != vd[0] || kd[1] != vd[1] || qd[2] != kd[2] {
            bail!("incompatible attention shapes: query {q}, key {k}, value {v}");
        }
        Ok((
            Shape::new([qd[0], qd[1], vd[2]]),
            Shape::new([qd[0], qd[1], kd[1]]),
        ))
    }

    fn wrap<T>(output: T, scores: Option<T>) -> Structure<T> {
        match scores {
            Some(scores) => {
                let mut entries = BTreeMap::new();
                entries.insert("output".to_string(), Structure::Single(output));
                entries.insert("scores".to_string(), Structure::Single(scores));
                Structure::Mapping(entries)
            }
            None => Structure::Single(output),
        }
    }
}

impl Layer for DotProductAttention {
    fn layer_class(&self) -> LayerClass {
        DOT_PRODUCT_ATTENTION
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()> {
        let ops = operands(input_shape)?;
        for (name, shape) in [("query", ops.query), ("key", ops.key), ("value", ops.value)] {
            check_rank3(name, shape)?;
        }
        if self.config.use_scale {
            self.scale = Some(
                self.base
                    .add_weight("scale", Shape::scalar(), Initializer::Ones, true)?,
            );
        }
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let ops = operands(inputs)?;
        self.output_specs(&ops)?;
        let dtype = self.base.compute_dtype();
        let dim = ops.query.shape().last_dim().unwrap_or(1).max(1);
        let mut factor = 1.0 / (dim as f64).sqrt();
        if let Some(index) = self.scale {
            factor *= self.base.weight(index)?.value().cast(dtype).item()?;
        }
        let (query, key, value) = (ops.query.to_dense(), ops.key.to_dense(), ops.value.to_dense());
        let output = functional::dot_product_attention(&query, &key, &value, factor, dtype)?;
        let scores = if self.config.return_attention_scores {
            Some(functional::attention_scores(&query, &key, factor, dtype)?)
        } else {
            None
        };
        Ok(Self::wrap(output, scores))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        let ops = operands(inputs)?;
        let (output, scores) = self.output_specs(&ops)?;
        let dtype = self.base.compute_dtype();
        let scores = self
            .config
            .return_attention_scores
            .then(|| SymbolicTensor::dense(scores, dtype));
        Ok(Self::wrap(SymbolicTensor::dense(output, dtype), scores))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&DotProductAttentionConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}
