use std::collections::BTreeSet;

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::initializers::Initializer;
use super::policy::DTypePolicy;
use super::variable::{SeedGenerator, Variable};
use crate::saving::{Config, LayerClass, LayerContext};
use crate::structure::Structure;
use crate::tensor::{DType, Shape, SymbolicTensor, Tensor, TensorLike};

/// Extra keyword arguments passed to `call` alongside the inputs.
pub type CallKwargs = Config;

/// Suffix carried by mapping keys of build-time shape structures (`query` -> `query_shape`).
pub const SHAPE_SUFFIX: &str = "_shape";

/// Reads the `training` call argument; absent means inference.
pub fn is_training(kwargs: &CallKwargs) -> bool {
    kwargs
        .get("training")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn default_trainable() -> bool {
    true
}

/// Constructor arguments shared by every layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_trainable")]
    pub trainable: bool,
    #[serde(default)]
    pub dtype: Option<DTypePolicy>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            name: None,
            trainable: true,
            dtype: None,
        }
    }
}

/// State every layer carries: identity, numeric policy, weights, and per-call losses.
#[derive(Debug, Clone)]
pub struct LayerBase {
    name: String,
    policy: DTypePolicy,
    trainable: bool,
    built: bool,
    supports_masking: bool,
    weights: Vec<Variable>,
    seed_generators: Vec<SeedGenerator>,
    losses: Vec<Tensor>,
    init_seed: u64,
}

impl LayerBase {
    /// Resolves the name (unique per `prefix` within the session when unset) and policy.
    pub fn new(config: &BaseConfig, prefix: &str, ctx: &LayerContext<'_>) -> Self {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| ctx.session.unique_name(prefix));
        Self {
            name,
            policy: config.dtype.clone().unwrap_or_default(),
            trainable: config.trainable,
            built: false,
            supports_masking: false,
            weights: Vec::new(),
            seed_generators: Vec::new(),
            losses: Vec::new(),
            init_seed: ctx.session.next_seed(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &DTypePolicy {
        &self.policy
    }

    pub fn compute_dtype(&self) -> DType {
        self.policy.compute_dtype()
    }

    pub fn variable_dtype(&self) -> DType {
        self.policy.variable_dtype()
    }

    pub fn trainable(&self) -> bool {
        self.trainable
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn mark_built(&mut self) {
        self.built = true;
    }

    pub fn supports_masking(&self) -> bool {
        self.supports_masking
    }

    pub fn set_supports_masking(&mut self, supports: bool) {
        self.supports_masking = supports;
    }

    /// Creates a weight in the policy's variable dtype and returns its index.
    pub fn add_weight(
        &mut self,
        name: &str,
        shape: impl Into<Shape>,
        initializer: Initializer,
        trainable: bool,
    ) -> Result<usize> {
        let shape = shape.into();
        let index = self.weights.len();
        let mut rng = StdRng::seed_from_u64(self.init_seed.wrapping_add(index as u64));
        let value = initializer
            .sample(&shape, self.variable_dtype(), &mut rng)
            .with_context(|| format!("failed to initialise weight '{name}' of {}", self.name))?;
        self.weights.push(Variable::new(name, value, trainable));
        Ok(index)
    }

    pub fn weight(&self, index: usize) -> Result<&Variable> {
        self.weights
            .get(index)
            .ok_or_else(|| anyhow!("layer '{}' has no weight #{index}", self.name))
    }

    pub fn weights(&self) -> &[Variable] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [Variable] {
        &mut self.weights
    }

    /// Registers a seed generator derived from the layer's init seed; returns its index.
    pub fn add_seed_generator(&mut self, seed: Option<u64>) -> Result<usize> {
        let index = self.seed_generators.len();
        let seed = seed.unwrap_or_else(|| self.init_seed.rotate_left(17) ^ index as u64);
        let name = format!("{}_seed_generator_state", self.name);
        self.seed_generators.push(SeedGenerator::new(name, seed)?);
        Ok(index)
    }

    pub fn seed_generator_mut(&mut self, index: usize) -> Result<&mut SeedGenerator> {
        let name = &self.name;
        self.seed_generators
            .get_mut(index)
            .ok_or_else(|| anyhow!("layer '{name}' has no seed generator #{index}"))
    }

    pub fn seed_generators(&self) -> &[SeedGenerator] {
        &self.seed_generators
    }

    pub fn add_loss(&mut self, loss: Tensor) {
        self.losses.push(loss);
    }

    pub fn clear_losses(&mut self) {
        self.losses.clear();
    }

    pub fn losses(&self) -> &[Tensor] {
        &self.losses
    }

    /// Config fields owned by the base, with the resolved name and policy.
    pub fn base_config(&self) -> BaseConfig {
        BaseConfig {
            name: Some(self.name.clone()),
            trainable: self.trainable,
            dtype: Some(self.policy.clone()),
        }
    }
}

const BASE_ATTRIBUTES: &[&str] = &[
    "build",
    "built",
    "call",
    "compute_mask",
    "compute_output_spec",
    "dtype_policy",
    "get_config",
    "losses",
    "name",
    "non_trainable_variables",
    "non_trainable_weights",
    "seed_generators",
    "supports_masking",
    "trainable",
    "trainable_weights",
    "weights",
];

/// Capability interface every layer exposes.
///
/// Implementors provide construction-time state through [`LayerBase`] and the four required
/// behaviours (`build`, `call`, `compute_output_spec`, `get_config`); collection accessors
/// have defaults derived from the base.
pub trait Layer: Send {
    fn layer_class(&self) -> LayerClass;

    fn base(&self) -> &LayerBase;

    fn base_mut(&mut self) -> &mut LayerBase;

    /// Creates weights for the given input shapes. Mapping keys carry [`SHAPE_SUFFIX`].
    fn build(&mut self, input_shape: &Structure<Shape>) -> Result<()>;

    /// Eager computation on inputs already autocast to the compute dtype.
    fn call(&mut self, inputs: &Structure<Tensor>, kwargs: &CallKwargs)
        -> Result<Structure<Tensor>>;

    /// Shape/dtype/sparsity inference without touching values.
    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>>;

    fn get_config(&self) -> Result<Config>;

    /// Output mask for `inputs`; the default passes `previous_mask` through.
    fn compute_mask(
        &self,
        inputs: &Structure<SymbolicTensor>,
        previous_mask: Option<&SymbolicTensor>,
    ) -> Result<Option<SymbolicTensor>> {
        let _ = inputs;
        Ok(previous_mask.cloned())
    }

    fn name(&self) -> &str {
        self.base().name()
    }

    fn is_built(&self) -> bool {
        self.base().is_built()
    }

    fn supports_masking(&self) -> bool {
        self.base().supports_masking()
    }

    fn dtype_policy(&self) -> &DTypePolicy {
        self.base().policy()
    }

    fn weights(&self) -> Vec<&Variable> {
        self.base().weights().iter().collect()
    }

    fn weights_mut(&mut self) -> Vec<&mut Variable> {
        self.base_mut().weights_mut().iter_mut().collect()
    }

    fn trainable_weights(&self) -> Vec<&Variable> {
        if !self.base().trainable() {
            return Vec::new();
        }
        self.weights().into_iter().filter(|w| w.trainable()).collect()
    }

    /// One flag per entry of [`Layer::weights`], set for the entries the optimizer updates.
    fn trainable_mask(&self) -> Vec<bool> {
        let trainable = self.base().trainable();
        self.weights()
            .into_iter()
            .map(|w| trainable && w.trainable())
            .collect()
    }

    fn non_trainable_weights(&self) -> Vec<&Variable> {
        if !self.base().trainable() {
            return self.weights();
        }
        self.weights().into_iter().filter(|w| !w.trainable()).collect()
    }

    /// Non-trainable weights plus seed generator states.
    fn non_trainable_variables(&self) -> Vec<&Variable> {
        let mut out = self.non_trainable_weights();
        out.extend(self.seed_generators().into_iter().map(SeedGenerator::state));
        out
    }

    fn seed_generators(&self) -> Vec<&SeedGenerator> {
        self.base().seed_generators().iter().collect()
    }

    fn losses(&self) -> Vec<&Tensor> {
        self.base().losses().iter().collect()
    }

    /// Names of the attributes an instance exposes: the base surface, its config keys, and
    /// its weight names.
    fn attribute_names(&self) -> Result<BTreeSet<String>> {
        let mut names: BTreeSet<String> = BASE_ATTRIBUTES.iter().map(|s| s.to_string()).collect();
        names.extend(self.get_config()?.keys().cloned());
        names.extend(self.weights().iter().map(|w| w.name().to_string()));
        Ok(names)
    }
}

/// Runs the explicit build step and marks the layer built.
pub fn build_layer(layer: &mut dyn Layer, input_shape: &Structure<Shape>) -> Result<()> {
    layer
        .build(input_shape)
        .with_context(|| format!("failed to build layer '{}'", layer.name()))?;
    layer.base_mut().mark_built();
    tracing::trace!(layer = layer.name(), weights = layer.weights().len(), "layer built");
    Ok(())
}

fn build_shapes<T: TensorLike>(inputs: &Structure<T>) -> Structure<Shape> {
    inputs
        .map(|t| t.shape().clone())
        .add_key_suffix(SHAPE_SUFFIX)
}

fn autocast_dtype(dtype: DType, compute: DType) -> DType {
    if dtype.is_float() {
        compute
    } else {
        dtype
    }
}

/// Eager call path: build on first use, reset per-call losses, autocast floating inputs.
pub fn invoke(
    layer: &mut dyn Layer,
    inputs: &Structure<Tensor>,
    kwargs: &CallKwargs,
) -> Result<Structure<Tensor>> {
    if !layer.is_built() {
        build_layer(layer, &build_shapes(inputs))?;
    }
    layer.base_mut().clear_losses();
    let compute = layer.dtype_policy().compute_dtype();
    let inputs = inputs.map(|t| {
        let target = autocast_dtype(t.dtype(), compute);
        if target == t.dtype() {
            t.clone()
        } else {
            t.cast(target)
        }
    });
    layer
        .call(&inputs, kwargs)
        .with_context(|| format!("call to layer '{}' failed", layer.name()))
}

/// Symbolic call path on placeholders; builds the layer exactly like [`invoke`].
pub fn invoke_symbolic(
    layer: &mut dyn Layer,
    inputs: &Structure<SymbolicTensor>,
    kwargs: &CallKwargs,
) -> Result<Structure<SymbolicTensor>> {
    if !layer.is_built() {
        build_layer(layer, &build_shapes(inputs))?;
    }
    let compute = layer.dtype_policy().compute_dtype();
    let inputs = inputs.map(|t| t.with_dtype(autocast_dtype(t.dtype(), compute)));
    layer
        .compute_output_spec(&inputs, kwargs)
        .with_context(|| format!("symbolic call to layer '{}' failed", layer.name()))
}
