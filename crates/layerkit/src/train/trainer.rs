//! One-layer training container.
//!
//! Gradients are central finite differences of the full objective (compiled loss plus the
//! layer's accumulated loss terms) with respect to every trainable weight element. Graph mode
//! traces each distinct input signature once into the session's compiled-step cache.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;

use super::loss::Loss;
use super::optim::Optimizer;
use crate::backend::spec::{Backend, BackendError, ExecutionMode};
use crate::nn::{invoke, CallKwargs, Layer, Variable};
use crate::session::Session;
use crate::structure::Structure;
use crate::tensor::Tensor;

const FINITE_DIFFERENCE_EPS: f64 = 1e-3;

struct Compiled {
    optimizer: Box<dyn Optimizer>,
    loss: Box<dyn Loss>,
    mode: ExecutionMode,
}

/// Per-step loss values recorded by [`Model::fit`].
#[derive(Debug, Clone, Default)]
pub struct History {
    pub losses: Vec<f64>,
}

pub struct Model {
    layer: Box<dyn Layer>,
    backend: Arc<dyn Backend>,
    compiled: Option<Compiled>,
    steps: usize,
}

fn training_kwargs() -> CallKwargs {
    let mut kwargs = CallKwargs::new();
    kwargs.insert("training".to_string(), Value::Bool(true));
    kwargs
}

fn signature(layer: &dyn Layer, x: &Structure<Tensor>, y: &Structure<Tensor>) -> String {
    let describe = |s: &Structure<Tensor>| {
        s.flatten()
            .iter()
            .map(|t| {
                let sparse = if t.is_sparse() { ",sparse" } else { "" };
                format!("{}:{}{}", t.shape(), t.dtype(), sparse)
            })
            .collect::<Vec<_>>()
            .join(";")
    };
    format!("{}|{}|{}", layer.name(), describe(x), describe(y))
}

fn objective(
    layer: &mut dyn Layer,
    loss: &dyn Loss,
    x: &Structure<Tensor>,
    y: &Structure<Tensor>,
    kwargs: &CallKwargs,
) -> Result<f64> {
    let pred = invoke(layer, x, kwargs)?;
    let mut total = loss.compute(y, &pred)?;
    for term in layer.losses() {
        total += term.values().iter().sum::<f64>();
    }
    Ok(total)
}

impl Model {
    pub fn new(layer: Box<dyn Layer>, backend: Arc<dyn Backend>) -> Self {
        Model {
            layer,
            backend,
            compiled: None,
            steps: 0,
        }
    }

    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    /// Attaches an optimizer and loss; `Auto` is resolved against the backend here.
    pub fn compile(
        &mut self,
        optimizer: Box<dyn Optimizer>,
        loss: Box<dyn Loss>,
        mode: ExecutionMode,
    ) {
        let resolved = mode.resolve(self.backend.as_ref());
        tracing::debug!(
            optimizer = optimizer.name(),
            loss = loss.name(),
            requested = %mode,
            resolved = %resolved,
            backend = self.backend.backend_name(),
            "model compiled"
        );
        self.compiled = Some(Compiled {
            optimizer,
            loss,
            mode: resolved,
        });
    }

    /// Resolved execution mode, once compiled.
    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        self.compiled.as_ref().map(|c| c.mode)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Runs one optimisation step and returns the loss before the update.
    pub fn train_step(
        &mut self,
        session: &Session,
        x: &Structure<Tensor>,
        y: &Structure<Tensor>,
    ) -> Result<f64> {
        let compiled = self
            .compiled
            .as_mut()
            .context("model must be compiled before training")?;
        if compiled.mode == ExecutionMode::Graph {
            let has_sparse = x.flatten().iter().chain(y.flatten().iter()).any(|t| t.is_sparse());
            if has_sparse && !self.backend.supports_sparse_tracing() {
                return Err(BackendError::unsupported(
                    self.backend.backend_name(),
                    "tracing sparse tensors in graph mode",
                )
                .into());
            }
            let sig = signature(self.layer.as_ref(), x, y);
            if session.register_compiled_step(&sig) {
                tracing::debug!(signature = %sig, "traced train step");
            }
        }

        let kwargs = training_kwargs();
        let layer = self.layer.as_mut();
        let loss = compiled.loss.as_ref();
        let current = objective(layer, loss, x, y, &kwargs)?;

        let positions: Vec<usize> = layer
            .trainable_mask()
            .into_iter()
            .enumerate()
            .filter_map(|(i, trainable)| trainable.then_some(i))
            .collect();

        let mut grads = Vec::with_capacity(positions.len());
        for &position in &positions {
            let original = layer.weights()[position].value().values().into_owned();
            let mut grad = vec![0.0; original.len()];
            for (j, g) in grad.iter_mut().enumerate() {
                let mut probe = original.clone();
                probe[j] = original[j] + FINITE_DIFFERENCE_EPS;
                layer.weights_mut()[position].assign_values(&probe)?;
                let plus = objective(layer, loss, x, y, &kwargs)?;
                probe[j] = original[j] - FINITE_DIFFERENCE_EPS;
                layer.weights_mut()[position].assign_values(&probe)?;
                let minus = objective(layer, loss, x, y, &kwargs)?;
                *g = (plus - minus) / (2.0 * FINITE_DIFFERENCE_EPS);
            }
            layer.weights_mut()[position].assign_values(&original)?;
            grads.push(grad);
        }

        let mut params: Vec<&mut Variable> = layer
            .weights_mut()
            .into_iter()
            .enumerate()
            .filter(|(i, _)| positions.contains(i))
            .map(|(_, var)| var)
            .collect();
        compiled.optimizer.apply(&mut params, &grads)?;
        self.steps += 1;
        tracing::trace!(step = self.steps, loss = current, "train step");
        Ok(current)
    }

    /// Pulls `steps_per_epoch` batches from `data` and trains on each.
    pub fn fit<I>(&mut self, session: &Session, data: I, steps_per_epoch: usize) -> Result<History>
    where
        I: IntoIterator<Item = (Structure<Tensor>, Structure<Tensor>)>,
    {
        let mut history = History::default();
        let mut batches = data.into_iter();
        for step in 0..steps_per_epoch {
            let (x, y) = batches
                .next()
                .with_context(|| format!("data source exhausted after {step} steps"))?;
            history.losses.push(self.train_step(session, &x, &y)?);
        }
        Ok(history)
    }
}
