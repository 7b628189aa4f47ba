//! Layer abstractions and the built-in layer catalogue.
//!
//! A layer owns a [`LayerBase`] (name, dtype policy, weights, seed generators, losses) and
//! implements the [`Layer`] capability trait. [`invoke`] and [`invoke_symbolic`] are the
//! call paths that build a layer on first use and autocast its floating inputs.

pub mod activations;
pub mod initializers;
mod layer;
pub mod layers;
pub mod policy;
mod variable;

pub use activations::Activation;
pub use initializers::Initializer;
pub use layer::{
    build_layer, invoke, invoke_symbolic, is_training, BaseConfig, CallKwargs, Layer, LayerBase,
    SHAPE_SUFFIX,
};
pub use policy::DTypePolicy;
pub use variable::{SeedGenerator, Variable};
