//! Minimal training: a one-layer [`Model`], SGD, and mean squared error.

mod loss;
mod optim;
mod trainer;

pub use loss::{Loss, MeanSquaredError};
pub use optim::{Optimizer, Sgd};
pub use trainer::{History, Model};
