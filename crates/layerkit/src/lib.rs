extern crate self as layerkit;

pub use linkme;

pub mod backend;
mod env;
pub mod nn;
pub mod ops;
pub mod saving;
pub mod session;
pub mod structure;
pub mod tensor;
pub mod testing;
pub mod train;

pub use backend::spec::Backend;
pub use nn::{Layer, LayerBase};
pub use session::Session;
pub use structure::Structure;
pub use tensor::{DType, Shape, SymbolicTensor, Tensor};
