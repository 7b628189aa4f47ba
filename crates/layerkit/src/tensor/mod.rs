//! Core tensor abstractions shared by layers, backends, and the conformance verifier.
//!
//! The tensor module defines dtypes, shapes, the host-resident [`Tensor`] (dense or sparse
//! COO storage), value-free [`SymbolicTensor`] placeholders, and the [`HostArray`] form used
//! when comparing numeric results on the host.

pub mod dtype;
mod host_array;
mod host_tensor;
pub mod shape;
mod sparse;
mod symbolic;

pub use dtype::DType;
pub use host_array::HostArray;
pub use host_tensor::Tensor;
pub use shape::Shape;
pub use sparse::SparseCoo;
pub use symbolic::{SymbolicTensor, TensorLike};
