//! Host-side reference kernels used by the built-in layers.
//!
//! Kernels accept dense or sparse tensors (sparse operands are scattered first) and return
//! dense tensors rounded to the requested dtype.

pub mod functional;

pub use functional::*;
