//! Backend capability contract and the runtime backend registry.
//!
//! Layers compute on host tensors; a backend supplies the capabilities that differ between
//! numerical runtimes: random tensor generation, dtype casts, host conversion, sparse
//! representations, and the execution modes available for compiled training steps.

pub mod registry;
pub mod spec;

pub use registry::{create_backend, default_backend, has_backend, list_backends, register_backend};
pub use spec::{Backend, BackendError, BackendResult, ExecutionMode};
