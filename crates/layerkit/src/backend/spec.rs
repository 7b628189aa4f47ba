//! The capability interface every backend implements.

use std::fmt;

use thiserror::Error;

use crate::tensor::{DType, HostArray, Shape, Tensor};

/// Errors reported by backend capabilities.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{capability} is unsupported with backend {backend}")]
    Unsupported {
        backend: String,
        capability: &'static str,
    },
    #[error("backend execution failed: {message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn unsupported(backend: impl Into<String>, capability: &'static str) -> Self {
        BackendError::Unsupported {
            backend: backend.into(),
            capability,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// How a compiled training step is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Let the backend pick (see [`Backend::auto_execution_mode`]).
    #[default]
    Auto,
    /// Run every step op-by-op without tracing.
    Eager,
    /// Trace the step once and reuse the compiled form.
    Graph,
}

impl ExecutionMode {
    /// Maps `Auto` to the mode the backend reports; explicit modes are returned unchanged.
    pub fn resolve(self, backend: &dyn Backend) -> ExecutionMode {
        match self {
            ExecutionMode::Auto => match backend.auto_execution_mode() {
                ExecutionMode::Auto => ExecutionMode::Eager,
                mode => mode,
            },
            mode => mode,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Auto => "auto",
            ExecutionMode::Eager => "eager",
            ExecutionMode::Graph => "graph",
        };
        f.write_str(name)
    }
}

/// Capability interface implemented by numerical backends.
///
/// Callers never branch on [`Backend::backend_name`]; every behavioural difference is
/// reported through a capability query.
pub trait Backend: Send + Sync {
    /// Returns a human-readable backend identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Whether the backend has a native sparse tensor representation.
    fn supports_sparse(&self) -> bool;

    /// Whether sparse tensors can flow through graph-mode tracing.
    fn supports_sparse_tracing(&self) -> bool {
        false
    }

    /// Whether half-precision compute kernels are available on the current device.
    fn supports_mixed_precision(&self) -> bool;

    /// Mode that [`ExecutionMode::Auto`] resolves to.
    fn auto_execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Eager
    }

    /// Samples a dense tensor uniformly from `[minval, maxval)`.
    fn random_uniform(
        &self,
        shape: &Shape,
        dtype: DType,
        minval: f64,
        maxval: f64,
    ) -> BackendResult<Tensor>;

    /// Elementwise dtype conversion.
    fn cast(&self, tensor: &Tensor, dtype: DType) -> BackendResult<Tensor> {
        Ok(tensor.cast(dtype))
    }

    /// Reads a tensor back into its dense host form.
    fn to_host(&self, tensor: &Tensor) -> BackendResult<HostArray> {
        Ok(tensor.to_host_array())
    }

    /// Converts a dense tensor into the backend's sparse representation.
    fn sparse_from_dense(&self, dense: &Tensor) -> BackendResult<Tensor> {
        if !self.supports_sparse() {
            return Err(BackendError::unsupported(self.backend_name(), "sparse"));
        }
        Ok(dense.to_sparse())
    }

    /// Drops cached compilation artifacts and reseeds internal generators.
    fn clear_caches(&self) {}
}
