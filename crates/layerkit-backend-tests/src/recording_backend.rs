use std::sync::{Arc, Mutex, MutexGuard};

use layerkit::backend::spec::{Backend, BackendResult, ExecutionMode};
use layerkit::tensor::{DType, HostArray, Shape, Tensor};

/// Test-only backend that forwards to an inner backend and records every capability query.
pub struct RecordingBackend {
    inner: Arc<dyn Backend>,
    queries: Mutex<Vec<&'static str>>,
}

impl RecordingBackend {
    pub fn new(inner: Arc<dyn Backend>) -> Self {
        Self {
            inner,
            queries: Mutex::new(Vec::new()),
        }
    }

    fn log(&self) -> MutexGuard<'_, Vec<&'static str>> {
        match self.queries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record(&self, query: &'static str) {
        self.log().push(query);
    }

    pub fn recorded_queries(&self) -> Vec<&'static str> {
        self.log().clone()
    }

    pub fn was_queried(&self, query: &str) -> bool {
        self.log().iter().any(|q| *q == query)
    }
}

impl Backend for RecordingBackend {
    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn supports_sparse(&self) -> bool {
        self.record("supports_sparse");
        self.inner.supports_sparse()
    }

    fn supports_sparse_tracing(&self) -> bool {
        self.record("supports_sparse_tracing");
        self.inner.supports_sparse_tracing()
    }

    fn supports_mixed_precision(&self) -> bool {
        self.record("supports_mixed_precision");
        self.inner.supports_mixed_precision()
    }

    fn auto_execution_mode(&self) -> ExecutionMode {
        self.record("auto_execution_mode");
        self.inner.auto_execution_mode()
    }

    fn random_uniform(
        &self,
        shape: &Shape,
        dtype: DType,
        minval: f64,
        maxval: f64,
    ) -> BackendResult<Tensor> {
        self.inner.random_uniform(shape, dtype, minval, maxval)
    }

    fn cast(&self, tensor: &Tensor, dtype: DType) -> BackendResult<Tensor> {
        self.inner.cast(tensor, dtype)
    }

    fn to_host(&self, tensor: &Tensor) -> BackendResult<HostArray> {
        self.inner.to_host(tensor)
    }

    fn sparse_from_dense(&self, dense: &Tensor) -> BackendResult<Tensor> {
        self.record("sparse_from_dense");
        self.inner.sparse_from_dense(dense)
    }

    fn clear_caches(&self) {
        self.inner.clear_caches();
    }
}
