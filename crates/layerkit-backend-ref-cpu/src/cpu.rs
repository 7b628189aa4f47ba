use std::sync::{Mutex, MutexGuard};

use layerkit::backend::spec::{Backend, BackendError, BackendResult, ExecutionMode};
use layerkit::tensor::{DType, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_SEED: u64 = 0;

/// Capability profile of a [`CpuBackend`].
#[derive(Debug, Clone)]
pub struct CpuBackendOptions {
    pub name: String,
    pub sparse: bool,
    pub sparse_tracing: bool,
    pub mixed_precision: bool,
    pub auto_mode: ExecutionMode,
    pub seed: u64,
}

impl Default for CpuBackendOptions {
    fn default() -> Self {
        Self {
            name: "cpu".to_string(),
            sparse: true,
            sparse_tracing: false,
            mixed_precision: true,
            auto_mode: ExecutionMode::Graph,
            seed: DEFAULT_SEED,
        }
    }
}

impl CpuBackendOptions {
    /// Dense-only profile without half-precision kernels that runs eagerly.
    pub fn dense() -> Self {
        Self {
            name: "cpu-dense".to_string(),
            sparse: false,
            sparse_tracing: false,
            mixed_precision: false,
            auto_mode: ExecutionMode::Eager,
            seed: DEFAULT_SEED,
        }
    }
}

/// Host-memory backend; every capability flag comes from its [`CpuBackendOptions`].
pub struct CpuBackend {
    options: CpuBackendOptions,
    rng: Mutex<StdRng>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_options(CpuBackendOptions::default())
    }

    pub fn dense() -> Self {
        Self::with_options(CpuBackendOptions::dense())
    }

    pub fn with_options(options: CpuBackendOptions) -> Self {
        let rng = Mutex::new(StdRng::seed_from_u64(options.seed));
        Self { options, rng }
    }

    pub fn options(&self) -> &CpuBackendOptions {
        &self.options
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn backend_name(&self) -> &str {
        &self.options.name
    }

    fn supports_sparse(&self) -> bool {
        self.options.sparse
    }

    fn supports_sparse_tracing(&self) -> bool {
        self.options.sparse && self.options.sparse_tracing
    }

    fn supports_mixed_precision(&self) -> bool {
        self.options.mixed_precision
    }

    fn auto_execution_mode(&self) -> ExecutionMode {
        self.options.auto_mode
    }

    fn random_uniform(
        &self,
        shape: &Shape,
        dtype: DType,
        minval: f64,
        maxval: f64,
    ) -> BackendResult<Tensor> {
        if minval.is_nan() || maxval.is_nan() || minval >= maxval {
            return Err(BackendError::execution(format!(
                "random_uniform requires minval < maxval, got [{minval}, {maxval})"
            )));
        }
        let mut rng = self.rng();
        let values = (0..shape.num_elements())
            .map(|_| rng.gen_range(minval..maxval))
            .collect();
        Tensor::from_values(shape.clone(), dtype, values)
            .map_err(|err| BackendError::execution(err.to_string()))
    }

    fn clear_caches(&self) {
        *self.rng() = StdRng::seed_from_u64(self.options.seed);
        tracing::trace!(backend = %self.options.name, "cpu backend caches cleared");
    }
}
