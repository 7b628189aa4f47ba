pub mod cpu;

use std::sync::Arc;

pub use cpu::{CpuBackend, CpuBackendOptions};

/// Register the reference CPU backends with the global backend registry.
///
/// This function runs automatically through [`layerkit::backend::registry::BACKEND_REGISTRARS`],
/// but can also be called manually to ensure the backends are registered.
/// `"cpu"` has sparse and half-precision support; `"cpu-dense"` has neither.
pub fn register_cpu_backend() {
    layerkit::backend::register_backend("cpu", || Arc::new(CpuBackend::new()));
    layerkit::backend::register_backend("cpu-dense", || Arc::new(CpuBackend::dense()));
}

// Auto-register on library load
#[linkme::distributed_slice(layerkit::backend::registry::BACKEND_REGISTRARS)]
static REGISTER_CPU_BACKEND: fn() = register_cpu_backend;
