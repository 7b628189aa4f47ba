//! Runtime backend registry for dynamic backend selection.
//!
//! This module enables registering and selecting backends by name at runtime, avoiding
//! hardcoded backend types in test suites. Backends register themselves either by calling
//! [`register_backend`] or by adding a registrar to [`BACKEND_REGISTRARS`].

use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock, RwLock};

use anyhow::{anyhow, Result};

use super::spec::Backend;

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn Backend> + Send + Sync>;

/// Registration hooks contributed by backend crates at link time.
#[linkme::distributed_slice]
pub static BACKEND_REGISTRARS: [fn()] = [..];

/// Global backend registry mapping backend names to constructors.
struct BackendRegistry {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendRegistry {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        let mut backends = match self.backends.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        backends.insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn Backend>> {
        let backends = match self.backends.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        backends.get(name).map(|constructor| constructor())
    }

    fn contains(&self, name: &str) -> bool {
        let backends = match self.backends.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        backends.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        let backends = match self.backends.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut names: Vec<String> = backends.keys().cloned().collect();
        names.sort();
        names
    }
}

static GLOBAL_REGISTRY: OnceLock<BackendRegistry> = OnceLock::new();
static RUN_REGISTRARS: Once = Once::new();

fn registry() -> &'static BackendRegistry {
    GLOBAL_REGISTRY.get_or_init(BackendRegistry::new)
}

/// Registry with every linked registrar applied.
fn global_registry() -> &'static BackendRegistry {
    let registry = registry();
    RUN_REGISTRARS.call_once(|| {
        for registrar in BACKEND_REGISTRARS {
            registrar();
        }
    });
    registry
}

/// Register a backend by name with a constructor function.
///
/// The constructor is called each time the backend is requested via [`create_backend`].
pub fn register_backend<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn Backend> + Send + Sync + 'static,
{
    let name = name.into();
    tracing::debug!(backend = %name, "registering backend");
    registry().register(name, Box::new(constructor));
}

/// Create a backend instance by name.
///
/// Returns `None` if no backend with the given name has been registered.
pub fn create_backend(name: &str) -> Option<Arc<dyn Backend>> {
    global_registry().create(name)
}

/// List all registered backend names in sorted order.
pub fn list_backends() -> Vec<String> {
    global_registry().names()
}

/// Check if a backend with the given name is registered.
pub fn has_backend(name: &str) -> bool {
    global_registry().contains(name)
}

/// Creates the backend selected by `LAYERKIT_BACKEND` (default `"cpu"`).
pub fn default_backend() -> Result<Arc<dyn Backend>> {
    let name = crate::env::backend_name();
    create_backend(name).ok_or_else(|| {
        anyhow!(
            "backend '{name}' is not registered (available: {:?})",
            list_backends()
        )
    })
}
