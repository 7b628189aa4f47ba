use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use super::comparators;
use super::error::{ConformanceError, ConformanceResult};
use super::tolerance::Tolerance;
use super::IntoHostArray;
use crate::backend::registry::default_backend;
use crate::backend::spec::Backend;
use crate::nn::Layer;
use crate::saving::{
    canonical_json, deserialize_layer, serialize_layer, Config, LayerClass, LayerContext,
    ObjectRegistry,
};
use crate::session::Session;
use crate::structure::Structure;

/// Attribute the serialization check ignores when comparing instances.
const ANNOTATIONS_ATTRIBUTE: &str = "__annotations__";

/// Per-test verification context.
///
/// Construction performs the set-up every independent test needs: the session is reset, the
/// backend's caches are cleared, and traceback filtering is disabled. Scratch directories
/// handed out by [`TestCase::get_temp_dir`] are removed when the case is dropped.
pub struct TestCase {
    name: String,
    session: Session,
    backend: Arc<dyn Backend>,
    registry: ObjectRegistry,
    temp_dirs: Mutex<Vec<TempDir>>,
}

impl TestCase {
    /// Creates a case on the default backend (`LAYERKIT_BACKEND`).
    pub fn new(name: impl Into<String>) -> ConformanceResult<Self> {
        Ok(Self::with_backend(name, default_backend()?))
    }

    pub fn with_backend(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        let case = TestCase {
            name: name.into(),
            session: Session::new(),
            backend,
            registry: ObjectRegistry::new(),
            temp_dirs: Mutex::new(Vec::new()),
        };
        case.set_up();
        case
    }

    fn set_up(&self) {
        self.session.reset();
        self.backend.clear_caches();
        if self.session.traceback_filtering_enabled() {
            self.session.set_traceback_filtering(false);
        }
        tracing::debug!(test = %self.name, backend = self.backend.backend_name(), "test case set up");
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn registry(&self) -> &ObjectRegistry {
        &self.registry
    }

    /// Renders a failure for reports. Collaborator errors keep their whole cause chain unless
    /// traceback filtering has been re-enabled on the session.
    pub fn format_error(&self, err: &ConformanceError) -> String {
        match err {
            ConformanceError::Collaborator(inner) => self.session.format_error(inner),
            other => other.to_string(),
        }
    }

    /// Layer construction context scoped with `custom_objects`.
    pub(crate) fn scoped_registry(&self, custom_objects: &BTreeMap<String, LayerClass>) -> ObjectRegistry {
        self.registry.with_custom_objects(custom_objects)
    }

    /// Instantiates `class` from `config` against this case's session.
    pub fn instantiate(
        &self,
        class: LayerClass,
        config: &Config,
    ) -> ConformanceResult<Box<dyn Layer>> {
        let ctx = LayerContext::new(&self.session, &self.registry);
        Ok(class.instantiate(config, &ctx)?)
    }

    /// Creates a scratch directory removed when the case is dropped.
    pub fn get_temp_dir(&self) -> ConformanceResult<PathBuf> {
        let dir = TempDir::new().map_err(anyhow::Error::from)?;
        let path = dir.path().to_path_buf();
        let mut dirs = match self.temp_dirs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        dirs.push(dir);
        Ok(path)
    }

    /// Close-equality tolerance for this case, after config-file overrides.
    pub fn tolerance(&self) -> ConformanceResult<Tolerance> {
        Tolerance::resolve(self.backend.backend_name(), &self.name)
    }

    pub fn assert_all_close<A, B>(&self, x1: &A, x2: &B) -> ConformanceResult<()>
    where
        A: IntoHostArray + ?Sized,
        B: IntoHostArray + ?Sized,
    {
        let t = self.tolerance()?;
        self.assert_all_close_with(x1, x2, t.atol, t.rtol)
    }

    pub fn assert_all_close_with<A, B>(
        &self,
        x1: &A,
        x2: &B,
        atol: f64,
        rtol: f64,
    ) -> ConformanceResult<()>
    where
        A: IntoHostArray + ?Sized,
        B: IntoHostArray + ?Sized,
    {
        comparators::assert_all_close(self.backend.as_ref(), x1, x2, atol, rtol)
    }

    pub fn assert_not_all_close<A, B>(&self, x1: &A, x2: &B) -> ConformanceResult<()>
    where
        A: IntoHostArray + ?Sized,
        B: IntoHostArray + ?Sized,
    {
        let t = self.tolerance()?;
        self.assert_not_all_close_with(x1, x2, t.atol, t.rtol)
    }

    pub fn assert_not_all_close_with<A, B>(
        &self,
        x1: &A,
        x2: &B,
        atol: f64,
        rtol: f64,
    ) -> ConformanceResult<()>
    where
        A: IntoHostArray + ?Sized,
        B: IntoHostArray + ?Sized,
    {
        comparators::assert_not_all_close(self.backend.as_ref(), x1, x2, atol, rtol)
    }

    pub fn assert_almost_equal<A, B>(&self, x1: &A, x2: &B, decimal: i32) -> ConformanceResult<()>
    where
        A: IntoHostArray + ?Sized,
        B: IntoHostArray + ?Sized,
    {
        comparators::assert_almost_equal(self.backend.as_ref(), x1, x2, decimal)
    }

    pub fn assert_all_equal<A, B>(&self, x1: &Structure<A>, x2: &Structure<B>) -> ConformanceResult<()>
    where
        A: IntoHostArray,
        B: IntoHostArray,
    {
        comparators::assert_all_equal(self.backend.as_ref(), x1, x2)
    }

    pub fn assert_len(&self, actual: usize, expected: usize, what: &str) -> ConformanceResult<()> {
        comparators::assert_len(actual, expected, what)
    }

    /// Round-trips `instance` through its plain config and its fully-typed serialized form,
    /// requiring identical canonical configs and attribute sets. Returns the last revived
    /// instance.
    pub fn run_class_serialization_test(
        &self,
        instance: &dyn Layer,
        custom_objects: &BTreeMap<String, LayerClass>,
    ) -> ConformanceResult<Box<dyn Layer>> {
        let registry = self.scoped_registry(custom_objects);
        let ctx = LayerContext::new(&self.session, &registry);
        let class = instance.layer_class();
        let config = instance.get_config()?;
        let config_json = canonical_json(&Value::Object(config.clone()))?;
        let ref_attributes = instance.attribute_names()?;

        let revived = class.instantiate(&config, &ctx)?;
        let revived_config = revived.get_config()?;
        compare_configs("get_config round trip", &config, &config_json, &revived_config)?;
        compare_attributes(&ref_attributes, &revived.attribute_names()?)?;

        let serialized = serialize_layer(instance)?;
        let serialized_json = canonical_json(&serialized)?;
        let parsed: Value = serde_json::from_str(&serialized_json).map_err(anyhow::Error::from)?;
        let revived = deserialize_layer(&parsed, &ctx)?;
        let revived_config = revived.get_config()?;
        compare_configs("serialization round trip", &config, &config_json, &revived_config)?;
        compare_attributes(&ref_attributes, &revived.attribute_names()?)?;
        tracing::debug!(class = class.name, "serialization round trip passed");
        Ok(revived)
    }
}

fn compare_configs(
    what: &str,
    original: &Config,
    original_json: &str,
    revived: &Config,
) -> ConformanceResult<()> {
    let revived_json = canonical_json(&Value::Object(revived.clone()))?;
    if revived_json == original_json {
        return Ok(());
    }
    let keys: BTreeSet<&String> = original.keys().chain(revived.keys()).collect();
    let differing: Vec<&String> = keys
        .into_iter()
        .filter(|key| original.get(*key) != revived.get(*key))
        .collect();
    Err(ConformanceError::Config(format!(
        "{what} changed the config; differing keys: {differing:?}\noriginal: {original_json}\nrevived: {revived_json}"
    )))
}

fn compare_attributes(
    original: &BTreeSet<String>,
    revived: &BTreeSet<String>,
) -> ConformanceResult<()> {
    let strip = |set: &BTreeSet<String>| -> BTreeSet<String> {
        set.iter()
            .filter(|name| name.as_str() != ANNOTATIONS_ATTRIBUTE)
            .cloned()
            .collect()
    };
    let (original, revived) = (strip(original), strip(revived));
    if original == revived {
        return Ok(());
    }
    let missing: Vec<&String> = original.difference(&revived).collect();
    let extra: Vec<&String> = revived.difference(&original).collect();
    Err(ConformanceError::Config(format!(
        "revived instance exposes different attributes; missing: {missing:?}, extra: {extra:?}"
    )))
}
