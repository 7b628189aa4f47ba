use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};

use super::Config;
use crate::nn::Layer;
use crate::session::Session;

/// Builds a layer instance from its plain configuration.
pub type FromConfigFn = fn(&Config, &LayerContext<'_>) -> Result<Box<dyn Layer>>;

/// Class reference: identity plus the from-configuration constructor.
#[derive(Clone, Copy)]
pub struct LayerClass {
    pub module: &'static str,
    pub name: &'static str,
    pub from_config: FromConfigFn,
}

impl LayerClass {
    /// Constructs a fresh instance from `config`.
    pub fn instantiate(&self, config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        (self.from_config)(config, ctx)
    }

    /// Whether the class ships with the crate's built-in catalogue.
    pub fn is_builtin(&self) -> bool {
        LAYER_CLASSES
            .iter()
            .any(|class| class.module == self.module && class.name == self.name)
    }

    /// Name recorded in the serialized form: the bare class name for built-ins,
    /// `module>Name` otherwise.
    pub fn registered_name(&self) -> String {
        if self.is_builtin() {
            self.name.to_string()
        } else {
            format!("{}>{}", self.module, self.name)
        }
    }
}

impl PartialEq for LayerClass {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module && self.name == other.name
    }
}

impl Eq for LayerClass {}

impl fmt::Debug for LayerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerClass")
            .field("module", &self.module)
            .field("name", &self.name)
            .finish()
    }
}

/// Built-in layer classes, collected at link time.
#[linkme::distributed_slice]
pub static LAYER_CLASSES: [LayerClass] = [..];

/// Ambient state handed to layer constructors.
#[derive(Clone, Copy)]
pub struct LayerContext<'a> {
    pub session: &'a Session,
    pub registry: &'a ObjectRegistry,
}

impl<'a> LayerContext<'a> {
    pub fn new(session: &'a Session, registry: &'a ObjectRegistry) -> Self {
        Self { session, registry }
    }
}

/// Resolves class names to [`LayerClass`] entries.
///
/// Custom objects shadow built-ins and are looked up by registered name first, then by class
/// name.
#[derive(Debug, Clone, Default)]
pub struct ObjectRegistry {
    custom: BTreeMap<String, LayerClass>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin(name: &str) -> Option<LayerClass> {
        LAYER_CLASSES.iter().find(|class| class.name == name).copied()
    }

    pub fn register(&mut self, name: impl Into<String>, class: LayerClass) {
        let name = name.into();
        tracing::debug!(name = %name, module = class.module, "registering custom layer class");
        self.custom.insert(name, class);
    }

    /// Returns a copy of the registry with `objects` layered on top.
    pub fn with_custom_objects(&self, objects: &BTreeMap<String, LayerClass>) -> ObjectRegistry {
        let mut scoped = self.clone();
        for (name, class) in objects {
            scoped.custom.insert(name.clone(), *class);
        }
        scoped
    }

    pub fn custom_objects(&self) -> &BTreeMap<String, LayerClass> {
        &self.custom
    }

    pub fn lookup(&self, class_name: &str, registered_name: Option<&str>) -> Option<LayerClass> {
        registered_name
            .and_then(|name| self.custom.get(name))
            .or_else(|| self.custom.get(class_name))
            .copied()
            .or_else(|| Self::builtin(class_name))
    }

    /// Like [`ObjectRegistry::lookup`] but fails with a descriptive error.
    pub fn resolve(&self, class_name: &str, registered_name: Option<&str>) -> Result<LayerClass> {
        self.lookup(class_name, registered_name).ok_or_else(|| {
            anyhow!(
                "could not locate class '{class_name}'; custom classes must be passed via custom objects (registered: {:?})",
                self.custom.keys().collect::<Vec<_>>()
            )
        })
    }
}
