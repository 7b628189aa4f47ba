//! Layer configuration, class registry, and the fully-typed serialized form.

mod registry;
mod serialize;

/// Plain nested configuration data, as produced by `Layer::get_config`.
pub type Config = serde_json::Map<String, serde_json::Value>;

pub use registry::{FromConfigFn, LayerClass, LayerContext, ObjectRegistry, LAYER_CLASSES};
pub use serialize::{canonical_json, deserialize_layer, parse_config, serialize_layer, to_config};
