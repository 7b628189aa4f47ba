use std::collections::BTreeSet;

use anyhow::{bail, ensure, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{json, Value};

use super::{Config, LayerContext};
use crate::nn::Layer;

/// Fully-typed serialized form: class identity plus plain configuration.
pub fn serialize_layer(layer: &dyn Layer) -> Result<Value> {
    let class = layer.layer_class();
    let config = layer.get_config()?;
    Ok(json!({
        "module": class.module,
        "class_name": class.name,
        "config": Value::Object(config),
        "registered_name": class.registered_name(),
    }))
}

/// Reconstructs a layer from [`serialize_layer`] output through the context's registry.
pub fn deserialize_layer(value: &Value, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
    let Some(object) = value.as_object() else {
        bail!("serialized layer must be a JSON object, got {value}");
    };
    let class_name = object
        .get("class_name")
        .and_then(Value::as_str)
        .context("serialized layer is missing 'class_name'")?;
    let registered_name = object.get("registered_name").and_then(Value::as_str);
    let config = match object.get("config") {
        Some(Value::Object(config)) => config.clone(),
        Some(other) => bail!("config of '{class_name}' must be an object, got {other}"),
        None => Config::new(),
    };
    let class = ctx.registry.resolve(class_name, registered_name)?;
    if let Some(module) = object.get("module").and_then(Value::as_str) {
        if module != class.module {
            tracing::debug!(
                expected = module,
                resolved = class.module,
                class_name,
                "serialized module differs from resolved class"
            );
        }
    }
    class
        .instantiate(&config, ctx)
        .with_context(|| format!("failed to deserialize layer '{class_name}'"))
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Renders `value` with recursively sorted keys and four-space indentation.
pub fn canonical_json(value: &Value) -> Result<String> {
    let sorted = sort_keys(value);
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    sorted.serialize(&mut serializer)?;
    Ok(String::from_utf8(buf)?)
}

/// Decodes a typed config, rejecting keys the type does not recognise.
pub fn parse_config<T>(class_name: &str, config: &Config) -> Result<T>
where
    T: DeserializeOwned + Serialize,
{
    let parsed: T = serde_json::from_value(Value::Object(config.clone()))
        .with_context(|| format!("invalid config for {class_name}"))?;
    let known: BTreeSet<String> = to_config(&parsed)?.keys().cloned().collect();
    let unknown: Vec<&String> = config.keys().filter(|key| !known.contains(*key)).collect();
    ensure!(
        unknown.is_empty(),
        "unrecognized keyword arguments passed to {class_name}: {unknown:?}"
    );
    Ok(parsed)
}

/// Encodes a typed config into plain configuration data.
pub fn to_config<T: Serialize>(value: &T) -> Result<Config> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => bail!("layer config must serialize to an object, got {other}"),
    }
}
