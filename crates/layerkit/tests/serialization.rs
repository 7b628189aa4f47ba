use std::collections::BTreeMap;
use std::sync::Arc;

use layerkit::nn::layers::{BatchNormalization, Dense, Dropout, TimeDistributed};
use layerkit::saving::{
    canonical_json, deserialize_layer, serialize_layer, Config, LayerContext, ObjectRegistry,
};
use layerkit::testing::TestCase;
use layerkit::Session;
use layerkit_backend_ref_cpu::CpuBackend;
use serde_json::{json, Value};

fn config(value: Value) -> Config {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn case(name: &str) -> TestCase {
    TestCase::with_backend(name, Arc::new(CpuBackend::new()))
}

#[test]
fn serialized_form_carries_class_identity() {
    let session = Session::with_seed(0);
    let registry = ObjectRegistry::new();
    let ctx = LayerContext::new(&session, &registry);
    let layer = Dense::class()
        .instantiate(&config(json!({"units": 3, "activation": "relu"})), &ctx)
        .unwrap();
    let serialized = serialize_layer(layer.as_ref()).unwrap();
    assert_eq!(serialized["module"], "layerkit.layers");
    assert_eq!(serialized["class_name"], "Dense");
    assert_eq!(serialized["registered_name"], "Dense");
    assert_eq!(serialized["config"]["units"], 3);
    assert_eq!(serialized["config"]["name"], "dense");

    let revived = deserialize_layer(&serialized, &ctx).unwrap();
    assert_eq!(revived.get_config().unwrap(), layer.get_config().unwrap());
}

#[test]
fn canonical_json_is_stable_across_key_order() {
    let a = json!({"b": 1, "a": {"y": 2, "x": [3, {"d": 4, "c": 5}]}});
    let b = json!({"a": {"x": [3, {"c": 5, "d": 4}], "y": 2}, "b": 1});
    assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    assert!(canonical_json(&a).unwrap().contains("\n    \"a\""));
}

#[test]
fn unknown_constructor_arguments_are_rejected() {
    let case = case("unknown_constructor_arguments");
    let err = case
        .instantiate(Dense::class(), &config(json!({"units": 2, "unit": 3})))
        .err()
        .unwrap();
    assert!(err.to_string().contains("unit"), "{err}");
}

#[test]
fn builtin_layers_round_trip() {
    let case = case("builtin_layers_round_trip");
    let configs = [
        (Dense::class(), json!({"units": 5, "use_bias": false})),
        (BatchNormalization::class(), json!({"momentum": 0.5, "center": false})),
        (Dropout::class(), json!({"rate": 0.3, "seed": 7})),
    ];
    for (class, kwargs) in configs {
        let layer = case.instantiate(class, &config(kwargs)).unwrap();
        let revived = case
            .run_class_serialization_test(layer.as_ref(), &BTreeMap::new())
            .unwrap();
        assert_eq!(revived.layer_class(), class);
    }
}

#[test]
fn time_distributed_serializes_inner_layer() {
    let case = case("time_distributed_serializes_inner_layer");
    let inner = json!({
        "module": "layerkit.layers",
        "class_name": "Dense",
        "config": {"units": 2, "name": "inner"},
        "registered_name": "Dense",
    });
    let layer = case
        .instantiate(TimeDistributed::class(), &config(json!({"layer": inner})))
        .unwrap();
    let cfg = layer.get_config().unwrap();
    assert_eq!(cfg["layer"]["class_name"], "Dense");
    assert_eq!(cfg["layer"]["config"]["name"], "inner");
    case.run_class_serialization_test(layer.as_ref(), &BTreeMap::new())
        .unwrap();
}

#[test]
fn temp_dirs_are_removed_with_the_case() {
    let case = case("temp_dirs");
    let dir = case.get_temp_dir().unwrap();
    assert!(dir.is_dir());
    std::fs::write(dir.join("config.json"), "{}").unwrap();
    drop(case);
    assert!(!dir.exists());
}
