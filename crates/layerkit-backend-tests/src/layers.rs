//! Conformance scenarios for the built-in layers, parameterised by backend.

use std::sync::Arc;

use layerkit::backend::spec::Backend;
use layerkit::nn::layers::{
    ActivityRegularization, Add, BatchNormalization, Dense, DotProductAttention, Dropout,
    Embedding, Identity, Masking, TimeDistributed,
};
use layerkit::structure::Structure;
use layerkit::tensor::{DType, Shape, Tensor};
use layerkit::testing::{ConformanceError, LayerTest, TestCase};
use serde_json::json;

use crate::recording_backend::RecordingBackend;

/// Runs `test` in a fresh case; capabilities the backend lacks turn the scenario into a skip.
fn run(backend: &Arc<dyn Backend>, name: &str, test: LayerTest) {
    let case = TestCase::with_backend(name, Arc::clone(backend));
    match case.run_layer_test(&test) {
        Ok(()) => {}
        Err(ConformanceError::Unsupported(reason)) => {
            tracing::info!(test = name, backend = backend.backend_name(), %reason, "skipped");
        }
        Err(err) => panic!(
            "{name} failed on backend {}: {}",
            backend.backend_name(),
            case.format_error(&err)
        ),
    }
}

fn shape<const N: usize>(dims: [usize; N]) -> Shape {
    Shape::new(dims)
}

pub fn dense_basics(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Dense::class())
        .init_kwarg("units", 3)
        .input_shape(shape([2, 4]))
        .expected_output_shape(shape([2, 3]))
        .expected_output_dtype(DType::F32)
        .expected_num_trainable_weights(2)
        .expected_num_non_trainable_weights(0)
        .expected_num_non_trainable_variables(0)
        .expected_num_seed_generators(0)
        .expected_num_losses(0)
        .supports_masking(false);
    run(backend, "dense_basics", test);
}

pub fn dense_matches_expected_output(backend: &Arc<dyn Backend>) {
    let x = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let expected = Tensor::from_vec([2, 2], vec![3.0, 3.0, 7.0, 7.0]).unwrap();
    let test = LayerTest::new(Dense::class())
        .init_kwarg("units", 2)
        .init_kwarg("kernel_initializer", "ones")
        .input_data(x)
        .expected_output(expected)
        .expected_num_trainable_weights(2);
    run(backend, "dense_matches_expected_output", test);
}

pub fn dense_accepts_sparse_input(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Dense::class())
        .init_kwarg("units", 2)
        .init_kwarg("use_bias", false)
        .input_shape(shape([3, 4]))
        .input_sparse(true)
        .expected_output_shape(shape([3, 2]))
        .expected_num_trainable_weights(1);
    run(backend, "dense_accepts_sparse_input", test);
}

pub fn batch_normalization_tracks_moving_statistics(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(BatchNormalization::class())
        .init_kwarg("momentum", 0.9)
        .input_shape(shape([4, 3]))
        .expected_output_shape(shape([4, 3]))
        .expected_num_trainable_weights(2)
        .expected_num_non_trainable_weights(2)
        .expected_num_non_trainable_variables(2)
        .expected_num_seed_generators(0)
        .supports_masking(true);
    run(backend, "batch_normalization_tracks_moving_statistics", test);
}

pub fn dropout_owns_seed_generator(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Dropout::class())
        .init_kwarg("rate", 0.5)
        .init_kwarg("seed", 1337)
        .input_shape(shape([2, 3]))
        .expected_output_shape(shape([2, 3]))
        .expected_num_trainable_weights(0)
        .expected_num_non_trainable_weights(0)
        .expected_num_non_trainable_variables(1)
        .expected_num_seed_generators(1)
        .supports_masking(true);
    run(backend, "dropout_owns_seed_generator", test);
}

pub fn dropout_preserves_sparsity(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Dropout::class())
        .init_kwarg("rate", 0.25)
        .input_shape(shape([2, 5]))
        .input_sparse(true)
        .expected_output_shape(shape([2, 5]))
        .expected_output_sparse(true);
    run(backend, "dropout_preserves_sparsity", test);
}

pub fn masking_computes_mask(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Masking::class())
        .init_kwarg("mask_value", 0.0)
        .input_shape(shape([2, 3, 4]))
        .expected_output_shape(shape([2, 3, 4]))
        .supports_masking(true)
        .expected_mask_shape(shape([2, 3]));
    run(backend, "masking_computes_mask", test);
}

pub fn masking_zeroes_masked_steps(backend: &Arc<dyn Backend>) {
    let x = Tensor::from_vec([1, 3, 2], vec![1.0, 1.0, 2.0, 3.0, 1.0, 4.0]).unwrap();
    let expected = Tensor::from_vec([1, 3, 2], vec![0.0, 0.0, 2.0, 3.0, 1.0, 4.0]).unwrap();
    let test = LayerTest::new(Masking::class())
        .init_kwarg("mask_value", 1.0)
        .input_data(x)
        .expected_output(expected)
        .supports_masking(true)
        .expected_mask_shape(shape([1, 3]));
    run(backend, "masking_zeroes_masked_steps", test);
}

pub fn activity_regularization_adds_loss(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(ActivityRegularization::class())
        .init_kwarg("l1", 0.01)
        .init_kwarg("l2", 0.01)
        .input_shape(shape([2, 3]))
        .expected_output_shape(shape([2, 3]))
        .expected_num_trainable_weights(0)
        .expected_num_losses(1)
        .supports_masking(true);
    run(backend, "activity_regularization_adds_loss", test);
}

pub fn embedding_maps_integer_inputs(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Embedding::class())
        .init_kwarg("input_dim", 4)
        .init_kwarg("output_dim", 3)
        .input_shape(shape([2, 5]))
        .input_dtype(DType::I32)
        .expected_output_shape(shape([2, 5, 3]))
        .expected_output_dtype(DType::F32)
        .expected_num_trainable_weights(1)
        .expected_num_non_trainable_weights(0)
        .supports_masking(false);
    run(backend, "embedding_maps_integer_inputs", test);
}

pub fn embedding_mask_zero(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Embedding::class())
        .init_kwarg("input_dim", 4)
        .init_kwarg("output_dim", 2)
        .init_kwarg("mask_zero", true)
        .input_shape(shape([3, 2]))
        .input_dtype(DType::I64)
        .expected_output_shape(shape([3, 2, 2]))
        .supports_masking(true)
        .expected_mask_shape(shape([3, 2]));
    run(backend, "embedding_mask_zero", test);
}

pub fn add_sums_sequence_inputs(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Add::class())
        .input_shape(Structure::<Shape>::sequence([shape([2, 3]), shape([2, 3])]))
        .expected_output_shape(shape([2, 3]))
        .expected_num_trainable_weights(0)
        .supports_masking(true);
    run(backend, "add_sums_sequence_inputs", test);
}

pub fn add_keeps_sparse_inputs_sparse(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Add::class())
        .input_shape(Structure::<Shape>::sequence([shape([4, 2]), shape([4, 2]), shape([4, 2])]))
        .input_sparse(true)
        .expected_output_shape(shape([4, 2]))
        .expected_output_sparse(true);
    run(backend, "add_keeps_sparse_inputs_sparse", test);
}

pub fn attention_keyword_inputs(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(DotProductAttention::class())
        .init_kwarg("use_scale", true)
        .input_shape(Structure::<Shape>::mapping([
            ("query", shape([2, 3, 4])),
            ("value", shape([2, 5, 4])),
        ]))
        .expected_output_shape(shape([2, 3, 4]))
        .expected_num_trainable_weights(1)
        .expected_num_non_trainable_weights(0);
    run(backend, "attention_keyword_inputs", test);
}

pub fn attention_returns_scores_mapping(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(DotProductAttention::class())
        .init_kwarg("return_attention_scores", true)
        .input_shape(Structure::<Shape>::mapping([
            ("query", shape([1, 2, 3])),
            ("key", shape([1, 4, 3])),
            ("value", shape([1, 4, 5])),
        ]))
        .expected_output_shape(Structure::<Shape>::mapping([
            ("output", shape([1, 2, 5])),
            ("scores", shape([1, 2, 4])),
        ]))
        .expected_num_trainable_weights(0);
    run(backend, "attention_returns_scores_mapping", test);
}

pub fn identity_passes_sparse_through(backend: &Arc<dyn Backend>) {
    let test = LayerTest::new(Identity::class())
        .input_shape(shape([3, 3]))
        .input_sparse(true)
        .expected_output_shape(shape([3, 3]))
        .expected_output_sparse(true)
        .supports_masking(true);
    run(backend, "identity_passes_sparse_through", test);
}

pub fn time_distributed_wraps_dense(backend: &Arc<dyn Backend>) {
    let inner = json!({
        "module": "layerkit.layers",
        "class_name": "Dense",
        "config": { "units": 3 },
        "registered_name": "Dense",
    });
    let test = LayerTest::new(TimeDistributed::class())
        .init_kwarg("layer", inner)
        .input_shape(shape([2, 4, 5]))
        .expected_output_shape(shape([2, 4, 3]))
        .expected_num_trainable_weights(2)
        .supports_masking(true);
    run(backend, "time_distributed_wraps_dense", test);
}

/// Sparse handling must go through capability queries rather than the backend name.
pub fn capability_queries_drive_sparse_handling(backend: &Arc<dyn Backend>) {
    let recording = Arc::new(RecordingBackend::new(Arc::clone(backend)));
    let wrapped: Arc<dyn Backend> = recording.clone();
    let case = TestCase::with_backend("capability_queries_drive_sparse_handling", wrapped);
    let test = LayerTest::new(Identity::class())
        .input_shape(shape([2, 2]))
        .input_sparse(true)
        .expected_output_sparse(true);
    let result = case.run_layer_test(&test);
    assert!(recording.was_queried("supports_sparse"));
    if backend.supports_sparse() {
        result.unwrap();
        assert!(recording.was_queried("sparse_from_dense"));
    } else {
        match result {
            Err(ConformanceError::Unsupported(reason)) => {
                assert!(reason.contains(backend.backend_name()), "{reason}");
            }
            other => panic!("expected an unsupported-sparse outcome, got {other:?}"),
        }
    }
}
