pub mod layers;
pub mod recording_backend;

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Routes `tracing` output through the test harness; honours `RUST_LOG`.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[macro_export]
macro_rules! define_layer_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use $crate::layers;

            macro_rules! layer_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        $crate::init_test_logging();
                        let backend = ($backend_ctor)();
                        $func(&backend);
                    }
                };
            }

            layer_test!(dense_basics, layers::dense_basics);
            layer_test!(dense_matches_expected_output, layers::dense_matches_expected_output);
            layer_test!(dense_accepts_sparse_input, layers::dense_accepts_sparse_input);
            layer_test!(batch_normalization_tracks_moving_statistics, layers::batch_normalization_tracks_moving_statistics);
            layer_test!(dropout_owns_seed_generator, layers::dropout_owns_seed_generator);
            layer_test!(dropout_preserves_sparsity, layers::dropout_preserves_sparsity);
            layer_test!(masking_computes_mask, layers::masking_computes_mask);
            layer_test!(masking_zeroes_masked_steps, layers::masking_zeroes_masked_steps);
            layer_test!(activity_regularization_adds_loss, layers::activity_regularization_adds_loss);
            layer_test!(embedding_maps_integer_inputs, layers::embedding_maps_integer_inputs);
            layer_test!(embedding_mask_zero, layers::embedding_mask_zero);
            layer_test!(add_sums_sequence_inputs, layers::add_sums_sequence_inputs);
            layer_test!(add_keeps_sparse_inputs_sparse, layers::add_keeps_sparse_inputs_sparse);
            layer_test!(attention_keyword_inputs, layers::attention_keyword_inputs);
            layer_test!(attention_returns_scores_mapping, layers::attention_returns_scores_mapping);
            layer_test!(identity_passes_sparse_through, layers::identity_passes_sparse_through);
            layer_test!(time_distributed_wraps_dense, layers::time_distributed_wraps_dense);
            layer_test!(capability_queries_drive_sparse_handling, layers::capability_queries_drive_sparse_handling);
        }
    };
}
