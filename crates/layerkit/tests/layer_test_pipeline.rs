use std::sync::Arc;

use anyhow::Result;
use layerkit::nn::layers::{Dense, Embedding, Identity};
use layerkit::nn::{BaseConfig, CallKwargs, Layer, LayerBase, Variable};
use layerkit::saving::{parse_config, to_config, Config, LayerClass, LayerContext};
use layerkit::structure::Structure;
use layerkit::tensor::{DType, Shape, SymbolicTensor, Tensor};
use layerkit::testing::{ConformanceError, LayerTest, TestCase};
use layerkit::Backend;
use layerkit_backend_ref_cpu::CpuBackend;
use serde::{Deserialize, Serialize};

fn cpu() -> Arc<dyn Backend> {
    Arc::new(CpuBackend::new())
}

fn cpu_dense() -> Arc<dyn Backend> {
    Arc::new(CpuBackend::dense())
}

fn dense_test() -> LayerTest {
    LayerTest::new(Dense::class())
        .init_kwarg("units", 4)
        .input_shape(Shape::new([2, 4]))
}

#[test]
fn dense_float32_scenario_passes() {
    layerkit_backend_tests::init_test_logging();
    let case = TestCase::with_backend("dense_float32_scenario_passes", cpu());
    let test = dense_test()
        .expected_output_shape(Shape::new([2, 4]))
        .expected_output_dtype(DType::F32)
        .expected_num_trainable_weights(2)
        .expected_num_non_trainable_weights(0);
    case.run_layer_test(&test).unwrap();
}

#[test]
fn wrong_trainable_weight_count_names_the_expectation() {
    let case = TestCase::with_backend("wrong_trainable_weight_count", cpu());
    let test = dense_test().expected_num_trainable_weights(3);
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("number of trainable_weights"));
    assert!(err.to_string().contains("expected 3, got 2"), "{err}");
}

#[test]
fn wrong_output_shape_is_reported() {
    let case = TestCase::with_backend("wrong_output_shape", cpu());
    let test = dense_test().expected_output_shape(Shape::new([2, 5]));
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("output shape"));
}

#[test]
fn wrong_output_dtype_is_reported() {
    let case = TestCase::with_backend("wrong_output_dtype", cpu());
    let test = dense_test().expected_output_dtype(DType::F64);
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("output dtype"));
}

#[test]
fn supports_masking_mismatch_is_reported() {
    let case = TestCase::with_backend("supports_masking_mismatch", cpu());
    let test = dense_test().supports_masking(true);
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("supports_masking value"));
}

#[test]
fn mask_shape_without_masking_fails_before_construction() {
    let case = TestCase::with_backend("mask_shape_without_masking", cpu());
    // Missing `units` would fail construction; the argument check must fire first.
    let test = LayerTest::new(Dense::class())
        .input_shape(Shape::new([2, 4]))
        .expected_mask_shape(Shape::new([2]));
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Config(_)), "{err:?}");
}

#[test]
fn shape_and_data_are_mutually_exclusive() {
    let case = TestCase::with_backend("shape_and_data", cpu());
    let test = dense_test().input_data(Tensor::ones([2, 4], DType::F32));
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Config(_)), "{err:?}");
}

#[test]
fn expected_output_requires_input_data() {
    let case = TestCase::with_backend("expected_output_requires_data", cpu());
    let test = LayerTest::new(Identity::class()).expected_output(Tensor::ones([2], DType::F32));
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Config(_)), "{err:?}");
}

#[test]
fn expected_output_shape_and_value_are_mutually_exclusive() {
    let case = TestCase::with_backend("expected_output_exclusive", cpu());
    let test = LayerTest::new(Identity::class())
        .input_data(Tensor::ones([2], DType::F32))
        .expected_output(Tensor::ones([2], DType::F32))
        .expected_output_shape(Shape::new([2]));
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Config(_)), "{err:?}");
}

#[test]
fn expected_output_values_are_compared() {
    let case = TestCase::with_backend("expected_output_values", cpu());
    let x = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let test = LayerTest::new(Identity::class())
        .input_data(x)
        .expected_output(Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 5.0]).unwrap());
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Mismatch { .. }), "{err:?}");
}

#[test]
fn mixed_precision_check_runs_on_capable_backend() {
    let case = TestCase::with_backend("mixed_precision_capable", cpu());
    let test = dense_test().run_training_check(false);
    case.run_layer_test(&test).unwrap();
}

#[test]
fn mixed_precision_check_is_skipped_without_support() {
    let case = TestCase::with_backend("mixed_precision_skipped", cpu_dense());
    let test = dense_test().expected_output_shape(Shape::new([2, 4]));
    case.run_layer_test(&test).unwrap();
}

#[test]
fn sparse_input_on_dense_backend_is_unsupported() {
    let case = TestCase::with_backend("sparse_on_dense_backend", cpu_dense());
    let test = LayerTest::new(Identity::class())
        .input_shape(Shape::new([2, 3]))
        .input_sparse(true)
        .expected_output_sparse(true);
    match case.run_layer_test(&test) {
        Err(ConformanceError::Unsupported(reason)) => {
            assert_eq!(reason, "sparse is unsupported with backend cpu-dense");
        }
        other => panic!("expected unsupported, got {other:?}"),
    }
}

#[test]
fn dense_output_for_sparse_expectation_is_rejected() {
    let case = TestCase::with_backend("dense_output_for_sparse_expectation", cpu());
    let test = LayerTest::new(Dense::class())
        .init_kwarg("units", 2)
        .input_shape(Shape::new([3, 4]))
        .input_sparse(true)
        .expected_output_sparse(true);
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("output sparsity"));
    assert!(err.to_string().contains("dense output of shape (3, 2)"), "{err}");
}

#[test]
fn set_up_keeps_the_full_cause_chain() {
    let case = TestCase::with_backend("full_cause_chain", cpu());
    assert!(!case.session().traceback_filtering_enabled());
    let err = ConformanceError::Collaborator(anyhow::anyhow!("root cause").context("outer"));
    assert_eq!(case.format_error(&err), "outer: root cause");
    case.session().set_traceback_filtering(true);
    assert_eq!(case.format_error(&err), "outer");
}

#[test]
fn mask_shape_mismatch_is_reported() {
    let case = TestCase::with_backend("mask_shape_mismatch", cpu());
    let test = LayerTest::new(Embedding::class())
        .init_kwarg("input_dim", 3)
        .init_kwarg("output_dim", 2)
        .init_kwarg("mask_zero", true)
        .input_shape(Shape::new([2, 4]))
        .input_dtype(DType::I32)
        .supports_masking(true)
        .expected_mask_shape(Shape::new([2]));
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(err.expectation(), Some("mask shape"));
}

#[test]
fn layer_without_shape_or_data_only_checks_serialization() {
    let case = TestCase::with_backend("serialization_only", cpu());
    let test = LayerTest::new(Dense::class())
        .init_kwarg("units", 2)
        .expected_num_trainable_weights(99);
    case.run_layer_test(&test).unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScaleConfig {
    #[serde(flatten)]
    base: BaseConfig,
    factor: f64,
}

/// Multiplies its input by a constant factor.
struct Scale {
    base: LayerBase,
    config: ScaleConfig,
}

const SCALE: LayerClass = LayerClass {
    module: "pipeline_tests",
    name: "Scale",
    from_config: Scale::from_config,
};

impl Scale {
    fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: ScaleConfig = parse_config("Scale", config)?;
        Ok(Box::new(Scale {
            base: LayerBase::new(&config.base, "scale", ctx),
            config,
        }))
    }
}

impl Layer for Scale {
    fn layer_class(&self) -> LayerClass {
        SCALE
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, _input_shape: &Structure<Shape>) -> Result<()> {
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let factor = self.config.factor;
        Ok(inputs.map(|t| t.map(|v| v * factor)))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        Ok(inputs.clone())
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&ScaleConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }
}

#[test]
fn custom_layer_requires_custom_objects_to_deserialize() {
    let case = TestCase::with_backend("custom_layer_unregistered", cpu());
    let test = LayerTest::new(SCALE).init_kwarg("factor", 2.0);
    let err = case.run_layer_test(&test).unwrap_err();
    assert!(matches!(err, ConformanceError::Collaborator(_)), "{err:?}");
}

#[test]
fn custom_layer_passes_with_custom_objects() {
    let case = TestCase::with_backend("custom_layer_registered", cpu());
    let x = Tensor::from_vec([1, 3], vec![1.0, -2.0, 0.5]).unwrap();
    let test = LayerTest::new(SCALE)
        .init_kwarg("factor", 2.0)
        .custom_object("Scale", SCALE)
        .input_data(x)
        .expected_output(Tensor::from_vec([1, 3], vec![2.0, -4.0, 1.0]).unwrap())
        .expected_num_trainable_weights(0)
        .supports_masking(false);
    case.run_layer_test(&test).unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RescaleConfig {
    #[serde(flatten)]
    base: BaseConfig,
    #[serde(default)]
    factor_dtype: Option<DType>,
    #[serde(default)]
    output_dtype: Option<DType>,
}

/// Multiplies its input by a learned scalar; storage and output dtypes can be pinned.
struct Rescale {
    base: LayerBase,
    config: RescaleConfig,
    factor: Option<Variable>,
}

const RESCALE: LayerClass = LayerClass {
    module: "pipeline_tests",
    name: "Rescale",
    from_config: Rescale::from_config,
};

impl Rescale {
    fn from_config(config: &Config, ctx: &LayerContext<'_>) -> Result<Box<dyn Layer>> {
        let config: RescaleConfig = parse_config("Rescale", config)?;
        Ok(Box::new(Rescale {
            base: LayerBase::new(&config.base, "rescale", ctx),
            config,
            factor: None,
        }))
    }
}

impl Layer for Rescale {
    fn layer_class(&self) -> LayerClass {
        RESCALE
    }

    fn base(&self) -> &LayerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut LayerBase {
        &mut self.base
    }

    fn build(&mut self, _input_shape: &Structure<Shape>) -> Result<()> {
        let dtype = self
            .config
            .factor_dtype
            .unwrap_or_else(|| self.base.variable_dtype());
        self.factor = Some(Variable::new("factor", Tensor::ones([1], dtype), true));
        Ok(())
    }

    fn call(&mut self, inputs: &Structure<Tensor>, _kwargs: &CallKwargs) -> Result<Structure<Tensor>> {
        let factor = self
            .factor
            .as_ref()
            .map_or(1.0, |f| f.value().values()[0]);
        let output_dtype = self.config.output_dtype;
        Ok(inputs.map(|t| {
            let scaled = t.map(|v| v * factor);
            match output_dtype {
                Some(dtype) => scaled.cast(dtype),
                None => scaled,
            }
        }))
    }

    fn compute_output_spec(
        &self,
        inputs: &Structure<SymbolicTensor>,
        _kwargs: &CallKwargs,
    ) -> Result<Structure<SymbolicTensor>> {
        Ok(inputs.map(|t| match self.config.output_dtype {
            Some(dtype) => t.with_dtype(dtype),
            None => t.clone(),
        }))
    }

    fn get_config(&self) -> Result<Config> {
        to_config(&RescaleConfig {
            base: self.base.base_config(),
            ..self.config.clone()
        })
    }

    fn weights(&self) -> Vec<&Variable> {
        self.factor.iter().collect()
    }

    fn weights_mut(&mut self) -> Vec<&mut Variable> {
        self.factor.iter_mut().collect()
    }
}

fn rescale_test() -> LayerTest {
    LayerTest::new(RESCALE)
        .custom_object("Rescale", RESCALE)
        .input_shape(Shape::new([2, 3]))
        .run_training_check(false)
}

#[test]
fn mixed_precision_accepts_half_outputs_and_float_weights() {
    let case = TestCase::with_backend("rescale_mixed_precision", cpu());
    let test = rescale_test().expected_num_trainable_weights(1);
    case.run_layer_test(&test).unwrap();
}

#[test]
fn mixed_precision_rejects_float32_outputs() {
    let case = TestCase::with_backend("rescale_float32_output", cpu());
    let test = rescale_test().init_kwarg("output_dtype", "float32");
    match case.run_layer_test(&test).unwrap_err() {
        ConformanceError::Mismatch {
            expectation,
            expected,
            actual,
        } => {
            assert_eq!(expectation, "mixed precision output dtype");
            assert_eq!(expected, "float16");
            assert_eq!(actual, "float32");
        }
        other => panic!("expected mismatch, got {other:?}"),
    }
}

#[test]
fn mixed_precision_rejects_half_stored_weights() {
    let case = TestCase::with_backend("rescale_half_weight", cpu());
    let test = rescale_test().init_kwarg("factor_dtype", "float16");
    let err = case.run_layer_test(&test).unwrap_err();
    assert_eq!(
        err.expectation(),
        Some("mixed precision dtype of weight 'factor'")
    );
}
