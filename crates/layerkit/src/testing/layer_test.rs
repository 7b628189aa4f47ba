//! The layer conformance pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::case::TestCase;
use super::comparators::assert_len;
use super::error::{ConformanceError, ConformanceResult};
use super::synthetic::{create_eager_tensors, create_placeholders};
use crate::backend::spec::ExecutionMode;
use crate::nn::{build_layer, invoke, invoke_symbolic, CallKwargs, Layer, SHAPE_SUFFIX};
use crate::saving::{Config, LayerClass, LayerContext};
use crate::structure::Structure;
use crate::tensor::{DType, Shape, SymbolicTensor, Tensor, TensorLike};
use crate::train::{MeanSquaredError, Model, Sgd};

const MIXED_PRECISION_POLICY: &str = "mixed_float16";

/// Description of one layer conformance run.
///
/// Only the class is required; every expectation left unset is not checked.
#[derive(Debug, Clone)]
pub struct LayerTest {
    class: LayerClass,
    init_kwargs: Config,
    input_shape: Option<Structure<Shape>>,
    input_dtype: DType,
    input_sparse: bool,
    input_data: Option<Structure<Tensor>>,
    call_kwargs: CallKwargs,
    expected_output_shape: Option<Structure<Shape>>,
    expected_output_dtype: Option<DType>,
    expected_output_sparse: bool,
    expected_output: Option<Structure<Tensor>>,
    expected_num_trainable_weights: Option<usize>,
    expected_num_non_trainable_weights: Option<usize>,
    expected_num_non_trainable_variables: Option<usize>,
    expected_num_seed_generators: Option<usize>,
    expected_num_losses: Option<usize>,
    supports_masking: Option<bool>,
    expected_mask_shape: Option<Shape>,
    custom_objects: BTreeMap<String, LayerClass>,
    run_training_check: bool,
    run_mixed_precision_check: bool,
}

impl LayerTest {
    pub fn new(class: LayerClass) -> Self {
        LayerTest {
            class,
            init_kwargs: Config::new(),
            input_shape: None,
            input_dtype: DType::F32,
            input_sparse: false,
            input_data: None,
            call_kwargs: CallKwargs::new(),
            expected_output_shape: None,
            expected_output_dtype: None,
            expected_output_sparse: false,
            expected_output: None,
            expected_num_trainable_weights: None,
            expected_num_non_trainable_weights: None,
            expected_num_non_trainable_variables: None,
            expected_num_seed_generators: None,
            expected_num_losses: None,
            supports_masking: None,
            expected_mask_shape: None,
            custom_objects: BTreeMap::new(),
            run_training_check: true,
            run_mixed_precision_check: true,
        }
    }

    pub fn init_kwargs(mut self, kwargs: Config) -> Self {
        self.init_kwargs = kwargs;
        self
    }

    pub fn init_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.init_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn input_shape(mut self, shape: impl Into<Structure<Shape>>) -> Self {
        self.input_shape = Some(shape.into());
        self
    }

    pub fn input_dtype(mut self, dtype: DType) -> Self {
        self.input_dtype = dtype;
        self
    }

    pub fn input_sparse(mut self, sparse: bool) -> Self {
        self.input_sparse = sparse;
        self
    }

    pub fn input_data(mut self, data: impl Into<Structure<Tensor>>) -> Self {
        self.input_data = Some(data.into());
        self
    }

    pub fn call_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.call_kwargs.insert(key.into(), value.into());
        self
    }

    pub fn expected_output_shape(mut self, shape: impl Into<Structure<Shape>>) -> Self {
        self.expected_output_shape = Some(shape.into());
        self
    }

    pub fn expected_output_dtype(mut self, dtype: DType) -> Self {
        self.expected_output_dtype = Some(dtype);
        self
    }

    pub fn expected_output_sparse(mut self, sparse: bool) -> Self {
        self.expected_output_sparse = sparse;
        self
    }

    pub fn expected_output(mut self, output: impl Into<Structure<Tensor>>) -> Self {
        self.expected_output = Some(output.into());
        self
    }

    pub fn expected_num_trainable_weights(mut self, n: usize) -> Self {
        self.expected_num_trainable_weights = Some(n);
        self
    }

    pub fn expected_num_non_trainable_weights(mut self, n: usize) -> Self {
        self.expected_num_non_trainable_weights = Some(n);
        self
    }

    pub fn expected_num_non_trainable_variables(mut self, n: usize) -> Self {
        self.expected_num_non_trainable_variables = Some(n);
        self
    }

    pub fn expected_num_seed_generators(mut self, n: usize) -> Self {
        self.expected_num_seed_generators = Some(n);
        self
    }

    pub fn expected_num_losses(mut self, n: usize) -> Self {
        self.expected_num_losses = Some(n);
        self
    }

    pub fn supports_masking(mut self, supports: bool) -> Self {
        self.supports_masking = Some(supports);
        self
    }

    pub fn expected_mask_shape(mut self, shape: impl Into<Shape>) -> Self {
        self.expected_mask_shape = Some(shape.into());
        self
    }

    pub fn custom_object(mut self, name: impl Into<String>, class: LayerClass) -> Self {
        self.custom_objects.insert(name.into(), class);
        self
    }

    pub fn run_training_check(mut self, run: bool) -> Self {
        self.run_training_check = run;
        self
    }

    pub fn run_mixed_precision_check(mut self, run: bool) -> Self {
        self.run_mixed_precision_check = run;
        self
    }

    /// Rejects contradictory or incomplete argument combinations.
    fn validate(&self) -> ConformanceResult<()> {
        if self.input_shape.is_some() && self.input_data.is_some() {
            return Err(ConformanceError::config(
                "input_shape and input_data cannot be passed at the same time",
            ));
        }
        if self.expected_output_shape.is_some() && self.expected_output.is_some() {
            return Err(ConformanceError::config(
                "expected_output_shape and expected_output cannot be passed at the same time",
            ));
        }
        if self.expected_output.is_some() && self.input_data.is_none() {
            return Err(ConformanceError::config(
                "in order to use expected_output, input_data must be provided",
            ));
        }
        if self.expected_mask_shape.is_some() && self.supports_masking != Some(true) {
            return Err(ConformanceError::config(
                "in order to use expected_mask_shape, supports_masking must be true",
            ));
        }
        Ok(())
    }

    fn run_build_asserts(&self, layer: &dyn Layer) -> ConformanceResult<()> {
        if !layer.is_built() {
            return Err(ConformanceError::mismatch("built state", true, false));
        }
        let counts = [
            (self.expected_num_trainable_weights, layer.trainable_weights().len(), "trainable_weights"),
            (
                self.expected_num_non_trainable_weights,
                layer.non_trainable_weights().len(),
                "non_trainable_weights",
            ),
            (
                self.expected_num_non_trainable_variables,
                layer.non_trainable_variables().len(),
                "non_trainable_variables",
            ),
            (self.expected_num_seed_generators, layer.seed_generators().len(), "seed_generators"),
        ];
        for (expected, actual, what) in counts {
            if let Some(expected) = expected {
                assert_len(actual, expected, what)?;
            }
        }
        Ok(())
    }

    fn run_output_asserts<T: TensorLike>(
        &self,
        case: &TestCase,
        output: &Structure<T>,
    ) -> ConformanceResult<()> {
        if let Some(expected) = &self.expected_output_shape {
            check_output_shape(expected, output)?;
        }
        let leaves = output.flatten();
        if let Some(expected) = self.expected_output_dtype {
            // Only the first flattened output is checked.
            let first = leaves
                .first()
                .ok_or_else(|| ConformanceError::mismatch("output dtype", expected, "no outputs"))?;
            if first.dtype() != expected {
                return Err(ConformanceError::mismatch("output dtype", expected, first.dtype()));
            }
        }
        if self.expected_output_sparse {
            let backend = case.backend();
            for leaf in &leaves {
                if !leaf.is_placeholder() && !backend.supports_sparse() {
                    return Err(ConformanceError::Unsupported(format!(
                        "sparse is unsupported with backend {}",
                        backend.backend_name()
                    )));
                }
                if !leaf.is_sparse() {
                    return Err(ConformanceError::mismatch(
                        "output sparsity",
                        "sparse",
                        format!("dense output of shape {}", leaf.shape()),
                    ));
                }
            }
        }
        Ok(())
    }

    fn run_eager_asserts(
        &self,
        case: &TestCase,
        layer: &dyn Layer,
        output: &Structure<Tensor>,
    ) -> ConformanceResult<()> {
        self.run_output_asserts(case, output)?;
        if let Some(expected) = &self.expected_output {
            if expected.kind() != output.kind() {
                return Err(ConformanceError::mismatch(
                    "output structure",
                    expected.kind(),
                    output.kind(),
                ));
            }
            let (expected, actual) = (expected.flatten(), output.flatten());
            assert_len(actual.len(), expected.len(), "outputs")?;
            for (reference, value) in expected.into_iter().zip(actual) {
                case.assert_all_close(reference, value)?;
            }
        }
        if let Some(expected) = self.expected_num_losses {
            assert_len(layer.losses().len(), expected, "losses")?;
        }
        Ok(())
    }
}

fn shape_mismatch<T: TensorLike>(expected: &Shape, actual: &T) -> ConformanceError {
    ConformanceError::mismatch("output shape", expected, actual.shape())
}

fn check_output_shape<T: TensorLike>(
    expected: &Structure<Shape>,
    output: &Structure<T>,
) -> ConformanceResult<()> {
    match (expected, output) {
        (Structure::Single(shape), Structure::Single(actual)) => {
            if actual.shape() != shape {
                return Err(shape_mismatch(shape, actual));
            }
            Ok(())
        }
        (Structure::Mapping(expected), Structure::Mapping(actual)) => {
            let (ek, ak): (Vec<_>, Vec<_>) = (expected.keys().collect(), actual.keys().collect());
            if ek != ak {
                return Err(ConformanceError::mismatch(
                    "output dict keys",
                    format!("{ek:?}"),
                    format!("{ak:?}"),
                ));
            }
            for (e, a) in expected.values().zip(actual.values()) {
                check_output_shape(e, a)?;
            }
            Ok(())
        }
        (Structure::Sequence(expected), Structure::Sequence(actual)) => {
            assert_len(actual.len(), expected.len(), "outputs")?;
            for (e, a) in expected.iter().zip(actual) {
                check_output_shape(e, a)?;
            }
            Ok(())
        }
        (expected, actual) => Err(ConformanceError::mismatch(
            "output structure",
            expected.kind(),
            actual.kind(),
        )),
    }
}

impl TestCase {
    /// Runs every applicable phase of `test` against a fresh instance per phase.
    pub fn run_layer_test(&self, test: &LayerTest) -> ConformanceResult<()> {
        let span = tracing::debug_span!(
            "run_layer_test",
            layer = test.class.name,
            backend = self.backend().backend_name()
        );
        let _guard = span.enter();

        let result = self.run_layer_phases(test);
        if let Err(err) = &result {
            tracing::debug!(error = %self.format_error(err), "layer test failed");
        }
        result
    }

    fn run_layer_phases(&self, test: &LayerTest) -> ConformanceResult<()> {
        test.validate()?;

        let registry = self.scoped_registry(&test.custom_objects);
        let ctx = LayerContext::new(self.session(), &registry);
        let instantiate = |kwargs: &Config| -> ConformanceResult<Box<dyn Layer>> {
            Ok(test.class.instantiate(kwargs, &ctx)?)
        };

        tracing::debug!("serialization phase");
        let layer = instantiate(&test.init_kwargs)?;
        self.run_class_serialization_test(layer.as_ref(), &test.custom_objects)?;

        if let Some(expected) = test.supports_masking {
            if layer.supports_masking() != expected {
                return Err(ConformanceError::mismatch(
                    "supports_masking value",
                    expected,
                    layer.supports_masking(),
                ));
            }
        }

        let build_shape = match (&test.input_shape, &test.input_data) {
            (Some(shape), _) => shape.clone(),
            (None, Some(data)) => data.map(|t| t.shape().clone()),
            (None, None) => return Ok(()),
        };

        tracing::debug!("build phase");
        let mut layer = instantiate(&test.init_kwargs)?;
        build_layer(layer.as_mut(), &build_shape.clone().add_key_suffix(SHAPE_SUFFIX))?;
        test.run_build_asserts(layer.as_ref())?;

        tracing::debug!("symbolic call phase");
        let placeholders = match &test.input_data {
            Some(data) => {
                data.map(|t| SymbolicTensor::new(t.shape().clone(), t.dtype(), test.input_sparse))
            }
            None => create_placeholders(&build_shape, test.input_dtype, test.input_sparse),
        };
        let mut layer = instantiate(&test.init_kwargs)?;
        let symbolic_outputs = invoke_symbolic(layer.as_mut(), &placeholders, &test.call_kwargs)?;
        test.run_build_asserts(layer.as_ref())?;
        test.run_output_asserts(self, &symbolic_outputs)?;
        if let Some(expected) = &test.expected_mask_shape {
            match layer.compute_mask(&placeholders, None)? {
                Some(mask) if mask.shape() == expected => {}
                Some(mask) => {
                    return Err(ConformanceError::mismatch("mask shape", expected, mask.shape()))
                }
                None => return Err(ConformanceError::mismatch("mask shape", expected, "no mask")),
            }
        }

        tracing::debug!("eager call phase");
        let input_data = match &test.input_data {
            Some(data) => data.clone(),
            None => create_eager_tensors(
                self.backend().as_ref(),
                &build_shape,
                test.input_dtype,
                test.input_sparse,
            )?,
        };
        let mut layer = instantiate(&test.init_kwargs)?;
        let output = invoke(layer.as_mut(), &input_data, &test.call_kwargs)?;
        test.run_eager_asserts(self, layer.as_ref(), &output)?;

        if test.run_training_check {
            self.run_training_step(layer, &input_data, &output, test.input_sparse)?;
        }

        let mut run_mixed_precision = test.run_mixed_precision_check;
        if run_mixed_precision && !self.backend().supports_mixed_precision() {
            tracing::info!(
                backend = self.backend().backend_name(),
                "skipping mixed precision check: backend lacks half-precision kernels"
            );
            run_mixed_precision = false;
        }
        if run_mixed_precision {
            tracing::debug!("mixed precision phase");
            let mut kwargs = test.init_kwargs.clone();
            kwargs.insert("dtype".to_string(), Value::from(MIXED_PRECISION_POLICY));
            let mut layer = instantiate(&kwargs)?;
            let output = invoke(layer.as_mut(), &input_data, &test.call_kwargs)?;
            for tensor in output.flatten() {
                if tensor.dtype().is_float() && tensor.dtype() != DType::F16 {
                    return Err(ConformanceError::mismatch(
                        "mixed precision output dtype",
                        DType::F16,
                        tensor.dtype(),
                    ));
                }
            }
            for weight in layer.weights() {
                if weight.dtype().is_float() && weight.dtype() != DType::F32 {
                    return Err(ConformanceError::mismatch(
                        format!("mixed precision dtype of weight '{}'", weight.name()),
                        DType::F32,
                        weight.dtype(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// One SGD/MSE step on a repeating `(input, output)` batch.
    fn run_training_step(
        &self,
        layer: Box<dyn Layer>,
        input_data: &Structure<Tensor>,
        output_data: &Structure<Tensor>,
        input_sparse: bool,
    ) -> ConformanceResult<()> {
        let backend = Arc::clone(self.backend());
        let mode = if input_sparse && !backend.supports_sparse_tracing() {
            ExecutionMode::Eager
        } else {
            ExecutionMode::Auto
        };
        tracing::debug!(mode = %mode, "training phase");
        let mut model = Model::new(layer, backend);
        model.compile(Box::new(Sgd::default()), Box::new(MeanSquaredError), mode);
        let data = std::iter::repeat((input_data.clone(), output_data.clone()));
        model.fit(self.session(), data, 1)?;
        Ok(())
    }
}
