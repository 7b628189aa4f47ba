//! Placeholder and eager input synthesis from shape structures.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::{ConformanceError, ConformanceResult};
use crate::backend::spec::Backend;
use crate::nn::initializers::standard_normal;
use crate::nn::SHAPE_SUFFIX;
use crate::structure::Structure;
use crate::tensor::{DType, Shape, SymbolicTensor, Tensor};

/// Dtypes eager inputs can be synthesized in.
pub const STANDARD_DTYPES: [DType; 6] = [
    DType::F16,
    DType::F32,
    DType::F64,
    DType::I16,
    DType::I32,
    DType::I64,
];

const SPARSE_SEED: u64 = 0;
const SPARSE_KEEP_PROBABILITY: f64 = 0.7;

/// Placeholders for every shape; top-level mapping keys lose their `_shape` suffix.
pub fn create_placeholders(
    input_shape: &Structure<Shape>,
    dtype: DType,
    sparse: bool,
) -> Structure<SymbolicTensor> {
    input_shape
        .map(|shape| SymbolicTensor::new(shape.clone(), dtype, sparse))
        .strip_key_suffix(SHAPE_SUFFIX)
}

/// Deterministic dense sample with roughly 30% zeros: `4 * N(0, 1)` masked where an
/// independent uniform draw is at least 0.7.
pub fn sparse_sample(shape: &Shape, dtype: DType) -> ConformanceResult<Tensor> {
    let mut rng = StdRng::seed_from_u64(SPARSE_SEED);
    let len = shape.num_elements();
    let normals: Vec<f64> = (0..len)
        .map(|_| dtype.round(4.0 * standard_normal(&mut rng)))
        .collect();
    let values = normals
        .into_iter()
        .map(|v| {
            if rng.gen::<f64>() < SPARSE_KEEP_PROBABILITY {
                v
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::from_values(shape.clone(), dtype, values)?)
}

/// Materialises inputs for every shape in `input_shape`.
///
/// Dense values are `3 * U[0, 1)` drawn by the backend in float32 and cast to `dtype`; sparse
/// values come from [`sparse_sample`] converted to the backend's sparse representation.
pub fn create_eager_tensors(
    backend: &dyn Backend,
    input_shape: &Structure<Shape>,
    dtype: DType,
    sparse: bool,
) -> ConformanceResult<Structure<Tensor>> {
    if !STANDARD_DTYPES.contains(&dtype) {
        return Err(ConformanceError::config(format!(
            "dtype must be a standard float or int dtype, received: dtype={dtype}"
        )));
    }
    if sparse && !backend.supports_sparse() {
        return Err(ConformanceError::Unsupported(format!(
            "sparse is unsupported with backend {}",
            backend.backend_name()
        )));
    }
    let tensors = input_shape.try_map(|shape| -> ConformanceResult<Tensor> {
        if sparse {
            let dense = sparse_sample(shape, dtype)?;
            Ok(backend.sparse_from_dense(&dense)?)
        } else {
            let uniform = backend.random_uniform(shape, DType::F32, 0.0, 1.0)?;
            let scaled = uniform.map(|v| v * 3.0);
            Ok(backend.cast(&scaled, dtype)?)
        }
    })?;
    Ok(tensors.strip_key_suffix(SHAPE_SUFFIX))
}
