use std::sync::Arc;

use layerkit::structure::Structure;
use layerkit::tensor::{DType, Shape};
use layerkit::testing::{
    create_eager_tensors, create_placeholders, sparse_sample, ConformanceError, STANDARD_DTYPES,
};
use layerkit::Backend;
use layerkit_backend_ref_cpu::CpuBackend;

#[test]
fn sparse_sample_is_deterministic_and_partly_zero() {
    let shape = Shape::new([10, 10]);
    let a = sparse_sample(&shape, DType::F32).unwrap();
    let b = sparse_sample(&shape, DType::F32).unwrap();
    assert_eq!(a, b);
    let zeros = a.values().iter().filter(|v| **v == 0.0).count();
    assert!(zeros > 10 && zeros < 60, "zeros = {zeros}");
}

#[test]
fn eager_tensors_follow_requested_dtype_and_range() {
    let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new());
    let shape: Structure<Shape> = Structure::Single(Shape::new([4, 3]));
    for dtype in STANDARD_DTYPES {
        let tensors = create_eager_tensors(backend.as_ref(), &shape, dtype, false).unwrap();
        let tensor = tensors.as_single().unwrap();
        assert_eq!(tensor.dtype(), dtype);
        assert_eq!(tensor.shape(), &Shape::new([4, 3]));
        assert!(tensor.values().iter().all(|v| (0.0..=3.0).contains(v)));
    }
}

#[test]
fn non_standard_dtype_is_a_configuration_error() {
    let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new());
    let shape: Structure<Shape> = Structure::Single(Shape::new([2]));
    let err = create_eager_tensors(backend.as_ref(), &shape, DType::Bool, false).unwrap_err();
    assert!(matches!(err, ConformanceError::Config(_)), "{err:?}");
}

#[test]
fn shape_suffix_is_stripped_from_mapping_keys() {
    let backend: Arc<dyn Backend> = Arc::new(CpuBackend::new());
    let shapes = Structure::<Shape>::mapping([
        ("query_shape", Shape::new([1, 2, 3])),
        ("value_shape", Shape::new([1, 4, 3])),
    ]);
    let tensors = create_eager_tensors(backend.as_ref(), &shapes, DType::F32, false).unwrap();
    let keys: Vec<&String> = tensors.as_mapping().unwrap().keys().collect();
    assert_eq!(keys, ["query", "value"]);

    let placeholders = create_placeholders(&shapes, DType::F16, true);
    let query = placeholders.get_with_suffix("query", "").unwrap().as_single().unwrap();
    assert_eq!(query.dtype(), DType::F16);
    assert!(query.is_sparse());
}

#[test]
fn sparse_eager_tensors_need_backend_support() {
    let shape: Structure<Shape> = Structure::Single(Shape::new([3, 3]));
    let sparse_backend: Arc<dyn Backend> = Arc::new(CpuBackend::new());
    let tensors = create_eager_tensors(sparse_backend.as_ref(), &shape, DType::F32, true).unwrap();
    assert!(tensors.as_single().unwrap().is_sparse());

    let dense_backend: Arc<dyn Backend> = Arc::new(CpuBackend::dense());
    match create_eager_tensors(dense_backend.as_ref(), &shape, DType::F32, true) {
        Err(ConformanceError::Unsupported(reason)) => {
            assert_eq!(reason, "sparse is unsupported with backend cpu-dense")
        }
        other => panic!("expected unsupported, got {other:?}"),
    }
}
