//! Value-free placeholder tensors used to probe shape inference.

use super::dtype::DType;
use super::host_tensor::Tensor;
use super::shape::Shape;

/// Placeholder carrying only shape, dtype, and sparsity metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicTensor {
    shape: Shape,
    dtype: DType,
    sparse: bool,
}

impl SymbolicTensor {
    pub fn new(shape: impl Into<Shape>, dtype: DType, sparse: bool) -> Self {
        Self {
            shape: shape.into(),
            dtype,
            sparse,
        }
    }

    /// Dense placeholder of the given shape and dtype.
    pub fn dense(shape: impl Into<Shape>, dtype: DType) -> Self {
        Self::new(shape, dtype, false)
    }

    /// Placeholder mirroring the metadata of a concrete tensor.
    pub fn like(tensor: &Tensor) -> Self {
        Self::new(tensor.shape().clone(), tensor.dtype(), tensor.is_sparse())
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    pub fn with_dtype(&self, dtype: DType) -> Self {
        Self {
            dtype,
            ..self.clone()
        }
    }

    pub fn with_shape(&self, shape: impl Into<Shape>) -> Self {
        Self {
            shape: shape.into(),
            ..self.clone()
        }
    }
}

/// Metadata shared by concrete tensors and placeholders.
pub trait TensorLike {
    fn shape(&self) -> &Shape;
    fn dtype(&self) -> DType;
    fn is_sparse(&self) -> bool;
    /// Whether the value is a placeholder rather than a computed tensor.
    fn is_placeholder(&self) -> bool;
}

impl TensorLike for Tensor {
    fn shape(&self) -> &Shape {
        Tensor::shape(self)
    }

    fn dtype(&self) -> DType {
        Tensor::dtype(self)
    }

    fn is_sparse(&self) -> bool {
        Tensor::is_sparse(self)
    }

    fn is_placeholder(&self) -> bool {
        false
    }
}

impl TensorLike for SymbolicTensor {
    fn shape(&self) -> &Shape {
        &self.shape
    }

    fn dtype(&self) -> DType {
        self.dtype
    }

    fn is_sparse(&self) -> bool {
        self.sparse
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}
