//! Host-backed tensor used by layers, backends, and the conformance verifier.

use std::borrow::Cow;

use anyhow::{bail, ensure, Result};

use super::dtype::DType;
use super::host_array::HostArray;
use super::shape::Shape;
use super::sparse::SparseCoo;

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Dense(Vec<f64>),
    Sparse(SparseCoo),
}

/// Host tensor whose values are kept as `f64` already rounded to `dtype`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    storage: Storage,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> Result<Self> {
        let values = data.into_iter().map(f64::from).collect();
        Tensor::from_values(shape, DType::F32, values)
    }

    /// Constructs a dense tensor of `dtype`, rounding every value to that dtype.
    pub fn from_values(shape: impl Into<Shape>, dtype: DType, values: Vec<f64>) -> Result<Self> {
        let shape = shape.into();
        if values.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {}",
                values.len(),
                shape
            );
        }
        let values = values.into_iter().map(|v| dtype.round(v)).collect();
        Ok(Tensor {
            shape,
            dtype,
            storage: Storage::Dense(values),
        })
    }

    /// Constructs a sparse tensor from COO coordinates (flattened `nnz x rank`) and values.
    pub fn sparse(
        shape: impl Into<Shape>,
        dtype: DType,
        indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self> {
        let shape = shape.into();
        let values = values.into_iter().map(|v| dtype.round(v)).collect();
        let coo = SparseCoo::new(&shape, indices, values)?;
        Ok(Tensor {
            shape,
            dtype,
            storage: Storage::Sparse(coo),
        })
    }

    /// Returns a tensor filled with `value`.
    pub fn full(shape: impl Into<Shape>, dtype: DType, value: f64) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        Tensor {
            shape,
            dtype,
            storage: Storage::Dense(vec![dtype.round(value); len]),
        }
    }

    /// Returns a zero-initialized tensor of the requested shape.
    pub fn zeros(shape: impl Into<Shape>, dtype: DType) -> Self {
        Tensor::full(shape, dtype, 0.0)
    }

    /// Returns a one-initialized tensor of the requested shape.
    pub fn ones(shape: impl Into<Shape>, dtype: DType) -> Self {
        Tensor::full(shape, dtype, 1.0)
    }

    /// Rank-0 tensor holding `value`.
    pub fn scalar(value: f64, dtype: DType) -> Self {
        Tensor::full(Shape::scalar(), dtype, value)
    }

    /// Provides access to the tensor shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns the scalar dtype of the tensor payload.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the total number of logical elements.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, Storage::Sparse(_))
    }

    /// COO payload for sparse tensors.
    pub fn as_sparse(&self) -> Option<&SparseCoo> {
        match &self.storage {
            Storage::Sparse(coo) => Some(coo),
            Storage::Dense(_) => None,
        }
    }

    /// Number of explicitly stored values; equals `len()` for dense tensors.
    pub fn nnz(&self) -> usize {
        match &self.storage {
            Storage::Dense(values) => values.len(),
            Storage::Sparse(coo) => coo.nnz(),
        }
    }

    /// Row-major dense values, scattering sparse storage when needed.
    pub fn values(&self) -> Cow<'_, [f64]> {
        match &self.storage {
            Storage::Dense(values) => Cow::Borrowed(values),
            Storage::Sparse(coo) => Cow::Owned(coo.to_dense(&self.shape)),
        }
    }

    /// Mutable access to dense values. Fails for sparse tensors.
    pub fn values_mut(&mut self) -> Result<&mut [f64]> {
        match &mut self.storage {
            Storage::Dense(values) => Ok(values),
            Storage::Sparse(_) => bail!("sparse tensors do not expose mutable dense values"),
        }
    }

    /// Reads the single element of a one-element tensor.
    pub fn item(&self) -> Result<f64> {
        ensure!(
            self.len() == 1,
            "item() requires a single-element tensor, got shape {}",
            self.shape
        );
        Ok(self.values()[0])
    }

    /// Returns a dense copy (a clone for tensors that are already dense).
    pub fn to_dense(&self) -> Tensor {
        match &self.storage {
            Storage::Dense(_) => self.clone(),
            Storage::Sparse(coo) => Tensor {
                shape: self.shape.clone(),
                dtype: self.dtype,
                storage: Storage::Dense(coo.to_dense(&self.shape)),
            },
        }
    }

    /// Converts dense storage into COO, keeping only non-zero entries.
    pub fn to_sparse(&self) -> Tensor {
        match &self.storage {
            Storage::Sparse(_) => self.clone(),
            Storage::Dense(values) => Tensor {
                shape: self.shape.clone(),
                dtype: self.dtype,
                storage: Storage::Sparse(SparseCoo::from_dense(&self.shape, values)),
            },
        }
    }

    /// Converts every element to `dtype`, preserving the storage layout.
    pub fn cast(&self, dtype: DType) -> Tensor {
        let mut out = self.clone();
        out.dtype = dtype;
        let values = match &mut out.storage {
            Storage::Dense(values) => values.as_mut_slice(),
            Storage::Sparse(coo) => coo.values_mut(),
        };
        for v in values {
            *v = dtype.round(*v);
        }
        out
    }

    /// Reinterprets the dense values under a new shape with the same element count.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Tensor> {
        let shape = shape.into();
        ensure!(
            shape.num_elements() == self.len(),
            "cannot reshape tensor of shape {} into {}",
            self.shape,
            shape
        );
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            storage: Storage::Dense(self.values().into_owned()),
        })
    }

    /// Applies `f` to every dense element and rounds the result to the tensor dtype.
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Tensor {
        let values = self.values().iter().map(|&v| self.dtype.round(f(v))).collect();
        Tensor {
            shape: self.shape.clone(),
            dtype: self.dtype,
            storage: Storage::Dense(values),
        }
    }

    /// Copies the tensor into its host-readable dense form.
    pub fn to_host_array(&self) -> HostArray {
        HostArray::new(self.shape.clone(), self.dtype, self.values().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_roundtrip_preserves_values() {
        let dense = Tensor::from_vec([2, 3], vec![0.0, 1.5, 0.0, -2.0, 0.0, 0.0]).unwrap();
        let sparse = dense.to_sparse();
        assert!(sparse.is_sparse());
        assert_eq!(sparse.nnz(), 2);
        assert_eq!(sparse.to_dense(), dense);
    }

    #[test]
    fn cast_keeps_sparse_layout() {
        let sparse = Tensor::sparse([4], DType::F32, vec![1, 3], vec![2.7, -1.2]).unwrap();
        let cast = sparse.cast(DType::I32);
        assert!(cast.is_sparse());
        assert_eq!(cast.values().as_ref(), &[0.0, 2.0, 0.0, -1.0]);
    }

    #[test]
    fn from_values_rejects_length_mismatch() {
        assert!(Tensor::from_values([2, 2], DType::F32, vec![1.0; 3]).is_err());
    }
}
