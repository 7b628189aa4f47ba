//! Coordinate-format storage for sparse tensors.

use anyhow::{ensure, Result};

use super::shape::Shape;

/// COO payload: one coordinate tuple per stored value, sorted in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseCoo {
    /// Flattened `nnz x rank` coordinate matrix.
    indices: Vec<usize>,
    values: Vec<f64>,
    rank: usize,
}

impl SparseCoo {
    /// Builds a COO payload from explicit coordinates, validating them against `shape`.
    pub fn new(shape: &Shape, indices: Vec<usize>, values: Vec<f64>) -> Result<Self> {
        let rank = shape.rank();
        ensure!(
            indices.len() == values.len() * rank,
            "sparse indices length {} does not match {} values of rank {}",
            indices.len(),
            values.len(),
            rank
        );
        for coords in indices.chunks(rank.max(1)).take(values.len()) {
            for (axis, (&coord, &dim)) in coords.iter().zip(shape.dims()).enumerate() {
                ensure!(
                    coord < dim,
                    "sparse coordinate {coord} out of bounds for axis {axis} of shape {shape}"
                );
            }
        }
        Ok(Self {
            indices,
            values,
            rank,
        })
    }

    /// Collects the non-zero entries of a dense row-major buffer.
    pub(crate) fn from_dense(shape: &Shape, dense: &[f64]) -> Self {
        let rank = shape.rank();
        let strides = shape.strides();
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (offset, &value) in dense.iter().enumerate() {
            if value == 0.0 {
                continue;
            }
            let mut remainder = offset;
            for stride in &strides {
                indices.push(remainder / stride);
                remainder %= stride;
            }
            values.push(value);
        }
        Self {
            indices,
            values,
            rank,
        }
    }

    /// Scatters the stored values into a dense row-major buffer.
    pub(crate) fn to_dense(&self, shape: &Shape) -> Vec<f64> {
        let strides = shape.strides();
        let mut dense = vec![0.0; shape.num_elements()];
        for (coords, &value) in self.coordinates().zip(self.values.iter()) {
            let offset: usize = coords.iter().zip(&strides).map(|(c, s)| c * s).sum();
            dense[offset] += value;
        }
        dense
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    /// Iterates over the coordinate tuple of every stored value.
    pub fn coordinates(&self) -> impl Iterator<Item = &[usize]> + '_ {
        let rank = self.rank;
        (0..self.values.len()).map(move |i| &self.indices[i * rank..(i + 1) * rank])
    }
}
