use std::fmt;

use super::dtype::DType;
use super::shape::Shape;

/// Dense row-major copy of tensor values that can be inspected on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostArray {
    shape: Shape,
    dtype: DType,
    data: Vec<f64>,
}

impl HostArray {
    pub fn new(shape: Shape, dtype: DType, data: Vec<f64>) -> Self {
        debug_assert_eq!(shape.num_elements(), data.len());
        Self { shape, dtype, data }
    }

    /// Wraps a single value as a rank-0 `F64` array.
    pub fn scalar(value: f64) -> Self {
        Self::new(Shape::scalar(), DType::F64, vec![value])
    }

    /// Wraps a flat list of values as a rank-1 `F64` array.
    pub fn vector(values: Vec<f64>) -> Self {
        Self::new(Shape::new([values.len()]), DType::F64, values)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Display for HostArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array(shape={}, dtype={}, [", self.shape, self.dtype)?;
        for (i, v) in self.data.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("])")
    }
}
