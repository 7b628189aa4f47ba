//! Approximate and exact comparisons on host-readable arrays.

use crate::backend::spec::Backend;
use crate::structure::Structure;
use crate::tensor::{HostArray, Tensor};

use super::error::{ConformanceError, ConformanceResult};

/// Values that can be read back into a [`HostArray`].
pub trait IntoHostArray {
    fn into_host_array(&self, backend: &dyn Backend) -> ConformanceResult<HostArray>;
}

impl IntoHostArray for HostArray {
    fn into_host_array(&self, _backend: &dyn Backend) -> ConformanceResult<HostArray> {
        Ok(self.clone())
    }
}

impl IntoHostArray for Tensor {
    fn into_host_array(&self, backend: &dyn Backend) -> ConformanceResult<HostArray> {
        Ok(backend.to_host(self)?)
    }
}

impl IntoHostArray for f64 {
    fn into_host_array(&self, _backend: &dyn Backend) -> ConformanceResult<HostArray> {
        Ok(HostArray::scalar(*self))
    }
}

impl IntoHostArray for [f64] {
    fn into_host_array(&self, _backend: &dyn Backend) -> ConformanceResult<HostArray> {
        Ok(HostArray::vector(self.to_vec()))
    }
}

impl IntoHostArray for Vec<f64> {
    fn into_host_array(&self, backend: &dyn Backend) -> ConformanceResult<HostArray> {
        self.as_slice().into_host_array(backend)
    }
}

impl<T: IntoHostArray + ?Sized> IntoHostArray for &T {
    fn into_host_array(&self, backend: &dyn Backend) -> ConformanceResult<HostArray> {
        (**self).into_host_array(backend)
    }
}

/// Pairs elements of two arrays, broadcasting a single-element side.
fn paired(a: &HostArray, b: &HostArray) -> Option<Vec<(f64, f64)>> {
    let (x, y) = (a.data(), b.data());
    if a.shape() == b.shape() {
        return Some(x.iter().copied().zip(y.iter().copied()).collect());
    }
    match (x.len(), y.len()) {
        (1, _) => Some(y.iter().map(|&v| (x[0], v)).collect()),
        (_, 1) => Some(x.iter().map(|&v| (v, y[0])).collect()),
        _ => None,
    }
}

fn shape_mismatch(a: &HostArray, b: &HostArray) -> ConformanceError {
    ConformanceError::mismatch("array shape", a.shape(), b.shape())
}

fn close(x: f64, y: f64, atol: f64, rtol: f64) -> bool {
    if x.is_nan() || y.is_nan() {
        return x.is_nan() && y.is_nan();
    }
    if x.is_infinite() || y.is_infinite() {
        return x == y;
    }
    (x - y).abs() <= atol + rtol * y.abs()
}

/// Asserts `|x1 - x2| <= atol + rtol * |x2|` elementwise; NaNs compare equal.
pub fn assert_all_close<A, B>(
    backend: &dyn Backend,
    x1: &A,
    x2: &B,
    atol: f64,
    rtol: f64,
) -> ConformanceResult<()>
where
    A: IntoHostArray + ?Sized,
    B: IntoHostArray + ?Sized,
{
    let a = x1.into_host_array(backend)?;
    let b = x2.into_host_array(backend)?;
    let pairs = paired(&a, &b).ok_or_else(|| shape_mismatch(&a, &b))?;
    let mut mismatched = 0usize;
    let mut max_abs = 0.0f64;
    for &(x, y) in &pairs {
        if !close(x, y, atol, rtol) {
            mismatched += 1;
            max_abs = max_abs.max((x - y).abs());
        }
    }
    if mismatched == 0 {
        return Ok(());
    }
    Err(ConformanceError::mismatch(
        format!(
            "values (atol={atol}, rtol={rtol}; mismatched elements: {mismatched} / {}, max abs diff: {max_abs})",
            pairs.len()
        ),
        a,
        b,
    ))
}

/// Passes only when [`assert_all_close`] would report a mismatch.
pub fn assert_not_all_close<A, B>(
    backend: &dyn Backend,
    x1: &A,
    x2: &B,
    atol: f64,
    rtol: f64,
) -> ConformanceResult<()>
where
    A: IntoHostArray + ?Sized,
    B: IntoHostArray + ?Sized,
{
    match assert_all_close(backend, x1, x2, atol, rtol) {
        Err(ConformanceError::Mismatch { .. }) => Ok(()),
        Err(other) => Err(other),
        Ok(()) => {
            let values = x1.into_host_array(backend)?;
            Err(ConformanceError::mismatch(
                "closeness",
                "values that differ in at least one element",
                format!("values close at all elements: {values}"),
            ))
        }
    }
}

/// Decimal places [`assert_almost_equal`] callers use when they have no stricter need.
pub const DEFAULT_DECIMAL: i32 = 3;

/// Asserts `|x1 - x2| < 1.5 * 10^-decimal` elementwise.
pub fn assert_almost_equal<A, B>(
    backend: &dyn Backend,
    x1: &A,
    x2: &B,
    decimal: i32,
) -> ConformanceResult<()>
where
    A: IntoHostArray + ?Sized,
    B: IntoHostArray + ?Sized,
{
    let a = x1.into_host_array(backend)?;
    let b = x2.into_host_array(backend)?;
    let pairs = paired(&a, &b).ok_or_else(|| shape_mismatch(&a, &b))?;
    let threshold = 1.5 * 10f64.powi(-decimal);
    let ok = pairs.iter().all(|&(x, y)| {
        if x.is_nan() || y.is_nan() {
            x.is_nan() && y.is_nan()
        } else {
            x == y || (x - y).abs() < threshold
        }
    });
    if ok {
        Ok(())
    } else {
        Err(ConformanceError::mismatch(
            format!("values to {decimal} decimals"),
            a,
            b,
        ))
    }
}

/// Recursive exact equality; sequences must match in length at every level.
pub fn assert_all_equal<A, B>(
    backend: &dyn Backend,
    x1: &Structure<A>,
    x2: &Structure<B>,
) -> ConformanceResult<()>
where
    A: IntoHostArray,
    B: IntoHostArray,
{
    match (x1, x2) {
        (Structure::Single(a), Structure::Single(b)) => {
            let (a, b) = (a.into_host_array(backend)?, b.into_host_array(backend)?);
            if a.shape() == b.shape() && a.data() == b.data() {
                Ok(())
            } else {
                Err(ConformanceError::mismatch("element", a, b))
            }
        }
        (Structure::Sequence(a), Structure::Sequence(b)) => {
            assert_len(b.len(), a.len(), "sequence length")?;
            for (x, y) in a.iter().zip(b) {
                assert_all_equal(backend, x, y)?;
            }
            Ok(())
        }
        (Structure::Mapping(a), Structure::Mapping(b)) => {
            let (ka, kb): (Vec<_>, Vec<_>) = (a.keys().collect(), b.keys().collect());
            if ka != kb {
                return Err(ConformanceError::mismatch(
                    "mapping keys",
                    format!("{ka:?}"),
                    format!("{kb:?}"),
                ));
            }
            for (x, y) in a.values().zip(b.values()) {
                assert_all_equal(backend, x, y)?;
            }
            Ok(())
        }
        (a, b) => Err(ConformanceError::mismatch("structure", a.kind(), b.kind())),
    }
}

/// Asserts a collection length, naming the collection in the failure.
pub fn assert_len(actual: usize, expected: usize, what: &str) -> ConformanceResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(ConformanceError::mismatch(
            format!("number of {what}"),
            expected,
            actual,
        ))
    }
}
