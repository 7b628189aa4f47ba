//! Layer conformance verification.
//!
//! [`TestCase`] owns the per-test state (session, backend handle, object registry, scratch
//! directories) and exposes the approximate comparators, the class serialization round-trip
//! check, and [`TestCase::run_layer_test`], which drives a [`LayerTest`] through validation,
//! serialization, masking, build, symbolic-call, and eager-call phases.

mod case;
mod comparators;
mod error;
mod layer_test;
mod synthetic;
mod tolerance;

pub use case::TestCase;
pub use comparators::{
    assert_all_close, assert_all_equal, assert_almost_equal, assert_len, assert_not_all_close,
    IntoHostArray, DEFAULT_DECIMAL,
};
pub use error::{ConformanceError, ConformanceResult};
pub use layer_test::LayerTest;
pub use synthetic::{create_eager_tensors, create_placeholders, sparse_sample, STANDARD_DTYPES};
pub use tolerance::Tolerance;
