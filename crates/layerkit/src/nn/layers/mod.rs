//! Built-in layers, registered in [`crate::saving::LAYER_CLASSES`] at link time.

mod activity_regularization;
mod add;
mod attention;
mod batch_norm;
mod dense;
mod dropout;
mod embedding;
mod identity;
mod masking;
mod time_distributed;

pub use activity_regularization::ActivityRegularization;
pub use add::Add;
pub use attention::DotProductAttention;
pub use batch_norm::BatchNormalization;
pub use dense::Dense;
pub use dropout::Dropout;
pub use embedding::Embedding;
pub use identity::Identity;
pub use masking::Masking;
pub use time_distributed::TimeDistributed;

/// Module path recorded in the serialized form of built-in layers.
pub const MODULE: &str = "layerkit.layers";
