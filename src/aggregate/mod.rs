//! Feature aggregation
//!
//! Windowed aggregation of time-varying observations and per-patient static
//! features, both producing sparse matrices over catalog columns.

pub mod rolling;
pub mod static_features;

pub use rolling::summarize_window;
pub use static_features::{StaticMatrices, build_static};
