//! Row filtering for Arrow record batches read from event shards.

pub mod core;
pub mod patient;

pub use self::core::{BatchFilter, filter_record_batch};
pub use patient::PatientFilter;
