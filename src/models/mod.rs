//! Domain models for MEDS event data
//!
//! Event records as read from shards, the per-instant stream the window
//! aggregator consumes, task label tables and the shard manifest.

pub mod event;
pub mod labels;
pub mod manifest;

pub use event::{EventIndex, EventInstant, EventRecord, EventStream, Observation, check_event_order};
pub use labels::LabelTable;
pub use manifest::ShardManifest;
