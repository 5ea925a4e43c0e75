//! Windowed tabularization of MEDS event streams into sparse feature matrices,
//! with a streaming iterator for training gradient-boosted models on them.

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod error;
pub mod filter;
pub mod iterator;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod sparse;
pub mod store;
pub mod training;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::TabularizeConfig;
pub use error::{Result, TabularError};
pub use schema::{Aggregation, FeatureKind, WindowSize};
pub use sparse::CsrMatrix;

// Tabularization
pub use aggregate::{StaticMatrices, build_static, summarize_window};
pub use catalog::{FeatureCatalog, FeatureFrequencies, build_catalog};
pub use models::{EventRecord, EventStream, LabelTable, ShardManifest};
pub use pipeline::Pipeline;
pub use store::{ArtifactCache, CacheOutcome, TabularLayout, read_matrix, write_matrix};

// Training
pub use iterator::{DataIter, InMemoryIter, InclusionSet, IterStatus, ShardBatch, ShardIterator};
pub use training::{Booster, Trainer, TrainingReport, roc_auc};
