//! terminator-core
//!
//! Data side of TERMinator: protein feature records, the on-disk feature store,
//! length-aware clustering and the batch composer that turns ragged
//! TERM-within-protein data into padded, masked tensors.
pub mod alphabet;
pub mod batch;
pub mod cluster;
pub mod config;
pub mod error;
pub mod graph;
pub mod ragged;
pub mod record;
pub mod store;

pub use alphabet::{
    Alphabet, Residue, ALPHABET, GAP_INDEX, NUM_CANONICAL, NUM_EXTENDED, UNKNOWN_INDEX,
};
pub use batch::{AuxStats, BatchComposer, TermBatch};
pub use cluster::cluster;
pub use config::{BatchConfig, Ordering};
pub use error::{Result, TerminatorError};
pub use ragged::{extend_term_lens, RaggedTerms};
pub use record::{DatasetVariant, ProteinRecord};
pub use store::FeatureStore;
