//! Core domain types

pub mod cluster;
pub mod embedding;
pub mod hash;
pub mod note;
pub mod state;

pub use cluster::{Cluster, ClusterSummary, ClusteringResult, ClusteringStats, NAMING_SCHEMA_VERSION};
pub use hash::ContentHash;
pub use note::{validate_notes, MetadataIndex, MetadataProvider, NoteEmbedding, NoteLink, NoteMetadata};
pub use state::{ClusteringState, STATE_VERSION};
