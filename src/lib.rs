//! # Strata Library
//!
//! Thematic clustering of note embeddings: UMAP reduction, HDBSCAN density
//! clustering and metadata enrichment, with incremental updates between runs.

pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub mod processing;
pub mod storage;
pub mod ui;

pub use config::StrataConfig;
pub use error::{Result, StrataError};
pub use processing::ClusteringPipeline;
