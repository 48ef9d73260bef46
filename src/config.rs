//! Application configuration and constants

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

// === Storage ===
pub const STATE_DIR: &str = ".strata";
pub const STATE_EXT: &str = "msgpack";
pub const CONFIG_FILE: &str = "strata.json";

// === Enrichment ===
pub const MAX_DOMINANT_TAGS: usize = 5;
pub const MAX_CANDIDATE_NAMES: usize = 5;
pub const LINK_SAMPLE_LIMIT: usize = 200;
pub const LINK_SAMPLE_SEED: u64 = 0x5eed_11c5;

// === Cluster identity ===
pub const ID_REUSE_MIN_JACCARD: f32 = 0.5;

// === Reducer ===
pub const UMAP_SPREAD: f32 = 1.0;
pub const UMAP_INIT_RANGE: f32 = 10.0;
pub const LARGE_CORPUS: usize = 10_000;
/// Most unchanged notes a changed note is placed against in an update
pub const TRANSFORM_REFERENCE_LIMIT: usize = 32;

/// Distance used when building the neighbor graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
	#[default]
	Cosine,
	Euclidean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UmapConfig {
	pub n_neighbors: usize,
	pub min_dist: f32,
	pub n_components: usize,
	pub metric: Metric,
	/// `None` picks 500 epochs for small corpora and 200 for large ones
	pub n_epochs: Option<usize>,
	pub negative_sample_rate: usize,
	pub learning_rate: f32,
	pub seed: Option<u64>,
}

impl Default for UmapConfig {
	fn default() -> Self {
		Self {
			n_neighbors: 15,
			min_dist: 0.1,
			n_components: 5,
			metric: Metric::Cosine,
			n_epochs: None,
			negative_sample_rate: 5,
			learning_rate: 1.0,
			seed: Some(42),
		}
	}
}

impl UmapConfig {
	pub fn epochs_for(&self, n_samples: usize) -> usize {
		self.n_epochs
			.unwrap_or(if n_samples <= LARGE_CORPUS { 500 } else { 200 })
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HdbscanConfig {
	pub min_cluster_size: usize,
	pub min_samples: usize,
}

impl Default for HdbscanConfig {
	fn default() -> Self {
		Self {
			min_cluster_size: 5,
			min_samples: 3,
		}
	}
}

/// Every recognized clustering option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StrataConfig {
	pub umap: UmapConfig,
	pub hdbscan: HdbscanConfig,
	pub incremental_threshold: f32,
	pub min_notes_for_clustering: usize,
	pub representative_count: usize,
	pub dominant_tag_threshold: f32,
	pub min_assignment_similarity: f32,
}

impl Default for StrataConfig {
	fn default() -> Self {
		Self {
			umap: UmapConfig::default(),
			hdbscan: HdbscanConfig::default(),
			incremental_threshold: 0.05,
			min_notes_for_clustering: 10,
			representative_count: 5,
			dominant_tag_threshold: 0.3,
			min_assignment_similarity: 0.3,
		}
	}
}

impl StrataConfig {
	/// Load a JSON config file; missing keys keep their defaults
	pub fn load(path: &Path) -> Result<Self> {
		let text = fs::read_to_string(path)?;
		let config: Self = serde_json::from_str(&text).map_err(|e| {
			StrataError::configuration(format!("Invalid config {}: {}", path.display(), e))
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Reject out-of-range values before a run touches any data
	pub fn validate(&self) -> Result<()> {
		let umap = &self.umap;
		if umap.n_neighbors < 2 {
			return Err(StrataError::configuration(format!(
				"umap.nNeighbors must be >= 2, got {}",
				umap.n_neighbors
			)));
		}
		if umap.n_components < 1 {
			return Err(StrataError::configuration("umap.nComponents must be >= 1"));
		}
		if !umap.min_dist.is_finite() || umap.min_dist < 0.0 {
			return Err(StrataError::configuration(format!(
				"umap.minDist must be a finite value >= 0, got {}",
				umap.min_dist
			)));
		}
		if !(umap.learning_rate.is_finite() && umap.learning_rate > 0.0) {
			return Err(StrataError::configuration(format!(
				"umap.learningRate must be > 0, got {}",
				umap.learning_rate
			)));
		}
		if umap.n_epochs == Some(0) {
			return Err(StrataError::configuration("umap.nEpochs must be >= 1"));
		}
		if self.hdbscan.min_cluster_size < 1 {
			return Err(StrataError::configuration(
				"hdbscan.minClusterSize must be >= 1",
			));
		}
		if self.hdbscan.min_samples < 1 {
			return Err(StrataError::configuration("hdbscan.minSamples must be >= 1"));
		}
		if !(0.0..=1.0).contains(&self.incremental_threshold) {
			return Err(StrataError::configuration(format!(
				"incrementalThreshold must be in [0, 1], got {}",
				self.incremental_threshold
			)));
		}
		if self.min_notes_for_clustering < 2 {
			return Err(StrataError::configuration(format!(
				"minNotesForClustering must be >= 2, got {}",
				self.min_notes_for_clustering
			)));
		}
		if self.representative_count < 1 {
			return Err(StrataError::configuration("representativeCount must be >= 1"));
		}
		if !(self.dominant_tag_threshold > 0.0 && self.dominant_tag_threshold <= 1.0) {
			return Err(StrataError::configuration(format!(
				"dominantTagThreshold must be in (0, 1], got {}",
				self.dominant_tag_threshold
			)));
		}
		if !(-1.0..=1.0).contains(&self.min_assignment_similarity) {
			return Err(StrataError::configuration(format!(
				"minAssignmentSimilarity must be in [-1, 1], got {}",
				self.min_assignment_similarity
			)));
		}
		Ok(())
	}
}
