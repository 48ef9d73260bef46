//! Cluster data structures

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Bumped whenever [`ClusterSummary`] changes shape
pub const NAMING_SCHEMA_VERSION: u32 = 1;

/// A thematic group of notes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
	/// Stable across incremental runs; reconciled across full runs
	pub id: usize,
	pub note_ids: BTreeSet<String>,
	/// Mean of the members' original-space embeddings
	pub centroid: Vec<f32>,
	/// Members closest to the centroid, closest first
	pub representative_notes: Vec<String>,
	pub dominant_tags: Vec<String>,
	pub folder_path: Option<String>,
	pub candidate_names: Vec<String>,
	/// Directed member-to-member links over `n * (n - 1)`, in [0, 1]
	pub internal_link_density: f32,
	pub created_at: DateTime<Utc>,
}

impl Cluster {
	/// A cluster with membership only; centroid and enrichment are filled in later
	pub fn new(id: usize, note_ids: BTreeSet<String>, created_at: DateTime<Utc>) -> Self {
		Self {
			id,
			note_ids,
			centroid: Vec::new(),
			representative_notes: Vec::new(),
			dominant_tags: Vec::new(),
			folder_path: None,
			candidate_names: Vec::new(),
			internal_link_density: 0.0,
			created_at,
		}
	}

	pub fn len(&self) -> usize {
		self.note_ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.note_ids.is_empty()
	}

	pub fn contains(&self, path: &str) -> bool {
		self.note_ids.contains(path)
	}

	/// The record handed to the concept-naming layer
	pub fn summary(&self) -> ClusterSummary {
		ClusterSummary {
			schema_version: NAMING_SCHEMA_VERSION,
			id: self.id,
			candidate_names: self.candidate_names.clone(),
			representative_notes: self.representative_notes.clone(),
			dominant_tags: self.dominant_tags.clone(),
			folder_path: self.folder_path.clone(),
			note_count: self.note_ids.len(),
		}
	}
}

/// Stable schema consumed by concept naming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSummary {
	pub schema_version: u32,
	pub id: usize,
	pub candidate_names: Vec<String>,
	pub representative_notes: Vec<String>,
	pub dominant_tags: Vec<String>,
	pub folder_path: Option<String>,
	pub note_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringStats {
	pub total_notes: usize,
	pub cluster_count: usize,
	pub noise_count: usize,
	pub was_incremental: bool,
}

/// Output of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringResult {
	pub clusters: Vec<Cluster>,
	pub noise_notes: Vec<String>,
	pub stats: ClusteringStats,
}

impl ClusteringResult {
	pub fn new(clusters: Vec<Cluster>, noise_notes: Vec<String>, was_incremental: bool) -> Self {
		let stats = ClusteringStats {
			total_notes: clusters.iter().map(|c| c.len()).sum::<usize>() + noise_notes.len(),
			cluster_count: clusters.len(),
			noise_count: noise_notes.len(),
			was_incremental,
		};
		Self {
			clusters,
			noise_notes,
			stats,
		}
	}

	pub fn noise_percent(&self) -> f32 {
		if self.stats.total_notes == 0 {
			0.0
		} else {
			(self.noise_notes.len() as f32 / self.stats.total_notes as f32) * 100.0
		}
	}

	pub fn summaries(&self) -> Vec<ClusterSummary> {
		self.clusters.iter().map(Cluster::summary).collect()
	}

	/// Every input path must sit in exactly one cluster or in the noise list
	pub fn verify_partition<'a>(&self, inputs: impl IntoIterator<Item = &'a str>) -> Result<()> {
		let expected: HashSet<&str> = inputs.into_iter().collect();
		let mut seen: HashSet<&str> = HashSet::with_capacity(expected.len());

		let placed = self
			.clusters
			.iter()
			.flat_map(|c| c.note_ids.iter())
			.chain(self.noise_notes.iter());

		for path in placed {
			if !seen.insert(path.as_str()) {
				return Err(StrataError::computation(format!(
					"Note {} was placed more than once",
					path
				)));
			}
			if !expected.contains(path.as_str()) {
				return Err(StrataError::computation(format!(
					"Note {} is not part of the input",
					path
				)));
			}
		}

		if seen.len() != expected.len() {
			return Err(StrataError::computation(format!(
				"{} input notes were neither clustered nor marked as noise",
				expected.len() - seen.len()
			)));
		}

		for cluster in &self.clusters {
			if cluster
				.representative_notes
				.iter()
				.any(|r| !cluster.note_ids.contains(r))
			{
				return Err(StrataError::computation(format!(
					"Cluster {} has a representative outside its members",
					cluster.id
				)));
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cluster(id: usize, members: &[&str]) -> Cluster {
		Cluster::new(
			id,
			members.iter().map(|m| m.to_string()).collect(),
			Utc::now(),
		)
	}

	#[test]
	fn test_stats_follow_contents() {
		let result = ClusteringResult::new(
			vec![cluster(0, &["a", "b"]), cluster(1, &["c"])],
			vec!["d".into()],
			true,
		);

		assert_eq!(result.stats.total_notes, 4);
		assert_eq!(result.stats.cluster_count, 2);
		assert_eq!(result.stats.noise_count, 1);
		assert!(result.stats.was_incremental);
		assert!((result.noise_percent() - 25.0).abs() < 1e-4);
	}

	#[test]
	fn test_verify_partition() {
		let ok = ClusteringResult::new(vec![cluster(0, &["a", "b"])], vec!["c".into()], false);
		assert!(ok.verify_partition(["a", "b", "c"]).is_ok());

		let duplicated = ClusteringResult::new(vec![cluster(0, &["a", "b"])], vec!["b".into()], false);
		assert!(duplicated.verify_partition(["a", "b"]).is_err());

		let missing = ClusteringResult::new(vec![cluster(0, &["a"])], vec![], false);
		assert!(missing.verify_partition(["a", "b"]).is_err());

		let foreign = ClusteringResult::new(vec![cluster(0, &["a", "z"])], vec![], false);
		assert!(foreign.verify_partition(["a"]).is_err());
	}

	#[test]
	fn test_summary_schema() {
		let mut c = cluster(7, &["math/a.md", "math/b.md"]);
		c.candidate_names = vec!["fourier".into()];
		c.folder_path = Some("math".into());

		let json = serde_json::to_value(c.summary()).unwrap();
		assert_eq!(json["schemaVersion"], NAMING_SCHEMA_VERSION);
		assert_eq!(json["noteCount"], 2);
		assert_eq!(json["candidateNames"][0], "fourier");
		assert_eq!(json["folderPath"], "math");
		assert!(json.get("representativeNotes").is_some());
		assert!(json.get("dominantTags").is_some());
	}
}
