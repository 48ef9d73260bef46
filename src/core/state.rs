//! Persisted clustering snapshot

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cluster::Cluster;
use super::hash::ContentHash;
use crate::error::{Result, StrataError};

/// Bumped whenever the persisted layout changes
pub const STATE_VERSION: u32 = 1;

/// Everything the next run needs to decide between a full and an
/// incremental pass. Runs never edit a state; they produce a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringState {
	pub version: u32,
	pub note_hashes: BTreeMap<String, ContentHash>,
	pub clusters: Vec<Cluster>,
	/// Reduced-space position of every note placed by the reducer
	pub reduced_embeddings: BTreeMap<String, Vec<f32>>,
	pub last_full_clustering_at: DateTime<Utc>,
	/// Next id handed to a cluster with no predecessor
	pub next_cluster_id: usize,
}

impl ClusteringState {
	pub fn empty(now: DateTime<Utc>) -> Self {
		Self {
			version: STATE_VERSION,
			note_hashes: BTreeMap::new(),
			clusters: Vec::new(),
			reduced_embeddings: BTreeMap::new(),
			last_full_clustering_at: now,
			next_cluster_id: 0,
		}
	}

	pub fn note_count(&self) -> usize {
		self.note_hashes.len()
	}

	/// Whether a reducer ran for this snapshot. Snapshots of corpora below
	/// `minNotesForClustering` record hashes only.
	pub fn is_clustered(&self) -> bool {
		!self.reduced_embeddings.is_empty()
	}

	/// Notes known to the state that belong to no cluster
	pub fn noise_notes(&self) -> BTreeSet<&str> {
		let clustered: HashSet<&str> = self
			.clusters
			.iter()
			.flat_map(|c| c.note_ids.iter().map(String::as_str))
			.collect();
		self.note_hashes
			.keys()
			.map(String::as_str)
			.filter(|path| !clustered.contains(path))
			.collect()
	}

	/// Checks that the snapshot can seed an incremental run.
	///
	/// `dim` is the dimension of the current run's embeddings.
	pub fn check_consistency(&self, dim: usize) -> Result<()> {
		if self.version != STATE_VERSION {
			return Err(StrataError::state(format!(
				"State version {} is not supported (expected {})",
				self.version, STATE_VERSION
			)));
		}

		let mut seen: HashSet<&str> = HashSet::new();
		let mut ids: HashSet<usize> = HashSet::new();
		for cluster in &self.clusters {
			if !ids.insert(cluster.id) {
				return Err(StrataError::state(format!("Duplicate cluster id {}", cluster.id)));
			}
			if cluster.is_empty() {
				return Err(StrataError::state(format!("Cluster {} has no members", cluster.id)));
			}
			if cluster.id >= self.next_cluster_id {
				return Err(StrataError::state(format!(
					"Cluster id {} is not below nextClusterId {}",
					cluster.id, self.next_cluster_id
				)));
			}
			if cluster.centroid.len() != dim {
				return Err(StrataError::state(format!(
					"Cluster {} centroid has dimension {}, embeddings have {}",
					cluster.id,
					cluster.centroid.len(),
					dim
				)));
			}
			for path in &cluster.note_ids {
				if !self.note_hashes.contains_key(path) {
					return Err(StrataError::state(format!(
						"Cluster {} member {} has no recorded hash",
						cluster.id, path
					)));
				}
				if !seen.insert(path.as_str()) {
					return Err(StrataError::state(format!(
						"Note {} belongs to more than one cluster",
						path
					)));
				}
			}
		}

		Ok(())
	}
}
