//! Change detection and incremental cluster maintenance

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::centroid::find_nearest_centroid;
use super::enrich::Enricher;
use super::umap::ReducedPoint;
use crate::core::embedding::cosine_similarity;
use crate::core::{Cluster, ClusteringState, ContentHash, MetadataProvider, NoteEmbedding};
use crate::ui;

/// How the current corpus differs from the previous snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
	pub new_notes: Vec<String>,
	pub modified_notes: Vec<String>,
	pub removed_notes: Vec<String>,
	pub unchanged_notes: Vec<String>,
	/// Changed notes over previously known notes
	pub change_ratio: f32,
	pub should_use_incremental: bool,
}

impl ChangeSet {
	pub fn changed_count(&self) -> usize {
		self.new_notes.len() + self.modified_notes.len() + self.removed_notes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.changed_count() == 0
	}

	/// Notes that need a (new) cluster assignment
	pub fn to_assign(&self) -> impl Iterator<Item = &str> {
		self.new_notes
			.iter()
			.chain(self.modified_notes.iter())
			.map(String::as_str)
	}

	/// Notes whose previous membership no longer holds
	pub fn to_detach(&self) -> impl Iterator<Item = &str> {
		self.removed_notes
			.iter()
			.chain(self.modified_notes.iter())
			.map(String::as_str)
	}
}

/// Classify notes against the previous snapshot.
///
/// Incremental mode needs a previous state that went through clustering and
/// a change ratio strictly below `threshold`.
pub fn detect_changes(
	current: &BTreeMap<String, ContentHash>,
	previous: Option<&ClusteringState>,
	threshold: f32,
) -> ChangeSet {
	let Some(previous) = previous.filter(|p| p.note_count() > 0 && p.is_clustered()) else {
		return ChangeSet {
			new_notes: current.keys().cloned().collect(),
			change_ratio: 1.0,
			..Default::default()
		};
	};

	let mut changes = ChangeSet::default();
	for (path, hash) in current {
		match previous.note_hashes.get(path) {
			None => changes.new_notes.push(path.clone()),
			Some(old) if old != hash => changes.modified_notes.push(path.clone()),
			Some(_) => changes.unchanged_notes.push(path.clone()),
		}
	}
	changes.removed_notes = previous
		.note_hashes
		.keys()
		.filter(|path| !current.contains_key(*path))
		.cloned()
		.collect();

	changes.change_ratio = changes.changed_count() as f32 / previous.note_count() as f32;
	changes.should_use_incremental = changes.change_ratio < threshold;

	ui::debug(&format!(
		"Changes: {} new, {} modified, {} removed ({:.1}% of {})",
		changes.new_notes.len(),
		changes.modified_notes.len(),
		changes.removed_notes.len(),
		changes.change_ratio * 100.0,
		previous.note_count()
	));

	changes
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
	/// Note path and the id of the cluster it joins
	pub assigned: Vec<(String, usize)>,
	pub unassigned: Vec<String>,
	pub similarity_evaluations: usize,
}

/// Attach each note to the cluster with the most similar centroid, if that
/// similarity reaches `min_similarity`
pub fn assign_notes_to_clusters(
	notes: &[(&str, &[f32])],
	clusters: &[Cluster],
	min_similarity: f32,
) -> Assignment {
	let centroids: Vec<(usize, &[f32])> = clusters
		.iter()
		.map(|c| (c.id, c.centroid.as_slice()))
		.collect();

	let mut assignment = Assignment::default();
	for (path, embedding) in notes {
		assignment.similarity_evaluations += centroids.len();
		match find_nearest_centroid(embedding, &centroids) {
			Some((id, similarity)) if similarity >= min_similarity => {
				assignment.assigned.push((path.to_string(), id));
			}
			_ => assignment.unassigned.push(path.to_string()),
		}
	}

	assignment
}

/// Unchanged notes whose cached positions anchor the placement of `incoming`.
///
/// For each incoming note the clusters are visited from the most similar
/// centroid down, taking evenly spread members until `limit` notes are
/// collected. With no cluster left the unchanged notes themselves are
/// sampled. Also returns the number of centroid comparisons made.
pub fn reference_candidates(
	incoming: &[(&str, &[f32])],
	clusters: &[Cluster],
	changes: &ChangeSet,
	limit: usize,
) -> (Vec<String>, usize) {
	let stale: HashSet<&str> = changes.to_detach().collect();
	let mut chosen: BTreeSet<String> = BTreeSet::new();
	let mut comparisons = 0;

	for (_, embedding) in incoming {
		comparisons += clusters.len();
		let mut ranked: Vec<(f32, &Cluster)> = clusters
			.iter()
			.map(|c| (cosine_similarity(embedding, &c.centroid), c))
			.collect();
		ranked.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

		let mut taken = 0;
		for (_, cluster) in ranked {
			if taken >= limit {
				break;
			}
			let members: Vec<&str> = cluster
				.note_ids
				.iter()
				.map(String::as_str)
				.filter(|p| !stale.contains(p))
				.collect();
			for path in spread(&members, limit - taken) {
				chosen.insert(path.to_string());
				taken += 1;
			}
		}
	}

	if chosen.is_empty() {
		let unchanged: Vec<&str> = changes.unchanged_notes.iter().map(String::as_str).collect();
		chosen.extend(spread(&unchanged, limit).into_iter().map(str::to_string));
	}

	(chosen.into_iter().collect(), comparisons)
}

/// At most `count` items, evenly spaced over `items`
fn spread<'a>(items: &[&'a str], count: usize) -> Vec<&'a str> {
	if items.len() <= count {
		return items.to_vec();
	}
	(0..count).map(|i| items[i * items.len() / count]).collect()
}

/// What an incremental update did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
	/// Centroid comparisons made; changed notes times surviving clusters
	pub similarity_evaluations: usize,
	/// Comparisons made placing changed notes in the reduced space: centroid
	/// ranking plus the bounded neighbor search
	pub reference_evaluations: usize,
	pub touched_clusters: Vec<usize>,
	pub assigned: usize,
	pub unassigned: usize,
	pub dissolved_clusters: Vec<usize>,
}

/// Apply a change set to the previous clusters.
///
/// Removed and modified notes leave their clusters first; clusters emptied
/// by that are dissolved. New and modified notes are then matched against
/// the surviving clusters' centroids. Only clusters whose membership changed
/// are recomputed; the rest are carried over as they were.
pub fn apply_incremental_update<M: MetadataProvider + ?Sized>(
	previous: &[Cluster],
	changes: &ChangeSet,
	notes: &[NoteEmbedding],
	enricher: &Enricher<'_, M>,
	min_similarity: f32,
) -> (Vec<Cluster>, UpdateReport) {
	let detach: HashSet<&str> = changes.to_detach().collect();

	let mut touched: HashSet<usize> = HashSet::new();
	let mut dissolved = Vec::new();
	let mut clusters: Vec<Cluster> = Vec::with_capacity(previous.len());

	for cluster in previous {
		let mut cluster = cluster.clone();
		let before = cluster.len();
		cluster.note_ids.retain(|path| !detach.contains(path.as_str()));

		if cluster.is_empty() {
			dissolved.push(cluster.id);
			continue;
		}
		if cluster.len() != before {
			touched.insert(cluster.id);
		}
		clusters.push(cluster);
	}

	let embeddings: HashMap<&str, &[f32]> = notes
		.iter()
		.map(|n| (n.path.as_str(), n.embedding.as_slice()))
		.collect();
	let incoming: Vec<(&str, &[f32])> = changes
		.to_assign()
		.filter_map(|path| embeddings.get(path).map(|e| (path, *e)))
		.collect();

	let assignment = assign_notes_to_clusters(&incoming, &clusters, min_similarity);

	let index: HashMap<usize, usize> = clusters
		.iter()
		.enumerate()
		.map(|(i, c)| (c.id, i))
		.collect();
	for (path, id) in &assignment.assigned {
		if let Some(&i) = index.get(id) {
			clusters[i].note_ids.insert(path.clone());
			touched.insert(*id);
		}
	}

	let (dirty, clean): (Vec<(usize, Cluster)>, Vec<(usize, Cluster)>) = clusters
		.into_iter()
		.enumerate()
		.partition(|(_, c)| touched.contains(&c.id));

	let (positions, dirty): (Vec<usize>, Vec<Cluster>) = dirty.into_iter().unzip();
	let refreshed = enricher.refresh_all(dirty);

	let mut merged: Vec<(usize, Cluster)> = clean;
	merged.extend(positions.into_iter().zip(refreshed));
	merged.sort_by_key(|(i, _)| *i);

	let clusters: Vec<Cluster> = merged.into_iter().map(|(_, c)| c).collect();

	let mut touched_clusters: Vec<usize> = touched.into_iter().collect();
	touched_clusters.sort_unstable();

	let report = UpdateReport {
		similarity_evaluations: assignment.similarity_evaluations,
		reference_evaluations: 0,
		touched_clusters,
		assigned: assignment.assigned.len(),
		unassigned: assignment.unassigned.len(),
		dissolved_clusters: dissolved,
	};

	ui::debug(&format!(
		"Incremental update: {} assigned, {} unassigned, {} clusters touched, {} dissolved",
		report.assigned,
		report.unassigned,
		report.touched_clusters.len(),
		report.dissolved_clusters.len()
	));

	(clusters, report)
}

/// The snapshot following an incremental update.
///
/// Hashes come from the current notes. Cached positions of unchanged notes
/// are kept and `placed` adds the positions of the notes just placed.
pub fn update_clustering_state(
	previous: &ClusteringState,
	notes: &[NoteEmbedding],
	clusters: Vec<Cluster>,
	placed: Vec<ReducedPoint>,
	changes: &ChangeSet,
) -> ClusteringState {
	let note_hashes: BTreeMap<String, ContentHash> = notes
		.iter()
		.map(|n| (n.path.clone(), n.content_hash.clone()))
		.collect();

	let stale: HashSet<&str> = changes.to_detach().collect();
	let mut reduced_embeddings: BTreeMap<String, Vec<f32>> = previous
		.reduced_embeddings
		.iter()
		.filter(|(path, _)| !stale.contains(path.as_str()) && note_hashes.contains_key(*path))
		.map(|(path, position)| (path.clone(), position.clone()))
		.collect();
	reduced_embeddings.extend(placed);

	ClusteringState {
		version: previous.version,
		note_hashes,
		clusters,
		reduced_embeddings,
		last_full_clustering_at: previous.last_full_clustering_at,
		next_cluster_id: previous.next_cluster_id,
	}
}
