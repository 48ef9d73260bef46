// Integration tests for Strata

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use strata::config::{StrataConfig, TRANSFORM_REFERENCE_LIMIT};
use strata::core::{ClusteringResult, ContentHash, MetadataIndex, NoteEmbedding, NoteMetadata};
use strata::storage::{FileStateStore, MemoryStateStore, StateStore};
use strata::{ClusteringPipeline, StrataError};

const DIM: usize = 16;
const TOPICS: [(&str, &str); 3] = [("a", "optics"), ("b", "algebra"), ("c", "history")];

/// `per_blob` notes around each of `blobs` well separated directions
fn blobs(blobs: usize, per_blob: usize, seed: u64) -> (Vec<NoteEmbedding>, MetadataIndex) {
	let mut rng = StdRng::seed_from_u64(seed);
	let mut notes = Vec::new();
	let mut metadata = MetadataIndex::new();

	for (b, (folder, tag)) in TOPICS.iter().enumerate().take(blobs) {
		for i in 0..per_blob {
			let path = format!("{}/note_{:03}.md", folder, i);
			notes.push(blob_note(&path, b, &mut rng));
			metadata.insert_note(
				path,
				NoteMetadata {
					tags: vec![tag.to_string()],
					folder: Some(folder.to_string()),
					title: None,
				},
			);
		}
	}

	(notes, metadata)
}

fn blob_note(path: &str, blob: usize, rng: &mut StdRng) -> NoteEmbedding {
	let mut embedding: Vec<f32> = (0..DIM).map(|_| rng.random_range(-0.08f32..0.08)).collect();
	for d in blob * 5..blob * 5 + 4 {
		embedding[d] += 1.0;
	}
	NoteEmbedding::new(path, embedding, ContentHash::compute(path.as_bytes()))
}

fn fast_config() -> StrataConfig {
	let mut config = StrataConfig::default();
	config.umap.n_epochs = Some(100);
	config
}

fn blob_of(path: &str) -> &str {
	path.split('/').next().unwrap_or("")
}

fn memberships(result: &ClusteringResult) -> Vec<(usize, BTreeSet<String>)> {
	result
		.clusters
		.iter()
		.map(|c| (c.id, c.note_ids.clone()))
		.collect()
}

#[test]
fn test_separated_topics_form_pure_clusters() {
	let (notes, metadata) = blobs(3, 20, 1);
	let mut pipeline = ClusteringPipeline::new(StrataConfig::default());

	let output = pipeline.run("vault", &notes, &metadata, None).unwrap();
	let result = &output.result;

	assert!(!result.stats.was_incremental);
	assert!(result.clusters.len() >= 3, "got {} clusters", result.clusters.len());
	assert!(result.noise_notes.len() <= 12, "{} noise notes", result.noise_notes.len());

	for cluster in &result.clusters {
		let origins: BTreeSet<&str> = cluster.note_ids.iter().map(|p| blob_of(p)).collect();
		assert_eq!(origins.len(), 1, "cluster {} mixes topics", cluster.id);

		let topic = TOPICS
			.iter()
			.find(|(folder, _)| origins.contains(folder))
			.map(|(_, tag)| *tag)
			.unwrap();
		assert_eq!(cluster.dominant_tags, vec![topic.to_string()]);
	}

	let covered: BTreeSet<&str> = result
		.clusters
		.iter()
		.flat_map(|c| c.note_ids.iter().map(|p| blob_of(p)))
		.collect();
	assert_eq!(covered.len(), 3);
}

#[test]
fn test_partition_and_centroids() {
	let (notes, metadata) = blobs(3, 15, 2);
	let config = fast_config();
	let representative_count = config.representative_count;
	let mut pipeline = ClusteringPipeline::new(config);

	let output = pipeline.run("vault", &notes, &metadata, None).unwrap();
	let result = &output.result;

	result
		.verify_partition(notes.iter().map(|n| n.path.as_str()))
		.unwrap();
	assert_eq!(result.stats.total_notes, notes.len());

	let ids: BTreeSet<usize> = result.clusters.iter().map(|c| c.id).collect();
	assert_eq!(ids.len(), result.clusters.len());
	assert!(ids.iter().all(|&id| id < output.state.next_cluster_id));

	for cluster in &result.clusters {
		let mut mean = vec![0.0f32; DIM];
		for note in notes.iter().filter(|n| cluster.contains(&n.path)) {
			for (m, v) in mean.iter_mut().zip(&note.embedding) {
				*m += v / cluster.len() as f32;
			}
		}
		for (m, c) in mean.iter().zip(&cluster.centroid) {
			assert!((m - c).abs() < 1e-4);
		}

		assert!(!cluster.representative_notes.is_empty());
		assert!(cluster.representative_notes.len() <= representative_count);
		assert!(cluster
			.representative_notes
			.iter()
			.all(|r| cluster.contains(r)));
		assert!((0.0..=1.0).contains(&cluster.internal_link_density));
	}

	assert_eq!(output.state.reduced_embeddings.len(), notes.len());
	assert_eq!(output.state.note_hashes.len(), notes.len());
}

#[test]
fn test_same_seed_same_clustering() {
	let (notes, metadata) = blobs(3, 12, 3);

	let first = ClusteringPipeline::new(fast_config())
		.run("vault", &notes, &metadata, None)
		.unwrap();

	let mut reversed = notes.clone();
	reversed.reverse();
	let second = ClusteringPipeline::new(fast_config())
		.run("vault", &reversed, &metadata, None)
		.unwrap();

	assert_eq!(first.result.summaries(), second.result.summaries());
	assert_eq!(first.result.noise_notes, second.result.noise_notes);
	assert_eq!(first.state.reduced_embeddings, second.state.reduced_embeddings);
}

#[test]
fn test_min_notes_boundary() {
	let (notes, metadata) = blobs(1, 10, 4);
	let store = MemoryStateStore::new();
	let mut pipeline = ClusteringPipeline::new(fast_config());

	let below = pipeline
		.run_and_persist(&store, "vault", &notes[..9], &metadata)
		.unwrap();
	assert!(below.result.clusters.is_empty());
	assert_eq!(below.result.noise_notes.len(), 9);
	assert!(below.state.reduced_embeddings.is_empty());

	let at = pipeline
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();
	assert!(!at.result.stats.was_incremental);
	assert_eq!(at.state.reduced_embeddings.len(), 10);
	at.result
		.verify_partition(notes.iter().map(|n| n.path.as_str()))
		.unwrap();
}

#[test]
fn test_invalid_embedding_leaves_state_untouched() {
	let (notes, metadata) = blobs(3, 10, 5);
	let store = MemoryStateStore::new();
	let mut pipeline = ClusteringPipeline::new(fast_config());
	pipeline
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();
	let before = store.load("vault").unwrap();

	let mut broken = notes.clone();
	broken[7].embedding[3] = f32::NAN;
	let err = pipeline
		.run_and_persist(&store, "vault", &broken, &metadata)
		.unwrap_err();

	assert!(matches!(err, StrataError::Data { .. }));
	assert_eq!(store.load("vault").unwrap(), before);
}

#[test]
fn test_incremental_run_after_restart() {
	let (mut notes, metadata) = blobs(3, 20, 6);
	let store = MemoryStateStore::new();

	let full = ClusteringPipeline::new(fast_config())
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();
	assert!(!full.result.clusters.is_empty());

	let mut rng = StdRng::seed_from_u64(60);
	notes.push(blob_note("a/late_addition.md", 0, &mut rng));

	// A fresh pipeline has no reducer in memory and rebuilds it from the state
	let mut restarted = ClusteringPipeline::new(fast_config());
	let update = restarted
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();

	assert!(update.result.stats.was_incremental);
	let report = update.report.as_ref().unwrap();
	assert_eq!(report.similarity_evaluations, full.result.clusters.len());
	assert!(report.reference_evaluations > 0);
	// The update places notes against cached positions and fits nothing
	assert!(!restarted.reducer("vault").unwrap().is_fitted());

	let home = update
		.result
		.clusters
		.iter()
		.find(|c| c.contains("a/late_addition.md"))
		.expect("new note should join a cluster");
	assert!(home.note_ids.iter().all(|p| blob_of(p) == "a"));
	assert!(full.result.clusters.iter().any(|c| c.id == home.id));

	// Clusters the new note did not touch keep id and membership
	for cluster in full.result.clusters.iter().filter(|c| c.id != home.id) {
		let after = update.result.clusters.iter().find(|c| c.id == cluster.id).unwrap();
		assert_eq!(after.note_ids, cluster.note_ids);
	}

	assert!(update.state.reduced_embeddings.contains_key("a/late_addition.md"));
	assert_eq!(update.state.last_full_clustering_at, full.state.last_full_clustering_at);
	update
		.result
		.verify_partition(notes.iter().map(|n| n.path.as_str()))
		.unwrap();
	assert_eq!(store.load("vault").unwrap(), Some(update.state));
}

#[test]
fn test_update_cost_does_not_grow_with_corpus() {
	let mut config = fast_config();
	config.incremental_threshold = 0.1;
	config.umap.n_neighbors = 5;
	config.hdbscan.min_cluster_size = 3;

	let mut evaluations = Vec::new();
	let mut placements = Vec::new();
	for per_blob in [10, 100] {
		let (mut notes, metadata) = blobs(2, per_blob, 7);
		let store = MemoryStateStore::new();
		let mut pipeline = ClusteringPipeline::new(config.clone());

		let full = pipeline
			.run_and_persist(&store, "vault", &notes, &metadata)
			.unwrap();
		let clusters = full.result.clusters.len();
		assert!(clusters > 0);

		let mut rng = StdRng::seed_from_u64(70);
		notes.push(blob_note("b/extra.md", 1, &mut rng));
		let update = pipeline
			.run_and_persist(&store, "vault", &notes, &metadata)
			.unwrap();

		assert!(update.result.stats.was_incremental);
		let report = update.report.unwrap();
		assert_eq!(report.similarity_evaluations, clusters);
		evaluations.push(report.similarity_evaluations);
		placements.push(report.reference_evaluations);
	}

	assert!(evaluations.iter().all(|&e| e <= 10));
	// One changed note: centroid ranking plus at most the reference limit,
	// whether the corpus has 20 notes or 200
	assert!(
		placements.iter().all(|&e| e > 0 && e <= 10 + TRANSFORM_REFERENCE_LIMIT),
		"{:?}",
		placements
	);
}

#[test]
fn test_large_change_runs_full_clustering() {
	let (notes, metadata) = blobs(3, 15, 8);
	let store = MemoryStateStore::new();
	let mut pipeline = ClusteringPipeline::new(fast_config());
	pipeline
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();

	let kept: Vec<NoteEmbedding> = notes.iter().filter(|n| blob_of(&n.path) != "c").cloned().collect();
	let output = pipeline
		.run_and_persist(&store, "vault", &kept, &metadata)
		.unwrap();

	assert!(!output.result.stats.was_incremental);
	assert!(output.report.is_none());
	assert_eq!(output.state.note_count(), 30);
}

#[test]
fn test_inconsistent_state_falls_back_to_full_run() {
	let (mut notes, metadata) = blobs(3, 20, 9);
	let mut pipeline = ClusteringPipeline::new(fast_config());
	let full = pipeline.run("vault", &notes, &metadata, None).unwrap();

	let mut damaged = full.state.clone();
	let first = damaged.clusters[0].clone();
	damaged.clusters.push(first);

	let mut rng = StdRng::seed_from_u64(90);
	notes.push(blob_note("c/another.md", 2, &mut rng));
	let output = pipeline.run("vault", &notes, &metadata, Some(&damaged)).unwrap();

	assert!(!output.result.stats.was_incremental);
	assert!(output.report.is_none());
	output
		.result
		.verify_partition(notes.iter().map(|n| n.path.as_str()))
		.unwrap();
}

#[test]
fn test_corrupt_state_file_is_replaced() {
	let dir = tempfile::tempdir().unwrap();
	let store = FileStateStore::new(dir.path());
	std::fs::create_dir_all(store.state_dir()).unwrap();
	std::fs::write(store.path_for("vault"), b"definitely not msgpack").unwrap();

	let (notes, metadata) = blobs(2, 10, 10);
	let output = ClusteringPipeline::new(fast_config())
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();

	assert!(!output.result.stats.was_incremental);
	assert_eq!(store.load("vault").unwrap(), Some(output.state));
}

#[test]
fn test_unchanged_corpus_keeps_clusters() {
	let (notes, metadata) = blobs(3, 12, 11);
	let store = MemoryStateStore::new();
	let mut pipeline = ClusteringPipeline::new(fast_config());

	let first = pipeline
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();
	let second = pipeline
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();

	assert!(second.result.stats.was_incremental);
	assert_eq!(second.report.unwrap().similarity_evaluations, 0);
	assert_eq!(memberships(&first.result), memberships(&second.result));
	assert_eq!(first.result.noise_notes, second.result.noise_notes);
}

#[test]
fn test_lowering_min_notes_reclusters_fully() {
	let (notes, metadata) = blobs(3, 12, 12);
	let store = MemoryStateStore::new();

	let strict = StrataConfig {
		min_notes_for_clustering: 100,
		..fast_config()
	};
	let skipped = ClusteringPipeline::new(strict)
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();
	assert!(skipped.result.clusters.is_empty());
	assert_eq!(skipped.state.note_count(), notes.len());

	// Same notes, so the change ratio is zero; the snapshot still has no clusters to update
	let output = ClusteringPipeline::new(fast_config())
		.run_and_persist(&store, "vault", &notes, &metadata)
		.unwrap();

	assert!(!output.result.stats.was_incremental);
	assert!(output.report.is_none());
	assert!(!output.result.clusters.is_empty());
	assert_eq!(output.state.reduced_embeddings.len(), notes.len());
}
