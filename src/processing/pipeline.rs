//! Clustering pipeline: size check, change detection, full or incremental run

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::enrich::Enricher;
use super::hdbscan::{self, NOISE};
use super::incremental::{
	apply_incremental_update, detect_changes, reference_candidates, update_clustering_state,
	ChangeSet, UpdateReport,
};
use super::umap::{self, FittedUmap, ReducerState};
use crate::config::{StrataConfig, ID_REUSE_MIN_JACCARD, TRANSFORM_REFERENCE_LIMIT};
use crate::core::{
	validate_notes, Cluster, ClusteringResult, ClusteringState, ContentHash, MetadataProvider,
	NoteEmbedding, STATE_VERSION,
};
use crate::error::{Result, StrataError};
use crate::storage::StateStore;
use crate::ui;

/// Coarse progress reported while a run is under way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	ReductionComplete,
	ClusteringComplete,
	EnrichmentComplete,
	IncrementalUpdateComplete,
}

type ProgressFn = Box<dyn Fn(Stage) + Send + Sync>;

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct RunOutput {
	pub result: ClusteringResult,
	/// Snapshot that replaces the previous one
	pub state: ClusteringState,
	/// Set when the run took the incremental path
	pub report: Option<UpdateReport>,
}

/// Runs clustering for any number of corpora, keeping one reducer per corpus
pub struct ClusteringPipeline {
	config: StrataConfig,
	reducers: HashMap<String, ReducerState>,
	progress: Option<ProgressFn>,
	force_full: bool,
}

impl ClusteringPipeline {
	pub fn new(config: StrataConfig) -> Self {
		Self {
			config,
			reducers: HashMap::new(),
			progress: None,
			force_full: false,
		}
	}

	pub fn with_progress(mut self, progress: impl Fn(Stage) + Send + Sync + 'static) -> Self {
		self.progress = Some(Box::new(progress));
		self
	}

	/// Skip change detection and always recluster from scratch
	pub fn force_full(mut self, force: bool) -> Self {
		self.force_full = force;
		self
	}

	pub fn config(&self) -> &StrataConfig {
		&self.config
	}

	pub fn reducer(&self, corpus: &str) -> Option<&ReducerState> {
		self.reducers.get(corpus)
	}

	fn report(&self, stage: Stage) {
		if let Some(progress) = &self.progress {
			progress(stage);
		}
	}

	/// Cluster `notes` against the previous snapshot of `corpus`.
	///
	/// `previous` is only read; the returned state replaces it.
	pub fn run<M: MetadataProvider + ?Sized>(
		&mut self,
		corpus: &str,
		notes: &[NoteEmbedding],
		metadata: &M,
		previous: Option<&ClusteringState>,
	) -> Result<RunOutput> {
		self.config.validate()?;
		let dim = validate_notes(notes)?;

		let mut sorted: Vec<NoteEmbedding> = notes.to_vec();
		sorted.sort_by(|a, b| a.path.cmp(&b.path));
		let notes = sorted.as_slice();
		let now = Utc::now();

		let output = if notes.len() < self.config.min_notes_for_clustering {
			ui::info(&format!(
				"{} notes is below the minimum of {}, skipping clustering",
				notes.len(),
				self.config.min_notes_for_clustering
			));
			self.reducers.insert(corpus.to_string(), ReducerState::Unfit);
			self.below_minimum(notes, previous, now)
		} else {
			let hashes: BTreeMap<String, ContentHash> = notes
				.iter()
				.map(|n| (n.path.clone(), n.content_hash.clone()))
				.collect();
			let changes = detect_changes(&hashes, previous, self.config.incremental_threshold);

			match previous {
				Some(prev) if changes.should_use_incremental && !self.force_full => {
					match self.run_incremental(corpus, notes, metadata, prev, &changes, dim) {
						Err(StrataError::State { message }) => {
							ui::warn(&format!(
								"Previous state unusable ({}), running full clustering",
								message
							));
							self.run_full(corpus, notes, metadata, previous, now)?
						}
						other => other?,
					}
				}
				_ => self.run_full(corpus, notes, metadata, previous, now)?,
			}
		};

		output
			.result
			.verify_partition(notes.iter().map(|n| n.path.as_str()))?;

		ui::success(&format!(
			"{} clusters, {} noise notes ({:.1}%){}",
			output.result.stats.cluster_count,
			output.result.stats.noise_count,
			output.result.noise_percent(),
			if output.result.stats.was_incremental { ", incremental" } else { "" }
		));

		Ok(output)
	}

	/// Load the stored snapshot, run, and store the new one.
	///
	/// A snapshot that cannot be decoded counts as missing. Nothing is stored
	/// when the run fails.
	pub fn run_and_persist<S, M>(
		&mut self,
		store: &S,
		corpus: &str,
		notes: &[NoteEmbedding],
		metadata: &M,
	) -> Result<RunOutput>
	where
		S: StateStore + ?Sized,
		M: MetadataProvider + ?Sized,
	{
		let previous = match store.load(corpus) {
			Ok(state) => state,
			Err(StrataError::State { message }) => {
				ui::warn(&format!("Ignoring stored state for {}: {}", corpus, message));
				None
			}
			Err(e) => return Err(e),
		};

		let output = self.run(corpus, notes, metadata, previous.as_ref())?;
		store.save(corpus, &output.state)?;

		Ok(output)
	}

	fn below_minimum(
		&self,
		notes: &[NoteEmbedding],
		previous: Option<&ClusteringState>,
		now: DateTime<Utc>,
	) -> RunOutput {
		let mut state = ClusteringState::empty(now);
		state.note_hashes = notes
			.iter()
			.map(|n| (n.path.clone(), n.content_hash.clone()))
			.collect();
		state.next_cluster_id = previous.map(|p| p.next_cluster_id).unwrap_or(0);

		let noise = notes.iter().map(|n| n.path.clone()).collect();

		RunOutput {
			result: ClusteringResult::new(Vec::new(), noise, false),
			state,
			report: None,
		}
	}

	fn run_full<M: MetadataProvider + ?Sized>(
		&mut self,
		corpus: &str,
		notes: &[NoteEmbedding],
		metadata: &M,
		previous: Option<&ClusteringState>,
		now: DateTime<Utc>,
	) -> Result<RunOutput> {
		ui::info(&format!("Clustering {} notes", notes.len()));

		let points: Vec<(&str, &[f32])> = notes
			.iter()
			.map(|n| (n.path.as_str(), n.embedding.as_slice()))
			.collect();
		let (model, reduced) = umap::fit(&points, &self.config.umap)?;
		self.report(Stage::ReductionComplete);

		let coords: Vec<Vec<f32>> = reduced.iter().map(|(_, c)| c.clone()).collect();
		let labels = hdbscan::cluster(&coords, &self.config.hdbscan)?;
		self.report(Stage::ClusteringComplete);

		let mut groups: BTreeMap<i32, BTreeSet<String>> = BTreeMap::new();
		let mut noise = Vec::new();
		for (note, &label) in notes.iter().zip(labels.iter()) {
			if label == NOISE {
				noise.push(note.path.clone());
			} else {
				groups.entry(label).or_default().insert(note.path.clone());
			}
		}

		let enricher = Enricher::new(notes, metadata, &self.config);
		let drafts: Vec<Cluster> = groups
			.into_iter()
			.map(|(label, members)| Cluster::new(label as usize, members, now))
			.collect();
		let mut clusters = enricher.refresh_all(drafts);

		// Largest first; the sort is stable so equal sizes keep label order
		clusters.sort_by(|a, b| b.len().cmp(&a.len()));
		let next_cluster_id = reconcile_ids(&mut clusters, previous);
		self.report(Stage::EnrichmentComplete);

		let state = ClusteringState {
			version: STATE_VERSION,
			note_hashes: notes
				.iter()
				.map(|n| (n.path.clone(), n.content_hash.clone()))
				.collect(),
			clusters: clusters.clone(),
			reduced_embeddings: reduced.into_iter().collect(),
			last_full_clustering_at: now,
			next_cluster_id,
		};

		self.reducers
			.insert(corpus.to_string(), ReducerState::Fitted(model));

		Ok(RunOutput {
			result: ClusteringResult::new(clusters, noise, false),
			state,
			report: None,
		})
	}

	fn run_incremental<M: MetadataProvider + ?Sized>(
		&mut self,
		corpus: &str,
		notes: &[NoteEmbedding],
		metadata: &M,
		previous: &ClusteringState,
		changes: &ChangeSet,
		dim: usize,
	) -> Result<RunOutput> {
		previous.check_consistency(dim)?;

		ui::info(&format!(
			"Updating clusters incrementally ({} changed notes)",
			changes.changed_count()
		));

		let embeddings: HashMap<&str, &[f32]> = notes
			.iter()
			.map(|n| (n.path.as_str(), n.embedding.as_slice()))
			.collect();
		let incoming: Vec<(&str, &[f32])> = changes
			.to_assign()
			.filter_map(|path| embeddings.get(path).map(|e| (path, *e)))
			.collect();

		let (placed, reference_evaluations) = if incoming.is_empty() {
			(Vec::new(), 0)
		} else {
			let limit = TRANSFORM_REFERENCE_LIMIT.max(self.config.umap.n_neighbors + 1);
			let (paths, ranking) = reference_candidates(&incoming, &previous.clusters, changes, limit);
			let model = self.reference_model(corpus, previous, &paths, &embeddings)?;
			let placement = umap::transform(&model, &incoming, &self.config.umap)?;
			(placement.points, ranking + placement.distance_evaluations)
		};
		self.report(Stage::ReductionComplete);

		let enricher = Enricher::new(notes, metadata, &self.config);
		let (clusters, mut report) = apply_incremental_update(
			&previous.clusters,
			changes,
			notes,
			&enricher,
			self.config.min_assignment_similarity,
		);
		report.reference_evaluations = reference_evaluations;

		let state = update_clustering_state(previous, notes, clusters, placed, changes);

		// Nothing is refit here; later updates take their reference points
		// from the cached positions whenever the model no longer has them
		self.reducers.entry(corpus.to_string()).or_default();
		self.report(Stage::IncrementalUpdateComplete);

		let noise: Vec<String> = state.noise_notes().into_iter().map(str::to_string).collect();

		Ok(RunOutput {
			result: ClusteringResult::new(state.clusters.clone(), noise, true),
			state,
			report: Some(report),
		})
	}

	/// A model over `paths` only: rows of the in-memory model when it still
	/// has them at their cached positions, otherwise rebuilt from the cache
	fn reference_model(
		&self,
		corpus: &str,
		previous: &ClusteringState,
		paths: &[String],
		embeddings: &HashMap<&str, &[f32]>,
	) -> Result<FittedUmap> {
		if let Some(model) = self.reducers.get(corpus).and_then(ReducerState::fitted) {
			let current = model.n_components() == self.config.umap.n_components
				&& paths
					.iter()
					.all(|p| model.position(p).as_ref() == previous.reduced_embeddings.get(p));
			if current {
				ui::debug(&format!("Reusing {} rows of the in-memory reducer", paths.len()));
				return model.subset(paths);
			}
		}

		let mut reference: Vec<(&str, &[f32], &[f32])> = Vec::with_capacity(paths.len());
		for path in paths {
			let position = previous.reduced_embeddings.get(path).ok_or_else(|| {
				StrataError::state(format!("No cached reduced position for {}", path))
			})?;
			let embedding = embeddings.get(path.as_str()).ok_or_else(|| {
				StrataError::state(format!("No embedding for unchanged note {}", path))
			})?;
			reference.push((path.as_str(), *embedding, position.as_slice()));
		}

		ui::debug(&format!(
			"Rebuilding reducer from {} cached positions",
			reference.len()
		));
		FittedUmap::from_reference(&reference, &self.config.umap)
	}
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f32 {
	let shared = a.intersection(b).count();
	let union = a.len() + b.len() - shared;
	if union == 0 {
		0.0
	} else {
		shared as f32 / union as f32
	}
}

/// Carry ids over from the previous full run.
///
/// Pairs are matched greedily by overlap, best first, one-to-one. Matched
/// clusters keep the old id and creation time; the rest get fresh ids.
/// Returns the next unused id.
fn reconcile_ids(clusters: &mut [Cluster], previous: Option<&ClusteringState>) -> usize {
	let old: &[Cluster] = previous.map(|p| p.clusters.as_slice()).unwrap_or(&[]);
	let mut next_id = previous
		.map(|p| p.next_cluster_id)
		.unwrap_or(0)
		.max(old.iter().map(|c| c.id + 1).max().unwrap_or(0));

	let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
	for (i, cluster) in clusters.iter().enumerate() {
		for (j, prior) in old.iter().enumerate() {
			let overlap = jaccard(&cluster.note_ids, &prior.note_ids);
			if overlap >= ID_REUSE_MIN_JACCARD {
				candidates.push((overlap, i, j));
			}
		}
	}
	candidates.sort_by(|a, b| {
		b.0.partial_cmp(&a.0)
			.unwrap_or(std::cmp::Ordering::Equal)
			.then_with(|| a.1.cmp(&b.1))
			.then_with(|| a.2.cmp(&b.2))
	});

	let mut matched: Vec<Option<usize>> = vec![None; clusters.len()];
	let mut taken: HashSet<usize> = HashSet::new();
	for (_, i, j) in candidates {
		// One new cluster per old id, even when the old state repeats an id
		if matched[i].is_none() && taken.insert(old[j].id) {
			matched[i] = Some(j);
		}
	}

	for (cluster, slot) in clusters.iter_mut().zip(matched) {
		match slot {
			Some(j) => {
				cluster.id = old[j].id;
				cluster.created_at = old[j].created_at;
			}
			None => {
				cluster.id = next_id;
				next_id += 1;
			}
		}
	}

	if !taken.is_empty() {
		ui::debug(&format!("Kept {} cluster ids from the previous run", taken.len()));
	}

	next_id
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::MetadataIndex;
	use std::sync::{Arc, Mutex};

	fn note(path: &str, embedding: Vec<f32>) -> NoteEmbedding {
		NoteEmbedding::new(path, embedding, ContentHash::compute(path.as_bytes()))
	}

	fn cluster(id: usize, members: &[&str]) -> Cluster {
		Cluster::new(id, members.iter().map(|m| m.to_string()).collect(), Utc::now())
	}

	#[test]
	fn test_jaccard() {
		let a: BTreeSet<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
		let b: BTreeSet<String> = ["y", "z"].iter().map(|s| s.to_string()).collect();
		assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
		assert_eq!(jaccard(&a, &a), 1.0);
	}

	#[test]
	fn test_reconcile_keeps_ids_of_similar_clusters() {
		let old_a = cluster(4, &["a", "b", "c"]);
		let old_b = cluster(9, &["x", "y"]);
		let mut previous = ClusteringState::empty(Utc::now());
		previous.clusters = vec![old_a.clone(), old_b];
		previous.next_cluster_id = 10;

		let mut clusters = vec![
			cluster(0, &["a", "b", "c", "d"]),
			cluster(1, &["p", "q"]),
			cluster(2, &["x"]),
		];
		let next = reconcile_ids(&mut clusters, Some(&previous));

		assert_eq!(clusters[0].id, 4);
		assert_eq!(clusters[0].created_at, old_a.created_at);
		assert_eq!(clusters[1].id, 10);
		assert_eq!(clusters[2].id, 9);
		assert_eq!(next, 11);
	}

	#[test]
	fn test_reconcile_without_previous_numbers_from_zero() {
		let mut clusters = vec![cluster(5, &["a"]), cluster(6, &["b"])];
		assert_eq!(reconcile_ids(&mut clusters, None), 2);
		assert_eq!(clusters[0].id, 0);
		assert_eq!(clusters[1].id, 1);
	}

	#[test]
	fn test_below_minimum_is_all_noise() {
		let notes: Vec<NoteEmbedding> = (0..9)
			.map(|i| note(&format!("n{}.md", i), vec![i as f32, 1.0]))
			.collect();
		let mut pipeline = ClusteringPipeline::new(StrataConfig::default());

		let output = pipeline.run("vault", &notes, &MetadataIndex::new(), None).unwrap();

		assert!(output.result.clusters.is_empty());
		assert_eq!(output.result.noise_notes.len(), 9);
		assert!(!output.result.stats.was_incremental);
		assert_eq!(output.state.note_count(), 9);
		assert!(output.state.clusters.is_empty());
		assert!(!pipeline.reducer("vault").unwrap().is_fitted());
	}

	#[test]
	fn test_invalid_config_fails_first() {
		let config = StrataConfig {
			min_notes_for_clustering: 1,
			..Default::default()
		};
		let notes = vec![note("a.md", vec![f32::NAN])];
		let mut pipeline = ClusteringPipeline::new(config);

		let err = pipeline.run("vault", &notes, &MetadataIndex::new(), None).unwrap_err();
		assert!(matches!(err, StrataError::Configuration { .. }));
	}

	#[test]
	fn test_progress_reports_full_run_stages() {
		let notes: Vec<NoteEmbedding> = (0..12)
			.map(|i| {
				let base = if i < 6 { 0.0 } else { 8.0 };
				note(&format!("n{:02}.md", i), vec![base + (i % 3) as f32 * 0.1, base, 1.0])
			})
			.collect();
		let mut config = StrataConfig::default();
		config.umap.n_epochs = Some(50);
		config.umap.n_neighbors = 4;
		config.umap.n_components = 2;
		config.hdbscan.min_cluster_size = 3;

		let stages = Arc::new(Mutex::new(Vec::new()));
		let seen = Arc::clone(&stages);
		let mut pipeline = ClusteringPipeline::new(config)
			.with_progress(move |stage| seen.lock().unwrap().push(stage));

		let output = pipeline.run("vault", &notes, &MetadataIndex::new(), None).unwrap();

		assert_eq!(
			*stages.lock().unwrap(),
			vec![
				Stage::ReductionComplete,
				Stage::ClusteringComplete,
				Stage::EnrichmentComplete
			]
		);
		assert!(pipeline.reducer("vault").unwrap().is_fitted());
		assert_eq!(output.state.reduced_embeddings.len(), 12);
	}
}
