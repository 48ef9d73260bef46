//! Cluster enrichment: centroid, representatives, tags, folder, names, links

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::centroid::{compute_centroid, select_representatives};
use crate::config::{
	StrataConfig, LINK_SAMPLE_LIMIT, LINK_SAMPLE_SEED, MAX_CANDIDATE_NAMES, MAX_DOMINANT_TAGS,
};
use crate::core::note::file_stem;
use crate::core::{Cluster, MetadataProvider, NoteEmbedding};
use crate::error::{Result, StrataError};
use crate::ui;

/// Words that never make a useful concept name
const STOP_WORDS: &[&str] = &[
	"about", "after", "all", "also", "and", "are", "but", "can", "draft", "for", "from", "has",
	"have", "how", "into", "its", "new", "not", "note", "notes", "our", "out", "over", "part",
	"than", "that", "the", "their", "then", "there", "these", "this", "untitled", "use", "using",
	"was", "what", "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Read-only view over one run's embeddings and metadata
pub struct Enricher<'a, M: MetadataProvider + ?Sized> {
	embeddings: HashMap<&'a str, &'a [f32]>,
	metadata: &'a M,
	representative_count: usize,
	dominant_tag_threshold: f32,
}

impl<'a, M: MetadataProvider + ?Sized> Enricher<'a, M> {
	pub fn new(notes: &'a [NoteEmbedding], metadata: &'a M, config: &StrataConfig) -> Self {
		Self {
			embeddings: notes
				.iter()
				.map(|n| (n.path.as_str(), n.embedding.as_slice()))
				.collect(),
			metadata,
			representative_count: config.representative_count,
			dominant_tag_threshold: config.dominant_tag_threshold,
		}
	}

	/// A new cluster with every derived field filled in
	pub fn build(&self, id: usize, members: BTreeSet<String>, created_at: DateTime<Utc>) -> Cluster {
		self.refresh(Cluster::new(id, members, created_at))
	}

	/// Recompute everything derived from membership.
	///
	/// A computation failure is logged and the cluster is kept with default
	/// enrichment.
	pub fn refresh(&self, cluster: Cluster) -> Cluster {
		match self.try_refresh(&cluster) {
			Ok(refreshed) => refreshed,
			Err(e) => {
				ui::warn(&format!("Cluster {} enrichment failed: {}", cluster.id, e));
				self.fallback(cluster)
			}
		}
	}

	/// Refresh many clusters in parallel, keeping their order
	pub fn refresh_all(&self, clusters: Vec<Cluster>) -> Vec<Cluster> {
		clusters.into_par_iter().map(|c| self.refresh(c)).collect()
	}

	fn try_refresh(&self, cluster: &Cluster) -> Result<Cluster> {
		let members: Vec<&str> = cluster.note_ids.iter().map(String::as_str).collect();
		let vectors = members
			.iter()
			.map(|path| {
				self.embeddings.get(path).copied().ok_or_else(|| {
					StrataError::computation(format!("No embedding for cluster member {}", path))
				})
			})
			.collect::<Result<Vec<&[f32]>>>()?;

		let centroid = compute_centroid(&vectors)?;
		let representatives: Vec<String> =
			select_representatives(&vectors, &centroid, self.representative_count)
				.into_iter()
				.map(|i| members[i].to_string())
				.collect();

		let titles: Vec<String> = representatives.iter().map(|p| self.title_of(p)).collect();

		Ok(Cluster {
			id: cluster.id,
			note_ids: cluster.note_ids.clone(),
			centroid,
			dominant_tags: dominant_tags(&members, self.metadata, self.dominant_tag_threshold),
			folder_path: common_folder(&members, self.metadata),
			candidate_names: candidate_names(&titles),
			internal_link_density: link_density(&members, self.metadata),
			representative_notes: representatives,
			created_at: cluster.created_at,
		})
	}

	/// Membership survives; derived fields fall back to what can still be computed
	fn fallback(&self, cluster: Cluster) -> Cluster {
		let known: Vec<(&str, &[f32])> = cluster
			.note_ids
			.iter()
			.filter_map(|p| self.embeddings.get(p.as_str()).map(|e| (p.as_str(), *e)))
			.collect();

		let vectors: Vec<&[f32]> = known.iter().map(|(_, e)| *e).collect();
		let centroid = compute_centroid(&vectors).unwrap_or_else(|_| cluster.centroid.clone());
		let representative_notes = if vectors.is_empty() {
			cluster
				.note_ids
				.iter()
				.take(self.representative_count)
				.cloned()
				.collect()
		} else {
			select_representatives(&vectors, &centroid, self.representative_count)
				.into_iter()
				.map(|i| known[i].0.to_string())
				.collect()
		};

		Cluster {
			centroid,
			representative_notes,
			dominant_tags: Vec::new(),
			folder_path: None,
			candidate_names: Vec::new(),
			internal_link_density: 0.0,
			..cluster
		}
	}

	fn title_of(&self, path: &str) -> String {
		self.metadata
			.title(path)
			.filter(|t| !t.trim().is_empty())
			.unwrap_or_else(|| file_stem(path).to_string())
	}
}

/// Leading `#` stripped, lowercased
pub fn normalize_tag(tag: &str) -> String {
	tag.trim().trim_start_matches('#').to_lowercase()
}

/// Tags carried by at least `threshold` of the members, most frequent first
pub fn dominant_tags<M: MetadataProvider + ?Sized>(
	members: &[&str],
	metadata: &M,
	threshold: f32,
) -> Vec<String> {
	if members.is_empty() {
		return Vec::new();
	}

	let mut counts: HashMap<String, usize> = HashMap::new();
	for path in members {
		let tags: HashSet<String> = metadata
			.tags(path)
			.iter()
			.map(|t| normalize_tag(t))
			.filter(|t| !t.is_empty())
			.collect();
		for tag in tags {
			*counts.entry(tag).or_default() += 1;
		}
	}

	let n = members.len() as f32;
	let mut dominant: Vec<(String, usize)> = counts
		.into_iter()
		.filter(|(_, count)| *count as f32 / n >= threshold)
		.collect();

	dominant.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	dominant.truncate(MAX_DOMINANT_TAGS);

	dominant.into_iter().map(|(tag, _)| tag).collect()
}

/// Most frequent member folder; ties go to the lexicographically first.
/// `None` when the winner is the vault root.
pub fn common_folder<M: MetadataProvider + ?Sized>(members: &[&str], metadata: &M) -> Option<String> {
	let mut counts: HashMap<Option<String>, usize> = HashMap::new();
	for path in members {
		*counts.entry(metadata.folder(path)).or_default() += 1;
	}

	counts
		.into_iter()
		.max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
		.and_then(|(folder, _)| folder)
}

/// Title words ranked by frequency, then first appearance
pub fn candidate_names(titles: &[String]) -> Vec<String> {
	// word -> (count, first position)
	let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
	let mut position = 0;

	for title in titles {
		for word in title.split(|c: char| !c.is_alphanumeric()) {
			let word = word.to_lowercase();
			if word.chars().count() < 3
				|| word.chars().all(|c| c.is_numeric())
				|| STOP_WORDS.contains(&word.as_str())
			{
				continue;
			}
			let entry = seen.entry(word).or_insert((0, position));
			entry.0 += 1;
			position += 1;
		}
	}

	let mut ranked: Vec<(String, (usize, usize))> = seen.into_iter().collect();
	ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then_with(|| a.1 .1.cmp(&b.1 .1)));
	ranked.truncate(MAX_CANDIDATE_NAMES);

	ranked.into_iter().map(|(word, _)| word).collect()
}

/// Directed member-to-member link count over `n * (n - 1)`.
///
/// Large clusters count links from a seeded sample of members and scale
/// the result up.
pub fn link_density<M: MetadataProvider + ?Sized>(members: &[&str], metadata: &M) -> f32 {
	let n = members.len();
	if n < 2 {
		return 0.0;
	}

	let member_set: HashSet<&str> = members.iter().copied().collect();

	let sources: Vec<&str> = if n > LINK_SAMPLE_LIMIT {
		let mut rng = StdRng::seed_from_u64(LINK_SAMPLE_SEED);
		rand::seq::index::sample(&mut rng, n, LINK_SAMPLE_LIMIT)
			.into_iter()
			.map(|i| members[i])
			.collect()
	} else {
		members.to_vec()
	};

	let internal: u64 = sources
		.iter()
		.flat_map(|from| metadata.links_from(from))
		.filter(|link| link.from != link.to && member_set.contains(link.to.as_str()))
		.map(|link| link.count as u64)
		.sum();

	let scaled = internal as f64 * n as f64 / sources.len() as f64;
	let possible = (n * (n - 1)) as f64;

	(scaled / possible).clamp(0.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::{ContentHash, MetadataIndex, NoteMetadata};

	fn note(path: &str, embedding: Vec<f32>) -> NoteEmbedding {
		NoteEmbedding::new(path, embedding, ContentHash::compute(path.as_bytes()))
	}

	fn tagged(tags: &[&str], title: Option<&str>) -> NoteMetadata {
		NoteMetadata {
			tags: tags.iter().map(|t| t.to_string()).collect(),
			folder: None,
			title: title.map(str::to_string),
		}
	}

	fn members(paths: &[&str]) -> BTreeSet<String> {
		paths.iter().map(|p| p.to_string()).collect()
	}

	#[test]
	fn test_dominant_tags_normalized_and_ranked() {
		let mut index = MetadataIndex::new();
		index.insert_note("a.md", tagged(&["#Math", "calculus"], None));
		index.insert_note("b.md", tagged(&["math", "#math"], None));
		index.insert_note("c.md", tagged(&["calculus", "physics"], None));
		index.insert_note("d.md", tagged(&["math"], None));

		let tags = dominant_tags(&["a.md", "b.md", "c.md", "d.md"], &index, 0.3);
		assert_eq!(tags, vec!["math", "calculus"]);
	}

	#[test]
	fn test_common_folder_ties_are_lexicographic() {
		let index = MetadataIndex::new();
		let folder = common_folder(&["zoo/a.md", "alg/b.md", "zoo/c.md", "alg/d.md"], &index);
		assert_eq!(folder.as_deref(), Some("alg"));

		let root = common_folder(&["a.md", "b.md", "x/c.md"], &index);
		assert_eq!(root, None);
	}

	#[test]
	fn test_candidate_names() {
		let titles = vec![
			"Fourier Series and Transforms".to_string(),
			"The Fourier transform, part 2".to_string(),
			"2024-01-03 series".to_string(),
		];
		let names = candidate_names(&titles);
		assert_eq!(names, vec!["fourier", "series", "transforms", "transform"]);
	}

	#[test]
	fn test_link_density_counts_multiplicity() {
		let mut index = MetadataIndex::new();
		index.add_link("a.md", "b.md", 2);
		index.add_link("b.md", "c.md", 1);
		index.add_link("a.md", "a.md", 5);
		index.add_link("a.md", "outside.md", 3);

		let density = link_density(&["a.md", "b.md", "c.md"], &index);
		assert!((density - 3.0 / 6.0).abs() < 1e-6);

		assert_eq!(link_density(&["a.md"], &index), 0.0);
	}

	#[test]
	fn test_link_density_is_clamped() {
		let mut index = MetadataIndex::new();
		index.add_link("a.md", "b.md", 10);
		assert_eq!(link_density(&["a.md", "b.md"], &index), 1.0);
	}

	#[test]
	fn test_link_density_samples_large_clusters() {
		let paths: Vec<String> = (0..300).map(|i| format!("n{}.md", i)).collect();
		let mut index = MetadataIndex::new();
		for pair in paths.windows(2) {
			index.add_link(&pair[0], &pair[1], 1);
		}

		let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
		let density = link_density(&refs, &index);
		let exact = 299.0 / (300.0 * 299.0);

		assert!(density > 0.0);
		assert!((density - exact).abs() < exact * 0.2, "density {}", density);
	}

	#[test]
	fn test_build_singleton_cluster() {
		let notes = vec![note("physics/waves.md", vec![0.5, 0.5])];
		let mut index = MetadataIndex::new();
		index.insert_note("physics/waves.md", tagged(&["Physics"], Some("Standing Waves")));
		let config = StrataConfig::default();

		let enricher = Enricher::new(&notes, &index, &config);
		let cluster = enricher.build(3, members(&["physics/waves.md"]), Utc::now());

		assert_eq!(cluster.id, 3);
		assert_eq!(cluster.centroid, vec![0.5, 0.5]);
		assert_eq!(cluster.representative_notes, vec!["physics/waves.md"]);
		assert_eq!(cluster.dominant_tags, vec!["physics"]);
		assert_eq!(cluster.folder_path.as_deref(), Some("physics"));
		assert_eq!(cluster.candidate_names, vec!["standing", "waves"]);
		assert_eq!(cluster.internal_link_density, 0.0);
	}

	#[test]
	fn test_representatives_capped() {
		let notes: Vec<NoteEmbedding> = (0..8)
			.map(|i| note(&format!("n{}.md", i), vec![i as f32, 1.0]))
			.collect();
		let index = MetadataIndex::new();
		let config = StrataConfig {
			representative_count: 3,
			..Default::default()
		};

		let enricher = Enricher::new(&notes, &index, &config);
		let all: BTreeSet<String> = notes.iter().map(|n| n.path.clone()).collect();
		let cluster = enricher.build(0, all, Utc::now());

		assert_eq!(cluster.representative_notes.len(), 3);
		assert!(cluster
			.representative_notes
			.iter()
			.all(|r| cluster.note_ids.contains(r)));
		assert_eq!(cluster.centroid, vec![3.5, 1.0]);
	}

	#[test]
	fn test_missing_embedding_recovers() {
		let notes = vec![note("a.md", vec![1.0, 0.0])];
		let mut index = MetadataIndex::new();
		index.insert_note("a.md", tagged(&["kept"], None));
		let config = StrataConfig::default();

		let enricher = Enricher::new(&notes, &index, &config);
		let cluster = enricher.build(1, members(&["a.md", "ghost.md"]), Utc::now());

		assert_eq!(cluster.len(), 2);
		assert_eq!(cluster.centroid, vec![1.0, 0.0]);
		assert_eq!(cluster.representative_notes, vec!["a.md"]);
		assert!(cluster.dominant_tags.is_empty());
	}

	#[test]
	fn test_refresh_all_keeps_order() {
		let notes = vec![
			note("a.md", vec![1.0, 0.0]),
			note("b.md", vec![0.0, 1.0]),
			note("c.md", vec![1.0, 1.0]),
		];
		let index = MetadataIndex::new();
		let config = StrataConfig::default();
		let enricher = Enricher::new(&notes, &index, &config);

		let clusters = vec![
			Cluster::new(5, members(&["a.md"]), Utc::now()),
			Cluster::new(2, members(&["b.md", "c.md"]), Utc::now()),
		];
		let refreshed = enricher.refresh_all(clusters);

		assert_eq!(refreshed[0].id, 5);
		assert_eq!(refreshed[1].id, 2);
		assert_eq!(refreshed[1].centroid, vec![0.5, 1.0]);
	}
}
