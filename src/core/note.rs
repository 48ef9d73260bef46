//! Notes as they arrive from the embedding and metadata collaborators

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::hash::ContentHash;
use crate::error::{Result, StrataError};

/// One note from the embedding provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEmbedding {
	/// Vault-relative path, `/`-separated
	pub path: String,
	pub embedding: Vec<f32>,
	pub content_hash: ContentHash,
}

impl NoteEmbedding {
	pub fn new(path: impl Into<String>, embedding: Vec<f32>, content_hash: ContentHash) -> Self {
		Self {
			path: path.into(),
			embedding,
			content_hash,
		}
	}
}

/// Checks the embedding provider's contract and returns the shared dimension.
///
/// Fails on an empty vector, a dimension mismatch, a non-finite component or a
/// path that appears twice.
pub fn validate_notes(notes: &[NoteEmbedding]) -> Result<usize> {
	let Some(first) = notes.first() else {
		return Ok(0);
	};
	let dim = first.embedding.len();
	if dim == 0 {
		return Err(StrataError::data(format!(
			"Embedding for {} is empty",
			first.path
		)));
	}

	let mut seen = HashSet::with_capacity(notes.len());
	for note in notes {
		if note.embedding.len() != dim {
			return Err(StrataError::data(format!(
				"Dimension mismatch for {}: expected {}, got {}",
				note.path,
				dim,
				note.embedding.len()
			)));
		}
		if let Some(pos) = note.embedding.iter().position(|v| !v.is_finite()) {
			return Err(StrataError::data(format!(
				"Non-finite value at index {} in embedding for {}",
				pos, note.path
			)));
		}
		if !seen.insert(note.path.as_str()) {
			return Err(StrataError::data(format!("Duplicate note path: {}", note.path)));
		}
	}

	Ok(dim)
}

/// A directed link between two notes with its multiplicity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLink {
	pub from: String,
	pub to: String,
	pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub folder: Option<String>,
	#[serde(default)]
	pub title: Option<String>,
}

/// Read-only view of tags, folders, titles and resolved links
pub trait MetadataProvider: Sync {
	fn tags(&self, path: &str) -> Vec<String>;

	fn folder(&self, path: &str) -> Option<String> {
		parent_folder(path)
	}

	fn title(&self, path: &str) -> Option<String>;

	/// Outgoing links of `path`, one entry per target
	fn links_from(&self, path: &str) -> Vec<NoteLink>;
}

/// Folder part of a vault-relative path, `None` at the vault root
pub fn parent_folder(path: &str) -> Option<String> {
	path.rsplit_once('/')
		.map(|(folder, _)| folder.to_string())
		.filter(|folder| !folder.is_empty())
}

/// File name without extension, used when a note has no title
pub fn file_stem(path: &str) -> &str {
	let name = path.rsplit('/').next().unwrap_or(path);
	match name.rsplit_once('.') {
		Some((stem, _)) if !stem.is_empty() => stem,
		_ => name,
	}
}

/// In-memory metadata keyed by note path
#[derive(Debug, Default)]
pub struct MetadataIndex {
	notes: HashMap<String, NoteMetadata>,
	links: Vec<NoteLink>,
	outgoing: HashMap<String, Vec<usize>>,
	by_pair: HashMap<(String, String), usize>,
}

impl MetadataIndex {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert_note(&mut self, path: impl Into<String>, metadata: NoteMetadata) {
		self.notes.insert(path.into(), metadata);
	}

	/// Record `count` links from `from` to `to`; repeated pairs accumulate
	pub fn add_link(&mut self, from: &str, to: &str, count: u32) {
		if count == 0 {
			return;
		}
		let key = (from.to_string(), to.to_string());
		if let Some(&idx) = self.by_pair.get(&key) {
			self.links[idx].count += count;
			return;
		}

		let idx = self.links.len();
		self.links.push(NoteLink {
			from: key.0.clone(),
			to: key.1.clone(),
			count,
		});
		self.outgoing.entry(key.0.clone()).or_default().push(idx);
		self.by_pair.insert(key, idx);
	}

	pub fn link_count(&self, from: &str, to: &str) -> u32 {
		self.by_pair
			.get(&(from.to_string(), to.to_string()))
			.map(|&idx| self.links[idx].count)
			.unwrap_or(0)
	}

	pub fn len(&self) -> usize {
		self.notes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.notes.is_empty()
	}
}

impl MetadataProvider for MetadataIndex {
	fn tags(&self, path: &str) -> Vec<String> {
		self.notes
			.get(path)
			.map(|m| m.tags.clone())
			.unwrap_or_default()
	}

	fn folder(&self, path: &str) -> Option<String> {
		self.notes
			.get(path)
			.and_then(|m| m.folder.clone())
			.or_else(|| parent_folder(path))
	}

	fn title(&self, path: &str) -> Option<String> {
		self.notes.get(path).and_then(|m| m.title.clone())
	}

	fn links_from(&self, path: &str) -> Vec<NoteLink> {
		self.outgoing
			.get(path)
			.map(|idxs| idxs.iter().map(|&i| self.links[i].clone()).collect())
			.unwrap_or_default()
	}
}
