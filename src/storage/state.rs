//! Clustering state persistence

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::{STATE_DIR, STATE_EXT};
use crate::core::{ClusteringState, STATE_VERSION};
use crate::error::{Result, StrataError};
use crate::ui;

/// Where clustering snapshots live between runs, one per corpus
pub trait StateStore {
	/// `Ok(None)` when the corpus was never clustered
	fn load(&self, corpus: &str) -> Result<Option<ClusteringState>>;

	/// Replace the stored snapshot as a whole
	fn save(&self, corpus: &str, state: &ClusteringState) -> Result<()>;

	/// Returns whether a snapshot existed
	fn remove(&self, corpus: &str) -> Result<bool>;
}

/// Corpus names become file names, so keep them to one path component
fn check_corpus_name(corpus: &str) -> Result<()> {
	let valid = !corpus.is_empty()
		&& corpus != "."
		&& corpus != ".."
		&& !corpus.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
	if valid {
		Ok(())
	} else {
		Err(StrataError::configuration(format!(
			"Invalid corpus name: {:?}",
			corpus
		)))
	}
}

fn check_version(corpus: &str, state: &ClusteringState) -> Result<()> {
	if state.version != STATE_VERSION {
		return Err(StrataError::state(format!(
			"Stored state for {} has version {}, expected {}",
			corpus, state.version, STATE_VERSION
		)));
	}
	Ok(())
}

/// MessagePack snapshots under `<root>/.strata/<corpus>.msgpack`
#[derive(Debug, Clone)]
pub struct FileStateStore {
	root: PathBuf,
}

impl FileStateStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn state_dir(&self) -> PathBuf {
		self.root.join(STATE_DIR)
	}

	/// Build state path from corpus name
	pub fn path_for(&self, corpus: &str) -> PathBuf {
		self.state_dir().join(format!("{}.{}", corpus, STATE_EXT))
	}

	/// Corpora that have a stored snapshot, sorted
	pub fn corpora(&self) -> Result<Vec<String>> {
		let Ok(entries) = fs::read_dir(self.state_dir()) else {
			return Ok(Vec::new());
		};

		let mut names: Vec<String> = entries
			.filter_map(|e| e.ok())
			.map(|e| e.path())
			.filter(|p| p.extension().and_then(|s| s.to_str()) == Some(STATE_EXT))
			.filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
			.collect();
		names.sort();

		Ok(names)
	}
}

impl StateStore for FileStateStore {
	fn load(&self, corpus: &str) -> Result<Option<ClusteringState>> {
		check_corpus_name(corpus)?;
		let path = self.path_for(corpus);
		if !path.exists() {
			return Ok(None);
		}

		let bytes = fs::read(&path)?;
		let state: ClusteringState = rmp_serde::from_slice(&bytes).map_err(|e| {
			StrataError::state(format!("Failed to decode {}: {}", path.display(), e))
		})?;
		check_version(corpus, &state)?;

		ui::debug(&format!(
			"Loaded state for {} ({} notes, {} clusters)",
			corpus,
			state.note_count(),
			state.clusters.len()
		));

		Ok(Some(state))
	}

	fn save(&self, corpus: &str, state: &ClusteringState) -> Result<()> {
		check_corpus_name(corpus)?;
		let path = self.path_for(corpus);
		fs::create_dir_all(self.state_dir())?;

		let bytes = rmp_serde::to_vec_named(state)?;

		// Readers only ever see the old file or the complete new one
		let tmp = path.with_extension(format!("{}.tmp", STATE_EXT));
		fs::write(&tmp, bytes)?;
		if let Err(e) = fs::rename(&tmp, &path) {
			let _ = fs::remove_file(&tmp);
			return Err(e.into());
		}

		ui::debug(&format!("Saved state: {}", path.display()));
		Ok(())
	}

	fn remove(&self, corpus: &str) -> Result<bool> {
		check_corpus_name(corpus)?;
		let path = self.path_for(corpus);
		if !path.exists() {
			return Ok(false);
		}
		fs::remove_file(&path)?;
		Ok(true)
	}
}

/// Snapshots kept in memory, for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryStateStore {
	states: RwLock<HashMap<String, ClusteringState>>,
}

impl MemoryStateStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.states.read().map(|s| s.len()).unwrap_or(0)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl StateStore for MemoryStateStore {
	fn load(&self, corpus: &str) -> Result<Option<ClusteringState>> {
		let states = self
			.states
			.read()
			.map_err(|_| StrataError::state("State store lock poisoned"))?;
		let state = states.get(corpus).cloned();
		if let Some(state) = &state {
			check_version(corpus, state)?;
		}
		Ok(state)
	}

	fn save(&self, corpus: &str, state: &ClusteringState) -> Result<()> {
		let mut states = self
			.states
			.write()
			.map_err(|_| StrataError::state("State store lock poisoned"))?;
		states.insert(corpus.to_string(), state.clone());
		Ok(())
	}

	fn remove(&self, corpus: &str) -> Result<bool> {
		let mut states = self
			.states
			.write()
			.map_err(|_| StrataError::state("State store lock poisoned"))?;
		Ok(states.remove(corpus).is_some())
	}
}
