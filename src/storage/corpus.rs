//! Corpus input: embedded notes with their metadata, read from JSON

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use walkdir::WalkDir;

use crate::config::{CONFIG_FILE, STATE_DIR};
use crate::core::{ContentHash, MetadataIndex, NoteEmbedding, NoteMetadata};
use crate::error::{Result, StrataError};
use crate::ui;

const CORPUS_EXT: &str = "json";

/// Everything one clustering run reads
#[derive(Debug, Default)]
pub struct Corpus {
	pub notes: Vec<NoteEmbedding>,
	pub metadata: MetadataIndex,
}

impl Corpus {
	pub fn len(&self) -> usize {
		self.notes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.notes.is_empty()
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteRecord {
	/// Defaults to the record file's path when the corpus is a directory
	#[serde(default)]
	path: Option<String>,
	embedding: Vec<f32>,
	#[serde(default)]
	content_hash: Option<String>,
	/// Hashed when no `contentHash` is given
	#[serde(default)]
	content: Option<String>,
	#[serde(default)]
	tags: Vec<String>,
	#[serde(default)]
	folder: Option<String>,
	#[serde(default)]
	title: Option<String>,
	#[serde(default)]
	links: Vec<LinkRecord>,
}

#[derive(Debug, Deserialize)]
struct LinkRecord {
	to: String,
	#[serde(default = "default_link_count")]
	count: u32,
}

fn default_link_count() -> u32 {
	1
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CorpusDocument {
	Many { notes: Vec<NoteRecord> },
	One(NoteRecord),
}

/// Load a corpus from a JSON file or a directory of JSON records
pub fn load_corpus(path: &Path) -> Result<Corpus> {
	let mut corpus = Corpus::default();

	if path.is_file() {
		for record in read_document(path)? {
			add_record(&mut corpus, record, None)?;
		}
	} else if path.is_dir() {
		for file in record_files(path) {
			let relative = file.strip_prefix(path).unwrap_or(&file);
			let fallback = relative
				.with_extension("")
				.to_string_lossy()
				.replace('\\', "/");
			for record in read_document(&file)? {
				add_record(&mut corpus, record, Some(&fallback))?;
			}
		}
	} else {
		return Err(StrataError::Io(std::io::Error::new(
			std::io::ErrorKind::NotFound,
			format!("Corpus not found: {}", path.display()),
		)));
	}

	ui::debug(&format!(
		"Loaded {} notes from {}",
		corpus.len(),
		path.display()
	));

	Ok(corpus)
}

/// JSON files below `dir`, sorted, skipping state directories and the
/// config file that may sit next to the records
fn record_files(dir: &Path) -> Vec<PathBuf> {
	let config = dir.join(CONFIG_FILE);
	let mut files: Vec<PathBuf> = WalkDir::new(dir)
		.into_iter()
		.filter_entry(|e| e.file_name() != STATE_DIR)
		.filter_map(|e| e.ok())
		.map(|e| e.into_path())
		.filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(CORPUS_EXT))
		.filter(|p| *p != config)
		.collect();
	files.sort();
	files
}

fn read_document(path: &Path) -> Result<Vec<NoteRecord>> {
	let text = fs::read_to_string(path)?;
	let document: CorpusDocument = serde_json::from_str(&text)
		.map_err(|e| StrataError::data(format!("Invalid corpus file {}: {}", path.display(), e)))?;

	Ok(match document {
		CorpusDocument::Many { notes } => notes,
		CorpusDocument::One(record) => vec![record],
	})
}

fn add_record(corpus: &mut Corpus, record: NoteRecord, fallback_path: Option<&str>) -> Result<()> {
	let Some(path) = record.path.or_else(|| fallback_path.map(str::to_string)) else {
		return Err(StrataError::data("Note record without a path"));
	};

	let content_hash = match (record.content_hash, record.content) {
		(Some(hash), _) => ContentHash::from_string(hash),
		(None, Some(content)) => ContentHash::compute(content.as_bytes()),
		(None, None) => ContentHash::compute(&embedding_bytes(&record.embedding)),
	};

	for link in record.links {
		corpus.metadata.add_link(&path, &link.to, link.count);
	}

	corpus.metadata.insert_note(
		path.clone(),
		NoteMetadata {
			tags: record.tags,
			folder: record.folder,
			title: record.title,
		},
	);
	corpus
		.notes
		.push(NoteEmbedding::new(path, record.embedding, content_hash));

	Ok(())
}

fn embedding_bytes(embedding: &[f32]) -> Vec<u8> {
	embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}
