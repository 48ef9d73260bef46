//! Show command - print the persisted clustering of a corpus

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;

use crate::core::ClusteringResult;
use crate::storage::{FileStateStore, StateStore};
use crate::ui;

use super::cluster::{export_clusters, print_clusters};

pub fn run(dir: &Path, corpus: &str, preview_count: usize, export: Option<&Path>) -> Result<()> {
	let store = FileStateStore::new(dir);
	ui::debug(&format!("Reading {}", store.path_for(corpus).display()));

	let Some(state) = store
		.load(corpus)
		.with_context(|| format!("Failed to read state for '{}'", corpus))?
	else {
		ui::warn(&format!("No clustering state for '{}' in {}", corpus, dir.display()));
		let known = store.corpora().unwrap_or_default();
		if !known.is_empty() {
			ui::info(&format!("Known corpora: {}", known.join(", ")));
		}
		return Ok(());
	};

	let noise: Vec<String> = state.noise_notes().into_iter().map(str::to_string).collect();
	let result = ClusteringResult::new(state.clusters.clone(), noise, false);

	if let Some(export_path) = export {
		return export_clusters(corpus, &result, None, export_path);
	}

	ui::info(&format!(
		"State v{}, last full clustering {}",
		state.version,
		state.last_full_clustering_at.format("%Y-%m-%d %H:%M UTC")
	));
	print_clusters(&result, dir, preview_count);
	eprintln!(
		"\n{}",
		format!(
			"{} reduced positions, next cluster id {}",
			state.reduced_embeddings.len(),
			state.next_cluster_id
		)
		.dimmed()
	);

	Ok(())
}
