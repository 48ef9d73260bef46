//! Clean command - remove persisted clustering state

use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use colored::*;

use crate::storage::{FileStateStore, StateStore};
use crate::ui;

pub fn run(dir: &Path, corpus: Option<&str>, auto_confirm: bool) -> Result<()> {
	let store = FileStateStore::new(dir);
	ui::info(&format!("Scanning: {}", store.state_dir().display()));

	let targets: Vec<String> = match corpus {
		Some(name) => vec![name.to_string()],
		None => store.corpora().context("Failed to list state files")?,
	};
	let targets: Vec<String> = targets
		.into_iter()
		.filter(|name| store.path_for(name).exists())
		.collect();

	if targets.is_empty() {
		ui::success("No clustering state found");
		return Ok(());
	}

	ui::warn(&format!("Found {} state files", targets.len()));
	for name in &targets {
		eprintln!("  {}", store.path_for(name).display().to_string().dimmed());
	}

	if !auto_confirm {
		eprint!("\nDelete these files? [y/N]: ");
		io::stderr().flush()?;

		let mut input = String::new();
		io::stdin().read_line(&mut input)?;

		if !input.trim().eq_ignore_ascii_case("y") {
			ui::info("Cancelled");
			return Ok(());
		}
	}

	let mut removed = 0;
	for name in &targets {
		if store.remove(name).with_context(|| format!("Failed to remove state for '{}'", name))? {
			removed += 1;
			ui::debug(&format!("Deleted: {}", store.path_for(name).display()));
		}
	}

	ui::success(&format!("Removed {} state files", removed));

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::core::ClusteringState;

	#[test]
	fn test_clean_removes_all_corpora() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStateStore::new(dir.path());
		store.save("vault", &ClusteringState::empty(chrono::Utc::now())).unwrap();
		store.save("archive", &ClusteringState::empty(chrono::Utc::now())).unwrap();

		run(dir.path(), None, true).unwrap();

		assert!(store.load("vault").unwrap().is_none());
		assert!(store.load("archive").unwrap().is_none());
	}

	#[test]
	fn test_clean_single_corpus() {
		let dir = tempfile::tempdir().unwrap();
		let store = FileStateStore::new(dir.path());
		store.save("vault", &ClusteringState::empty(chrono::Utc::now())).unwrap();
		store.save("archive", &ClusteringState::empty(chrono::Utc::now())).unwrap();

		run(dir.path(), Some("vault"), true).unwrap();

		assert!(store.load("vault").unwrap().is_none());
		assert!(store.load("archive").unwrap().is_some());
	}
}
