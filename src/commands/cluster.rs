//! Cluster command - group notes by meaning

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use colored::*;
use serde::Serialize;

use crate::config::{StrataConfig, CONFIG_FILE};
use crate::core::{ClusterSummary, ClusteringResult, ClusteringStats};
use crate::processing::{ClusteringPipeline, Stage, UpdateReport};
use crate::storage::{load_corpus, FileStateStore};
use crate::ui;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterExport<'a> {
	corpus: &'a str,
	timestamp: String,
	stats: ClusteringStats,
	clusters: Vec<ClusterSummary>,
	noise: &'a [String],
	#[serde(skip_serializing_if = "Option::is_none")]
	update: Option<&'a UpdateReport>,
}

/// Options of `strata cluster`
#[derive(Debug, Clone)]
pub struct ClusterArgs {
	pub input: PathBuf,
	pub state_dir: Option<PathBuf>,
	pub corpus: String,
	pub config: Option<PathBuf>,
	pub force: bool,
	pub seed: Option<u64>,
	pub preview_count: usize,
	pub export: Option<PathBuf>,
}

pub fn run(args: &ClusterArgs) -> Result<()> {
	let start = Instant::now();
	let root = state_root(&args.input, args.state_dir.as_deref());

	ui::debug(&format!(
		"Starting clustering: input={}, state={}, corpus={}, force={}",
		args.input.display(),
		root.display(),
		args.corpus,
		args.force
	));

	let mut config = load_config(args.config.as_deref(), &root)?;
	if let Some(seed) = args.seed {
		config.umap.seed = Some(seed);
	}

	ui::info(&format!(
		"Loading notes from {}",
		ui::path_link(&args.input, 40)
	));
	let corpus = load_corpus(&args.input)
		.with_context(|| format!("Failed to load corpus from {}", args.input.display()))?;

	if corpus.is_empty() {
		ui::warn("No notes found");
		return Ok(());
	}
	ui::success(&format!("Loaded {} notes", corpus.len()));
	if let Some(first) = corpus.notes.first() {
		ui::debug(&format!("Embedding dimension: {}D", first.embedding.len()));
	}

	let store = FileStateStore::new(&root);
	let mut pipeline = ClusteringPipeline::new(config)
		.force_full(args.force)
		.with_progress(|stage| match stage {
			Stage::ReductionComplete => ui::debug("Reduction complete"),
			Stage::ClusteringComplete => ui::debug("Density clustering complete"),
			Stage::EnrichmentComplete => ui::debug("Enrichment complete"),
			Stage::IncrementalUpdateComplete => ui::debug("Incremental update complete"),
		});

	let output = match pipeline.run_and_persist(&store, &args.corpus, &corpus.notes, &corpus.metadata) {
		Ok(output) => output,
		Err(e) => {
			if !e.is_fatal() {
				ui::warn("Stored state may be damaged, `strata clean` or --force starts over");
			}
			return Err(e).context("Clustering failed");
		}
	};

	ui::success(&format!(
		"Saved state to {}",
		store.path_for(&args.corpus).display()
	));

	if let Some(export_path) = &args.export {
		return export_clusters(
			&args.corpus,
			&output.result,
			output.report.as_ref(),
			export_path,
		);
	}

	print_clusters(&output.result, &args.input, args.preview_count);
	if let Some(report) = &output.report {
		ui::debug(&format!(
			"{} similarity evaluations, {} placement evaluations, {} clusters touched, {} dissolved",
			report.similarity_evaluations,
			report.reference_evaluations,
			report.touched_clusters.len(),
			report.dissolved_clusters.len()
		));
	}

	eprintln!(
		"\n{}",
		format!("Completed in {:.1}s", start.elapsed().as_secs_f32()).dimmed()
	);

	Ok(())
}

/// Directory that holds `.strata/`: explicit, else the corpus directory,
/// else the corpus file's directory
pub fn state_root(input: &Path, explicit: Option<&Path>) -> PathBuf {
	if let Some(dir) = explicit {
		return dir.to_path_buf();
	}
	if input.is_dir() {
		return input.to_path_buf();
	}
	input
		.parent()
		.filter(|p| !p.as_os_str().is_empty())
		.map(Path::to_path_buf)
		.unwrap_or_else(|| PathBuf::from("."))
}

fn load_config(explicit: Option<&Path>, root: &Path) -> Result<StrataConfig> {
	let path = match explicit {
		Some(path) => path.to_path_buf(),
		None => {
			let default = root.join(CONFIG_FILE);
			if !default.exists() {
				ui::debug("No config file, using defaults");
				return Ok(StrataConfig::default());
			}
			default
		}
	};

	ui::debug(&format!("Loading config from {}", path.display()));
	StrataConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

pub(crate) fn print_clusters(result: &ClusteringResult, base: &Path, preview_count: usize) {
	ui::success(&format!(
		"{} clusters, {} notes, {} noise ({:.1}%)",
		result.clusters.len(),
		result.stats.total_notes,
		result.noise_notes.len(),
		result.noise_percent()
	));

	let base = if base.is_dir() { base } else { base.parent().unwrap_or(base) };
	if !result.clusters.is_empty() {
		ui::header("Clusters");
	}

	for cluster in &result.clusters {
		let title = if cluster.candidate_names.is_empty() {
			"unnamed".dimmed().to_string()
		} else {
			cluster.candidate_names.join(", ").bright_white().to_string()
		};
		eprintln!(
			"\n{} {} {} ({} notes, {:.1}% linked)",
			"Cluster".bright_white(),
			cluster.id.to_string().bright_cyan(),
			title,
			cluster.len(),
			cluster.internal_link_density * 100.0
		);

		if let Some(folder) = &cluster.folder_path {
			eprintln!("  {}: {}", "Folder".dimmed(), folder);
		}
		if !cluster.dominant_tags.is_empty() {
			let tags: Vec<String> = cluster.dominant_tags.iter().map(|t| format!("#{}", t)).collect();
			eprintln!("  {}: {}", "Tags".dimmed(), tags.join(" ").yellow());
		}

		let shown = preview_count.min(cluster.representative_notes.len());
		for (i, note) in cluster.representative_notes.iter().take(shown).enumerate() {
			eprintln!(
				"  {} {}",
				format!("[{}]", i + 1).dimmed(),
				ui::path_link(&base.join(note), 60)
			);
		}

		if cluster.len() > shown {
			eprintln!("  {}", format!("... and {} more", cluster.len() - shown).dimmed());
		}
	}

	if !result.noise_notes.is_empty() {
		eprintln!("\n{} ({} notes)", "Noise".bright_yellow(), result.noise_notes.len());
		for note in result.noise_notes.iter().take(10) {
			eprintln!("  {}", ui::path_link(&base.join(note), 60));
		}
		if result.noise_notes.len() > 10 {
			eprintln!(
				"  {}",
				format!("... and {} more", result.noise_notes.len() - 10).dimmed()
			);
		}
	}
}

pub(crate) fn export_clusters(
	corpus: &str,
	result: &ClusteringResult,
	report: Option<&UpdateReport>,
	export_path: &Path,
) -> Result<()> {
	let export_data = ClusterExport {
		corpus,
		timestamp: chrono::Utc::now().to_rfc3339(),
		stats: result.stats,
		clusters: result.summaries(),
		noise: &result.noise_notes,
		update: report,
	};

	let json = serde_json::to_string_pretty(&export_data)?;

	if export_path.to_str() == Some("-") || export_path.as_os_str().is_empty() {
		// Output to stdout
		println!("{}", json);
	} else {
		std::fs::write(export_path, json)
			.with_context(|| format!("Failed to write {}", export_path.display()))?;
		ui::success(&format!("Exported to {}", export_path.display()));
	}

	Ok(())
}
