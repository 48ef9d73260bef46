use clap::builder::styling::{AnsiColor, Color, Style};
use clap::{builder::Styles, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

fn parse_corpus(s: &str) -> Result<String, String> {
	if s.is_empty() || s.starts_with('.') || s.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
		Err(format!("'{}' is not a valid corpus name", s))
	} else {
		Ok(s.to_string())
	}
}

fn ansi(color: AnsiColor) -> Style {
	Style::new().fg_color(Some(Color::Ansi(color)))
}

fn styles() -> Styles {
	Styles::styled()
		.header(ansi(AnsiColor::Blue).bold())
		.usage(ansi(AnsiColor::Blue).bold())
		.literal(ansi(AnsiColor::Blue))
		.placeholder(ansi(AnsiColor::Yellow))
		.valid(ansi(AnsiColor::Blue))
		.invalid(ansi(AnsiColor::Red))
}

#[derive(Parser, Debug)]
#[command(
	name = "strata",
	author,
	version,
	about = "Embedding-based thematic clustering for note vaults",
	styles = styles(),
	disable_help_subcommand = true,
	after_help = format!(
		"{title}
  {strata} {cluster}  {cluster_args}        {cluster_desc}
  {strata} {cluster}  {force_args}  {force_desc}
  {strata} {cluster}  {export_args}   {export_desc}
  {strata} {show}     {show_args}              {show_desc}
  {strata} {clean}    {clean_args}           {clean_desc}",
		title = "Examples:".bright_blue().bold(),
		strata = "strata".bright_blue(),
		cluster = "cluster".yellow(),
		cluster_args = "-i ./vault/",
		cluster_desc = "Cluster notes, incrementally when possible".dimmed(),
		force_args = "-i notes.json -f --seed 7",
		force_desc = "Full recluster with a fixed seed".dimmed(),
		export_args = "-i ./vault/ -e -",
		export_desc = "Print clusters as JSON".dimmed(),
		show = "show".yellow(),
		show_args = "-d ./vault/",
		show_desc = "Print the stored clustering".dimmed(),
		clean = "clean".yellow(),
		clean_args = "-d ./vault/ -y",
		clean_desc = "Remove stored state".dimmed(),
	),
)]
pub struct Cli {
	/// Enable verbose debug output
	#[arg(short = 'v', long = "verbose", global = true)]
	pub verbose: bool,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Cluster embedded notes and persist the result
	Cluster {
		/// Corpus JSON file, or directory of per-note JSON records
		#[arg(short = 'i', long = "input", default_value = ".")]
		input: PathBuf,

		/// Directory holding .strata/ (default: the corpus directory)
		#[arg(short = 'd', long = "dir")]
		state_dir: Option<PathBuf>,

		/// Name the state is stored under
		#[arg(short = 'c', long = "corpus", default_value = "vault", value_parser = parse_corpus)]
		corpus: String,

		/// JSON config file (default: strata.json next to the state)
		#[arg(long = "config", value_name = "PATH")]
		config: Option<PathBuf>,

		/// Ignore stored state and recluster everything
		#[arg(short = 'f', long = "force")]
		force: bool,

		/// Seed for the reducer (overrides the config)
		#[arg(long = "seed")]
		seed: Option<u64>,

		/// Notes previewed per cluster
		#[arg(short = 'n', long = "preview", default_value_t = 5)]
		preview: usize,

		/// Export clusters as JSON ("-" for stdout)
		#[arg(short = 'e', long = "export", value_name = "PATH")]
		export: Option<PathBuf>,
	},

	/// Print the stored clustering of a corpus
	Show {
		/// Directory holding .strata/
		#[arg(short = 'd', long = "dir", default_value = ".")]
		directory: PathBuf,

		/// Corpus name
		#[arg(short = 'c', long = "corpus", default_value = "vault", value_parser = parse_corpus)]
		corpus: String,

		/// Notes previewed per cluster
		#[arg(short = 'n', long = "preview", default_value_t = 5)]
		preview: usize,

		/// Export clusters as JSON ("-" for stdout)
		#[arg(short = 'e', long = "export", value_name = "PATH")]
		export: Option<PathBuf>,
	},

	/// Remove stored clustering state
	Clean {
		/// Directory holding .strata/
		#[arg(short = 'd', long = "dir", default_value = ".")]
		directory: PathBuf,

		/// Only this corpus (default: all)
		#[arg(short = 'c', long = "corpus", value_parser = parse_corpus)]
		corpus: Option<String>,

		/// Skip the confirmation prompt
		#[arg(short = 'y', long = "yes")]
		auto_confirm: bool,
	},

	/// Show help for a subcommand
	Help {
		/// Subcommand name
		subcommand: Option<String>,
	},
}

#[cfg(test)]
mod tests {
	use super::*;
	use clap::CommandFactory;

	#[test]
	fn test_cli_definition() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_cluster_defaults() {
		let cli = Cli::parse_from(["strata", "cluster", "-i", "notes.json"]);
		match cli.command {
			Command::Cluster { input, corpus, force, seed, preview, .. } => {
				assert_eq!(input, PathBuf::from("notes.json"));
				assert_eq!(corpus, "vault");
				assert!(!force);
				assert_eq!(seed, None);
				assert_eq!(preview, 5);
			}
			other => panic!("unexpected command: {:?}", other),
		}
	}

	#[test]
	fn test_rejects_bad_corpus_name() {
		assert!(Cli::try_parse_from(["strata", "show", "-c", "../etc"]).is_err());
		assert!(Cli::try_parse_from(["strata", "show", "-c", "notes-2024"]).is_ok());
	}
}
