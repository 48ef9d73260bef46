//! Strata - notes, layered by meaning
//!
//! Groups embedded notes into themes and keeps the grouping up to date
//! as notes change.

use anyhow::Result;
use clap::{CommandFactory, Parser};

use strata::cli::{Cli, Command};
use strata::commands::{clean, cluster, show};
use strata::ui::{self, Log};

fn main() -> Result<()> {
	let cli = Cli::parse();

	Log::set_verbose(cli.verbose);

	match cli.command {
		Command::Cluster {
			input,
			state_dir,
			corpus,
			config,
			force,
			seed,
			preview,
			export,
		} => {
			if export.is_none() {
				ui::print_logo();
			}
			cluster::run(&cluster::ClusterArgs {
				input,
				state_dir,
				corpus,
				config,
				force,
				seed,
				preview_count: preview,
				export,
			})
		}
		Command::Show { directory, corpus, preview, export } => {
			show::run(&directory, &corpus, preview, export.as_deref())
		}
		Command::Clean { directory, corpus, auto_confirm } => {
			clean::run(&directory, corpus.as_deref(), auto_confirm)
		}
		Command::Help { subcommand } => {
			let mut cmd = Cli::command();
			if let Some(sub) = subcommand {
				if let Some(sub_cmd) = cmd.find_subcommand_mut(&sub) {
					sub_cmd.print_help()?;
				} else {
					ui::error(&format!("Unknown subcommand: {}", sub));
					cmd.print_help()?;
				}
			} else {
				cmd.print_help()?;
			}
			Ok(())
		}
	}
}
