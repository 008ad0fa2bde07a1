use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::orchestrator::backup::HostPaths;
use crate::orchestrator::retention::run_retention;
use crate::providers;

use super::Context;

/// Prune old backups down to the configured retention count.
#[derive(Debug, Clone, Parser)]
pub struct PruneArgs {
	/// Path to the backup config file (JSON5).
	#[arg(long, default_value = "backup.json5")]
	pub config: PathBuf,

	/// If the config is nested under a key of a larger document, its name.
	#[arg(long)]
	pub config_key: Option<String>,

	/// Home directory to root the index cache under.
	///
	/// Defaults to the current user's home directory.
	#[arg(long)]
	pub home: Option<PathBuf>,
}

pub async fn run(ctx: Context<PruneArgs>) -> Result<()> {
	let PruneArgs {
		config: config_path,
		config_key,
		home,
	} = ctx.args_top;

	let config = crate::config::load(&config_path, config_key.as_deref()).into_diagnostic()?;
	let home = home.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."));
	let host = HostPaths::new(home);
	let all_providers = providers::build_all(&config);

	let result = run_retention(&config, &host, &all_providers).await.into_diagnostic()?;

	info!(
		deleted = result.deleted.len(),
		kept = result.kept.len(),
		errors = result.errors.len(),
		"retention pruning complete"
	);

	println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);

	Ok(())
}
