use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::orchestrator::backup::{run_backup, BackupOptions, HostPaths};

use super::Context;

/// Run a backup now.
#[derive(Debug, Clone, Parser)]
pub struct BackupArgs {
	/// Path to the backup config file (JSON5).
	#[arg(long, default_value = "backup.json5")]
	pub config: PathBuf,

	/// If the config is nested under a key of a larger document, its name.
	#[arg(long)]
	pub config_key: Option<String>,

	/// Home directory to back up and to root lock/notification files under.
	///
	/// Defaults to the current user's home directory.
	#[arg(long)]
	pub home: Option<PathBuf>,

	/// Only push to this destination, instead of all configured ones.
	#[arg(long)]
	pub destination: Option<String>,

	/// Collect and report what would be backed up, without writing anything.
	#[arg(long)]
	pub dry_run: bool,
}

pub async fn run(ctx: Context<BackupArgs>) -> Result<()> {
	let BackupArgs {
		config: config_path,
		config_key,
		home,
		destination,
		dry_run,
	} = ctx.args_top;

	let config = crate::config::load(&config_path, config_key.as_deref()).into_diagnostic()?;
	let home = home.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."));
	let host = HostPaths::new(home);

	let result = run_backup(
		&config,
		&host,
		BackupOptions {
			destination,
			dry_run,
			..Default::default()
		},
	)
	.await
	.into_diagnostic()?;

	if let Some(summary) = &result.dry_run {
		info!(file_count = summary.file_count, total_bytes = summary.total_bytes, "dry run complete");
	} else {
		info!(
			archive = ?result.archive_name,
			providers = ?result.succeeded_providers,
			size = result.archive_size,
			"backup complete"
		);
	}

	println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);

	Ok(())
}
