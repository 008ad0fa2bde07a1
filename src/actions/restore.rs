use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::orchestrator::backup::HostPaths;
use crate::orchestrator::restore::{run_restore, RestoreOptions};
use crate::providers;

use super::Context;

/// Restore from a backup.
#[derive(Debug, Clone, Parser)]
pub struct RestoreArgs {
	/// Path to the backup config file (JSON5).
	#[arg(long, default_value = "backup.json5")]
	pub config: PathBuf,

	/// If the config is nested under a key of a larger document, its name.
	#[arg(long)]
	pub config_key: Option<String>,

	/// Home directory to restore into and to root lock/notification files under.
	///
	/// Defaults to the current user's home directory.
	#[arg(long)]
	pub home: Option<PathBuf>,

	/// Which configured destination to restore from.
	#[arg(long)]
	pub source: String,

	/// Restore the backup closest to this timestamp, instead of the latest.
	#[arg(long)]
	pub timestamp: Option<DateTime<Utc>>,

	/// Report what would be restored, without writing anything.
	#[arg(long)]
	pub dry_run: bool,

	/// Skip taking a safety backup of the current state before restoring.
	#[arg(long)]
	pub skip_pre_backup: bool,
}

pub async fn run(ctx: Context<RestoreArgs>) -> Result<()> {
	let RestoreArgs {
		config: config_path,
		config_key,
		home,
		source,
		timestamp,
		dry_run,
		skip_pre_backup,
	} = ctx.args_top;

	let config = crate::config::load(&config_path, config_key.as_deref()).into_diagnostic()?;
	let home = home.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."));
	let host = HostPaths::new(home);
	let all_providers = providers::build_all(&config);

	let result = run_restore(
		&config,
		&host,
		&all_providers,
		RestoreOptions {
			source,
			timestamp,
			dry_run,
			skip_pre_backup,
			suppress_version_warning: false,
		},
	)
	.await
	.into_diagnostic()?;

	info!(
		file_count = result.file_count,
		errors = result.errors.len(),
		pre_backup_created = result.pre_backup_created,
		"restore complete"
	);

	println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);

	if !result.errors.is_empty() {
		for error in &result.errors {
			tracing::warn!(%error, "file restore error");
		}
	}

	Ok(())
}
