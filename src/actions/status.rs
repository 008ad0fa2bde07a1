use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use crate::crypto;
use crate::notify::Notifier;
use crate::orchestrator::backup::HostPaths;
use crate::providers;

use super::Context;

/// Report the last backup outcome, key state, and a cross-provider index
/// summary, without running a backup.
#[derive(Debug, Clone, Parser)]
pub struct StatusArgs {
	/// Path to the backup config file (JSON5).
	#[arg(long, default_value = "backup.json5")]
	pub config: PathBuf,

	/// If the config is nested under a key of a larger document, its name.
	#[arg(long)]
	pub config_key: Option<String>,

	/// Home directory the status is reported for.
	///
	/// Defaults to the current user's home directory.
	#[arg(long)]
	pub home: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
	last_result: Option<crate::notify::BackupNotification>,
	startup_warning: Option<String>,
	key: crypto::KeyInfo,
	index: crate::index::BackupIndex,
}

pub async fn run(ctx: Context<StatusArgs>) -> Result<()> {
	let StatusArgs {
		config: config_path,
		config_key,
		home,
	} = ctx.args_top;

	let config = crate::config::load(&config_path, config_key.as_deref()).into_diagnostic()?;
	let home = home.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."));
	let host = HostPaths::new(home);
	let all_providers = providers::build_all(&config);

	let notifier = Notifier::new(host.last_result_path(), host.alerts_path(), config.alert_after_failures);

	let key_path = config
		.encrypt_key_path
		.as_deref()
		.map(crate::config::expand_tilde)
		.unwrap_or_else(|| host.default_key_path());
	let key = crypto::inspect_key(&key_path, &host.retired_keys_dir());

	let index_manager = crate::index::IndexManager::new(host.index_cache_path());
	let index = index_manager.get_index(&all_providers).await.into_diagnostic()?;

	let report = StatusReport {
		last_result: notifier.last_result(),
		startup_warning: notifier.startup_check(),
		key,
		index,
	};

	println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);

	Ok(())
}
