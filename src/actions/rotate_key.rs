use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use tracing::info;

use crate::orchestrator::backup::HostPaths;
use crate::orchestrator::rotate::{run_rotate, RotateOptions};
use crate::providers;

use super::Context;

/// Retire the current encryption key and generate a new one.
#[derive(Debug, Clone, Parser)]
pub struct RotateKeyArgs {
	/// Path to the backup config file (JSON5).
	#[arg(long, default_value = "backup.json5")]
	pub config: PathBuf,

	/// If the config is nested under a key of a larger document, its name.
	#[arg(long)]
	pub config_key: Option<String>,

	/// Home directory to root key and lock files under.
	///
	/// Defaults to the current user's home directory.
	#[arg(long)]
	pub home: Option<PathBuf>,

	/// Also re-encrypt every backup already stored under the old key.
	///
	/// This pulls, decrypts, re-encrypts, and pushes every encrypted
	/// archive on every configured destination: it can take a long time
	/// and uses as much bandwidth as a full second backup.
	#[arg(long)]
	pub reencrypt_existing: bool,
}

pub async fn run(ctx: Context<RotateKeyArgs>) -> Result<()> {
	let RotateKeyArgs {
		config: config_path,
		config_key,
		home,
		reencrypt_existing,
	} = ctx.args_top;

	let config = crate::config::load(&config_path, config_key.as_deref()).into_diagnostic()?;
	let home = home.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."));
	let host = HostPaths::new(home);
	let all_providers = providers::build_all(&config);

	let key_path = config
		.encrypt_key_path
		.as_deref()
		.map(crate::config::expand_tilde)
		.unwrap_or_else(|| host.default_key_path());

	let result = run_rotate(&config, &host, &all_providers, &key_path, RotateOptions { reencrypt_existing })
		.await
		.into_diagnostic()?;

	info!(
		old_key_id = ?result.old_key_id,
		new_key_id = result.new_key_id,
		reencrypted = result.reencrypted.len(),
		errors = result.reencrypt_errors.len(),
		"key rotated"
	);

	println!("{}", serde_json::to_string_pretty(&result).into_diagnostic()?);

	Ok(())
}
