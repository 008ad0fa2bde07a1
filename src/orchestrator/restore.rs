//! Restore orchestrator: resolve → pull → decrypt → extract → verify →
//! optional safety backup → copy.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{instrument, warn};

use crate::archive;
use crate::config::Config;
use crate::crypto;
use crate::error::EngineError;
use crate::manifest::{self, BackupManifest};
use crate::providers::Provider;
use crate::util::{safe_join, ScopedTempDir};

use super::backup::{run_backup, BackupOptions, HostPaths};
use super::rotate::find_decryption_key;
use super::DryRunSummary;

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
	pub source: String,
	pub timestamp: Option<DateTime<Utc>>,
	pub dry_run: bool,
	pub skip_pre_backup: bool,
	pub suppress_version_warning: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
	pub timestamp: DateTime<Utc>,
	pub file_count: usize,
	pub errors: Vec<String>,
	pub pre_backup_created: bool,
	pub dry_run: bool,
	pub dry_run_summary: Option<DryRunSummary>,
}

struct ArchiveRef {
	filename: String,
	encrypted: bool,
}

#[instrument(skip(config, host, options, providers))]
pub async fn run_restore(
	config: &Config,
	host: &HostPaths,
	providers: &[Provider],
	options: RestoreOptions,
) -> Result<RestoreResult, EngineError> {
	let provider = providers
		.iter()
		.find(|p| p.name() == options.source)
		.ok_or_else(|| EngineError::other(format!("source {:?} is not configured", options.source)))?;

	let archive_ref = resolve_archive_ref(provider, &options).await?;

	let staging_under = config.temp_dir.as_deref().map(crate::config::expand_tilde);
	let staging = ScopedTempDir::new(staging_under.as_deref())?;

	let result = run_with_staging(config, host, provider, &archive_ref, &options, &staging).await;

	// staging is removed by ScopedTempDir's Drop regardless of outcome.
	result
}

async fn run_with_staging(
	config: &Config,
	host: &HostPaths,
	provider: &Provider,
	archive_ref: &ArchiveRef,
	options: &RestoreOptions,
	staging: &ScopedTempDir,
) -> Result<RestoreResult, EngineError> {
	let pulled_path = staging.path().join(&archive_ref.filename);
	provider.pull(&archive_ref.filename, &pulled_path).await?;

	let (decrypted_path, sidecar) = if archive_ref.encrypted {
		let sidecar_name = crate::util::sidecar_path(&archive_ref.filename);
		let sidecar_path_local = staging.path().join(&sidecar_name);
		provider.pull(&sidecar_name, &sidecar_path_local).await?;
		let sidecar_contents =
			std::fs::read_to_string(&sidecar_path_local).map_err(|e| EngineError::io(&sidecar_path_local, e))?;
		let sidecar: BackupManifest = manifest::deserialize(&sidecar_contents)?;

		let key_id = sidecar
			.key_id
			.clone()
			.ok_or_else(|| EngineError::other("encrypted sidecar is missing key_id"))?;
		let key_path = find_decryption_key(config, host, &key_id)?
			.ok_or_else(|| EngineError::other(format!("no key found for key_id {key_id}")))?;

		let decrypted = staging.path().join("archive.tar.gz");
		crypto::decrypt_file(&pulled_path, &decrypted, &key_path)?;
		(decrypted, Some(sidecar))
	} else {
		(pulled_path, None)
	};

	let extract_dir = staging.path().join("extracted");
	archive::extract_archive(&decrypted_path, &extract_dir, archive::DEFAULT_EXTRACT_TIMEOUT).await?;

	let manifest_json = std::fs::read_to_string(extract_dir.join("manifest.json"))
		.map_err(|e| EngineError::io(extract_dir.join("manifest.json"), e))?;
	let embedded: BackupManifest = manifest::deserialize(&manifest_json)?;

	if let Some(sidecar) = &sidecar {
		if sidecar.timestamp != embedded.timestamp || sidecar.hostname != embedded.hostname {
			return Err(EngineError::TamperSuspicion(format!(
				"sidecar ({}, {}) disagrees with embedded manifest ({}, {})",
				sidecar.timestamp, sidecar.hostname, embedded.timestamp, embedded.hostname
			)));
		}
	}

	if !options.suppress_version_warning {
		warn_on_version_mismatch(embedded.openclaw_version.as_deref());
	}

	let validation = manifest::validate_manifest(&embedded, &extract_dir).await?;
	if !validation.valid {
		return Err(EngineError::Integrity {
			path: "manifest.json".to_string(),
			expected: "all files to match their recorded sha256".to_string(),
			actual: validation.errors.join("; "),
		});
	}

	if options.dry_run {
		return Ok(RestoreResult {
			timestamp: embedded.timestamp,
			file_count: embedded.files.len(),
			errors: Vec::new(),
			pre_backup_created: false,
			dry_run: true,
			dry_run_summary: Some(DryRunSummary {
				file_count: embedded.files.len(),
				total_bytes: embedded.files.iter().map(|f| f.size_bytes).sum(),
			}),
		});
	}

	let pre_backup_created = if !options.skip_pre_backup {
		match run_backup(
			config,
			host,
			BackupOptions {
				destination: Some(provider.name().to_string()),
				..Default::default()
			},
		)
		.await
		{
			Ok(_) => true,
			Err(e) => {
				warn!(error = %e, "safety backup before restore failed, proceeding anyway");
				false
			}
		}
	} else {
		false
	};

	let mut errors = Vec::new();
	for file in &embedded.files {
		if let Err(e) = copy_one_file(&extract_dir, &host.home, file) {
			errors.push(format!("{}: {e}", file.path));
		}
	}

	Ok(RestoreResult {
		timestamp: embedded.timestamp,
		file_count: embedded.files.len(),
		errors,
		pre_backup_created,
		dry_run: false,
		dry_run_summary: None,
	})
}

fn copy_one_file(extract_dir: &Path, home: &Path, file: &manifest::ManifestFile) -> Result<(), EngineError> {
	let src = safe_join(extract_dir, &file.path)?;
	let dest = safe_join(home, &file.path)?;

	if let Some(parent) = dest.parent() {
		std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
	}

	std::fs::copy(&src, &dest).map_err(|e| EngineError::io(&dest, e))?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let mode = std::fs::metadata(&src).map_err(|e| EngineError::io(&src, e))?.permissions().mode();
		let restricted = mode & 0o700;
		std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(restricted))
			.map_err(|e| EngineError::io(&dest, e))?;
	}

	Ok(())
}

async fn resolve_archive_ref(provider: &Provider, options: &RestoreOptions) -> Result<ArchiveRef, EngineError> {
	if let Some(timestamp) = options.timestamp {
		let ts = timestamp.format("%Y-%m-%dT%H-%M-%S").to_string();
		let names = provider.list_all().await?;

		if let Some(name) = names.iter().find(|n| n.ends_with(".tar.gz.age") && n.contains(&ts)) {
			return Ok(ArchiveRef {
				filename: name.clone(),
				encrypted: true,
			});
		}
		if let Some(name) = names
			.iter()
			.find(|n| n.ends_with(".tar.gz") && !n.ends_with(".tar.gz.age") && n.contains(&ts))
		{
			return Ok(ArchiveRef {
				filename: name.clone(),
				encrypted: false,
			});
		}

		return Err(EngineError::other(format!(
			"no archive found on {:?} matching timestamp {ts}",
			provider.name()
		)));
	}

	// Latest: consult the index for the newest entry this provider holds.
	// Callers that need index-backed resolution should prefer
	// `orchestrator::restore::resolve_latest_via_index`; falling back to
	// a direct listing keeps this path usable without an index manager.
	let names = provider.list_all().await?;
	let archives: Vec<&String> = names
		.iter()
		.filter(|n| n.ends_with(".tar.gz") || n.ends_with(".tar.gz.age"))
		.collect();
	let mut sorted = archives.clone();
	sorted.sort_by(|a, b| b.cmp(a));

	let newest = sorted
		.into_iter()
		.next()
		.ok_or_else(|| EngineError::other(format!("no archives found on {:?}", provider.name())))?;

	Ok(ArchiveRef {
		filename: newest.clone(),
		encrypted: newest.ends_with(".tar.gz.age"),
	})
}

/// Compares the manifest's recorded major version against the running
/// tool's major version; mismatch is a warning only, never a hard
/// failure, since disaster recovery beats blocked recovery.
fn warn_on_version_mismatch(manifest_version: Option<&str>) {
	let Some(manifest_version) = manifest_version else {
		return;
	};
	let Ok(manifest_semver) = node_semver::Version::parse(manifest_version) else {
		return;
	};
	let Ok(current_semver) = node_semver::Version::parse(env!("CARGO_PKG_VERSION")) else {
		return;
	};

	if manifest_semver.major != current_semver.major {
		warn!(
			manifest_version,
			current_version = env!("CARGO_PKG_VERSION"),
			"backup was created by a different major version of this tool"
		);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn version_mismatch_never_panics_on_bad_semver() {
		warn_on_version_mismatch(Some("not-a-version"));
		warn_on_version_mismatch(None);
	}
}
