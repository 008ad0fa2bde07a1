//! Backup orchestrator: prereq → key → collect → (dry-run terminal) |
//! lock → manifest → stage → replicate → notify.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::archive;
use crate::collector::{CollectedFile, CollectorConfig, FileCollector};
use crate::config::Config;
use crate::crypto;
use crate::diskspace;
use crate::error::EngineError;
use crate::lock;
use crate::manifest::{self, BuildOptions};
use crate::notify::{resolve_hostname, Notifier};
use crate::providers::{self, Provider};
use crate::util::ScopedTempDir;

use super::DryRunSummary;

#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
	pub destination: Option<String>,
	pub dry_run: bool,
	pub include_transcripts_override: Option<bool>,
	pub include_persistor_override: Option<bool>,
	pub skip_pre_backup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupResult {
	pub timestamp: DateTime<Utc>,
	pub archive_name: Option<String>,
	pub succeeded_providers: Vec<String>,
	pub skipped_destinations: Vec<String>,
	pub archive_size: u64,
	pub dry_run: Option<DryRunSummary>,
}

/// Paths derived from the host's home directory: lock, notification, and
/// default key locations all live under `<home>/.openclaw/`.
pub struct HostPaths {
	pub home: PathBuf,
}

impl HostPaths {
	pub fn new(home: impl Into<PathBuf>) -> Self {
		Self { home: home.into() }
	}

	pub fn lock_path(&self) -> PathBuf {
		self.home.join(".openclaw/.backup.lock")
	}

	pub fn last_result_path(&self) -> PathBuf {
		self.home.join(".openclaw/backup-last-result.json")
	}

	pub fn alerts_path(&self) -> PathBuf {
		self.home.join(".openclaw/backup-alerts.jsonl")
	}

	pub fn index_cache_path(&self) -> PathBuf {
		self.home.join(".openclaw/backup-index-cache.json")
	}

	pub fn default_key_path(&self) -> PathBuf {
		self.home.join(".openclaw/.secrets/backup.age")
	}

	pub fn retired_keys_dir(&self) -> PathBuf {
		self.home.join(".openclaw/.secrets/backup-keys")
	}
}

#[instrument(skip(config, host, options))]
pub async fn run_backup(
	config: &Config,
	host: &HostPaths,
	options: BackupOptions,
) -> Result<BackupResult, EngineError> {
	let notifier = Notifier::new(
		host.last_result_path(),
		host.alerts_path(),
		config.alert_after_failures,
	);
	let hostname = resolve_hostname(config.hostname.as_deref());

	match run_inner(config, host, &options, &hostname).await {
		Ok(result) => {
			if !options.dry_run {
				let details = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);
				if let Err(e) = notifier.record_success(&hostname, details) {
					warn!(error = %e, "failed to write success notification");
				}
			}
			Ok(result)
		}
		Err(e) => {
			if let Err(notify_err) = notifier.record_failure(&hostname, &e.to_string()) {
				warn!(error = %notify_err, "failed to write failure notification");
			}
			Err(e)
		}
	}
}

async fn run_inner(
	config: &Config,
	host: &HostPaths,
	options: &BackupOptions,
	hostname: &str,
) -> Result<BackupResult, EngineError> {
	let providers = select_providers(config, options.destination.as_deref())?;

	check_prerequisites(config, &providers).await?;

	let key_path = key_path_for(config, host);
	if config.encrypt {
		ensure_key(&key_path)?;
	}

	let include_transcripts = options
		.include_transcripts_override
		.unwrap_or(config.include_transcripts);
	let include_persistor = options
		.include_persistor_override
		.unwrap_or(config.include_persistor);

	let collector_config = CollectorConfig {
		include_roots: config.include.iter().map(PathBuf::from).collect(),
		extra_roots: config.extra_paths.iter().map(PathBuf::from).collect(),
		exclude_patterns: config.exclude.clone(),
	};
	let files = FileCollector::collect(&collector_config)?;

	if options.dry_run {
		let total_bytes = files.iter().map(|f| f.size_bytes).sum();
		info!(file_count = files.len(), total_bytes, "dry run, no lock acquired");
		return Ok(BackupResult {
			timestamp: Utc::now(),
			archive_name: None,
			succeeded_providers: Vec::new(),
			skipped_destinations: Vec::new(),
			archive_size: 0,
			dry_run: Some(DryRunSummary {
				file_count: files.len(),
				total_bytes,
			}),
		});
	}

	if !config.skip_disk_check {
		let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
		let staging_check_dir = config
			.temp_dir
			.as_deref()
			.map(crate::config::expand_tilde)
			.unwrap_or_else(std::env::temp_dir);
		diskspace::check(&staging_check_dir, total_bytes)?;
	}

	let lock_handle = lock::acquire(&host.lock_path())?;
	let run_result = replicate_run(config, &files, &key_path, hostname, &providers).await;

	// Guaranteed-release-on-all-exits: lock is released whether the run
	// succeeded or failed.
	if let Err(e) = lock_handle.release() {
		warn!(error = %e, "failed to release lock");
	}

	run_result
}

async fn replicate_run(
	config: &Config,
	files: &[CollectedFile],
	key_path: &Path,
	hostname: &str,
	providers: &[Provider],
) -> Result<BackupResult, EngineError> {
	let timestamp = Utc::now();

	let manifest = manifest::build_manifest(
		files,
		timestamp,
		BuildOptions {
			plugin_version: env!("CARGO_PKG_VERSION").to_string(),
			openclaw_version: Some(env!("CARGO_PKG_VERSION").to_string()),
			hostname: hostname.to_string(),
			encrypted: config.encrypt,
			key_id: if config.encrypt {
				Some(crypto::get_key_id(key_path)?)
			} else {
				None
			},
			include_transcripts: config.include_transcripts,
			include_persistor: config.include_persistor,
			persistor_export: None,
			hash_concurrency: None,
		},
	)
	.await?;

	let manifest_json = manifest::serialize(&manifest)?;

	let staging_under = config.temp_dir.as_deref().map(crate::config::expand_tilde);
	let archive_temp = ScopedTempDir::new(staging_under.as_deref())?;

	let ts = filename_timestamp(timestamp);
	let suffix = if config.encrypt { ".tar.gz.age" } else { ".tar.gz" };
	let archive_filename = format!("{hostname}-{ts}{suffix}");
	let remote_name = format!("{hostname}/{archive_filename}");
	let sidecar_filename = crate::util::sidecar_path(&archive_filename);
	let remote_sidecar_name = format!("{hostname}/{sidecar_filename}");

	let local_archive_path = archive_temp.path().join(&archive_filename);
	let local_sidecar_path = archive_temp.path().join(&sidecar_filename);

	archive::create_archive(
		files,
		&manifest_json,
		&local_archive_path,
		if config.encrypt { Some(key_path) } else { None },
		staging_under.as_deref(),
		archive::DEFAULT_CREATE_TIMEOUT,
	)
	.await?;

	std::fs::write(&local_sidecar_path, &manifest_json)
		.map_err(|e| EngineError::io(&local_sidecar_path, e))?;

	let archive_size = std::fs::metadata(&local_archive_path)
		.map(|m| m.len())
		.unwrap_or(0);

	let mut available = Vec::new();
	let mut skipped = Vec::new();
	for provider in providers {
		let check = provider.check().await;
		if check.available {
			available.push(provider);
		} else {
			warn!(provider = provider.name(), reason = ?check.error, "destination unavailable, skipping");
			skipped.push(provider.name().to_string());
		}
	}

	if available.is_empty() {
		return Err(EngineError::other("no destination available for this backup run"));
	}

	// Settle-all: every provider's push is awaited even if others fail.
	let pushes = futures::future::join_all(available.iter().map(|provider| {
		let remote_name = remote_name.clone();
		let remote_sidecar_name = remote_sidecar_name.clone();
		async move {
			// archive.push and manifest.push to the same provider ARE ordered.
			let archive_push = provider.push(&local_archive_path, &remote_name).await;
			if archive_push.is_err() {
				return (provider.name().to_string(), archive_push);
			}
			let sidecar_push = provider.push(&local_sidecar_path, &remote_sidecar_name).await;
			(provider.name().to_string(), sidecar_push)
		}
	}))
	.await;

	let mut succeeded = Vec::new();
	for (name, result) in pushes {
		match result {
			Ok(()) => succeeded.push(name),
			Err(e) => warn!(provider = name, error = %e, "replication failed for this provider"),
		}
	}

	if succeeded.is_empty() {
		return Err(EngineError::other("replication failed for every available provider"));
	}

	Ok(BackupResult {
		timestamp,
		archive_name: Some(remote_name),
		succeeded_providers: succeeded,
		skipped_destinations: skipped,
		archive_size,
		dry_run: None,
	})
}

fn select_providers(config: &Config, destination: Option<&str>) -> Result<Vec<Provider>, EngineError> {
	let all = providers::build_all(config);
	match destination {
		Some(name) => {
			let matching: Vec<Provider> = all.into_iter().filter(|p| p.name() == name).collect();
			if matching.is_empty() {
				return Err(EngineError::other(format!("destination {name:?} is not configured")));
			}
			Ok(matching)
		}
		None => Ok(all),
	}
}

async fn check_prerequisites(config: &Config, providers: &[Provider]) -> Result<(), EngineError> {
	if !archive::is_tar_available() {
		return Err(EngineError::PrerequisiteMissing {
			tool: "tar".to_string(),
			hint: "install a tar-compatible archiver and ensure it is on PATH".to_string(),
		});
	}

	if config.encrypt && !crypto::is_available() {
		return Err(EngineError::PrerequisiteMissing {
			tool: "age".to_string(),
			hint: "install an age-compatible encryptor and ensure it is on PATH".to_string(),
		});
	}

	for provider in providers {
		if let Provider::RemoteSync(p) = provider {
			if !p.is_available().await {
				return Err(EngineError::PrerequisiteMissing {
					tool: crate::providers::remote_sync::REMOTE_SYNC_BIN.to_string(),
					hint: format!("destination {:?} requires the remote-sync tool on PATH", provider.name()),
				});
			}
		}
	}

	Ok(())
}

fn key_path_for(config: &Config, host: &HostPaths) -> PathBuf {
	config
		.encrypt_key_path
		.as_deref()
		.map(crate::config::expand_tilde)
		.unwrap_or_else(|| host.default_key_path())
}

fn ensure_key(key_path: &Path) -> Result<(), EngineError> {
	if key_path.exists() {
		// Verify readable.
		crypto::get_key_id(key_path)?;
		return Ok(());
	}

	warn!(
		?key_path,
		"no encryption key found, generating a new one — back this up, it cannot be recovered if lost"
	);
	crypto::generate_key(key_path)?;
	Ok(())
}

/// `<ts>` with `:` replaced by `-` in the date-time portion.
fn filename_timestamp(ts: DateTime<Utc>) -> String {
	ts.format("%Y-%m-%dT%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filename_timestamp_has_no_colons() {
		let ts: DateTime<Utc> = "2024-01-01T12:34:56Z".parse().unwrap();
		assert_eq!(filename_timestamp(ts), "2024-01-01T12-34-56");
	}

	#[test]
	fn host_paths_nest_under_dot_openclaw() {
		let host = HostPaths::new("/home/alice");
		assert_eq!(host.lock_path(), Path::new("/home/alice/.openclaw/.backup.lock"));
		assert_eq!(
			host.default_key_path(),
			Path::new("/home/alice/.openclaw/.secrets/backup.age")
		);
	}
}
