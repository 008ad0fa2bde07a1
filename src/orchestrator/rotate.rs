//! Key rotation orchestrator: the key-lifecycle manager. Finds the right
//! decryption key for an old backup, and rotates the active key,
//! optionally re-encrypting everything already stored.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::crypto;
use crate::error::EngineError;
use crate::index::IndexManager;
use crate::providers::Provider;
use crate::util::ScopedTempDir;

use super::backup::HostPaths;

#[derive(Debug, Clone, Default)]
pub struct RotateOptions {
	pub reencrypt_existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotateResult {
	pub old_key_id: Option<String>,
	pub new_key_id: String,
	pub reencrypted: Vec<String>,
	pub reencrypt_errors: Vec<String>,
}

/// Find-decryption-key: the current key first, then the fast path
/// (`<retired-dir>/<key_id>.age`), then a linear scan of the
/// retired directory for a match.
pub fn find_decryption_key(config: &Config, host: &HostPaths, key_id: &str) -> Result<Option<PathBuf>, EngineError> {
	let current_key_path = config
		.encrypt_key_path
		.as_deref()
		.map(crate::config::expand_tilde)
		.unwrap_or_else(|| host.default_key_path());

	if current_key_path.exists() {
		if let Ok(current_id) = crypto::get_key_id(&current_key_path) {
			if current_id == key_id {
				return Ok(Some(current_key_path));
			}
		}
	}

	let retired_dir = host.retired_keys_dir();
	let fast_path = retired_dir.join(format!("{key_id}.age"));
	if fast_path.exists() {
		return Ok(Some(fast_path));
	}

	let entries = match std::fs::read_dir(&retired_dir) {
		Ok(e) => e,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(EngineError::io(&retired_dir, e)),
	};

	for entry in entries {
		let entry = entry.map_err(|e| EngineError::io(&retired_dir, e))?;
		let path = entry.path();
		if path.extension().and_then(|s| s.to_str()) != Some("age") {
			continue;
		}
		if let Ok(id) = crypto::get_key_id(&path) {
			if id == key_id {
				return Ok(Some(path));
			}
		}
	}

	Ok(None)
}

/// Rotates the active key at `key_path`: the old key (if any) is copied
/// into the retired directory under its own key id before the new key is
/// installed, so `find_decryption_key` can still locate it for old
/// backups. Installation is an atomic rename: a reader never observes a
/// partially-written key file.
#[instrument(skip(config, host, providers))]
pub async fn run_rotate(
	config: &Config,
	host: &HostPaths,
	providers: &[Provider],
	key_path: &Path,
	options: RotateOptions,
) -> Result<RotateResult, EngineError> {
	let old_key_id = if key_path.exists() {
		Some(crypto::get_key_id(key_path)?)
	} else {
		None
	};

	if let Some(old_id) = &old_key_id {
		retire_old_key(key_path, &host.retired_keys_dir(), old_id)?;
	}

	let new_key_id = install_new_key(key_path)?;

	let mut result = RotateResult {
		old_key_id: old_key_id.clone(),
		new_key_id,
		reencrypted: Vec::new(),
		reencrypt_errors: Vec::new(),
	};

	if options.reencrypt_existing {
		reencrypt_all(config, host, providers, key_path, &mut result).await;
	}

	Ok(result)
}

fn retire_old_key(key_path: &Path, retired_dir: &Path, old_key_id: &str) -> Result<(), EngineError> {
	std::fs::create_dir_all(retired_dir).map_err(|e| EngineError::io(retired_dir, e))?;
	let dest = retired_dir.join(format!("{old_key_id}.age"));
	std::fs::copy(key_path, &dest).map_err(|e| EngineError::io(&dest, e))?;

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o600))
			.map_err(|e| EngineError::io(&dest, e))?;
	}

	Ok(())
}

fn install_new_key(key_path: &Path) -> Result<String, EngineError> {
	let dir = key_path.parent().unwrap_or_else(|| Path::new("."));
	std::fs::create_dir_all(dir).map_err(|e| EngineError::io(dir, e))?;

	let temp_path = dir.join(format!(".{}.new", key_path.file_name().and_then(|n| n.to_str()).unwrap_or("key")));
	if temp_path.exists() {
		std::fs::remove_file(&temp_path).map_err(|e| EngineError::io(&temp_path, e))?;
	}

	crypto::generate_key(&temp_path)?;
	let new_key_id = crypto::get_key_id(&temp_path)?;

	std::fs::rename(&temp_path, key_path).map_err(|e| EngineError::io(key_path, e))?;

	Ok(new_key_id)
}

/// Bulk re-encryption: walks the merged index across every provider,
/// pulls and decrypts each archive with its recorded key, re-encrypts
/// under the new key, and pushes the replacement back. Best-effort: one
/// archive's failure is recorded and does not stop the rest.
async fn reencrypt_all(
	config: &Config,
	host: &HostPaths,
	providers: &[Provider],
	new_key_path: &Path,
	result: &mut RotateResult,
) {
	let index_manager = IndexManager::new(host.index_cache_path());
	let index = match index_manager.refresh(providers).await {
		Ok(i) => i,
		Err(e) => {
			warn!(error = %e, "failed to refresh index before re-encryption");
			result.reencrypt_errors.push(format!("index refresh: {e}"));
			return;
		}
	};

	for entry in &index.entries {
		if !entry.encrypted {
			continue;
		}
		for provider_name in &entry.providers {
			let Some(provider) = providers.iter().find(|p| p.name() == *provider_name) else {
				continue;
			};

			match reencrypt_one(config, host, provider, &entry.filename, new_key_path).await {
				Ok(()) => result.reencrypted.push(format!("{}@{}", entry.filename, provider_name)),
				Err(e) => result
					.reencrypt_errors
					.push(format!("{}@{}: {e}", entry.filename, provider_name)),
			}
		}
	}
}

async fn reencrypt_one(
	config: &Config,
	host: &HostPaths,
	provider: &Provider,
	filename: &str,
	new_key_path: &Path,
) -> Result<(), EngineError> {
	let staging_under = config.temp_dir.as_deref().map(crate::config::expand_tilde);
	let staging = ScopedTempDir::new(staging_under.as_deref())?;

	let sidecar_name = crate::util::sidecar_path(filename);
	let old_archive_path = staging.path().join(filename);
	let sidecar_path = staging.path().join(&sidecar_name);

	provider.pull(filename, &old_archive_path).await?;
	provider.pull(&sidecar_name, &sidecar_path).await?;

	let sidecar_contents = std::fs::read_to_string(&sidecar_path).map_err(|e| EngineError::io(&sidecar_path, e))?;
	let manifest: crate::manifest::BackupManifest = crate::manifest::deserialize(&sidecar_contents)?;
	let key_id = manifest
		.key_id
		.clone()
		.ok_or_else(|| EngineError::other("encrypted archive's sidecar is missing key_id"))?;

	let old_key_path = find_decryption_key(config, host, &key_id)?
		.ok_or_else(|| EngineError::other(format!("no key found for key_id {key_id}")))?;

	let plain_path = staging.path().join("plain.tar.gz");
	crypto::decrypt_file(&old_archive_path, &plain_path, &old_key_path)?;

	let new_archive_path = staging.path().join(format!("{filename}.new"));
	crypto::encrypt_file(&plain_path, &new_archive_path, new_key_path)?;

	let new_key_id = crypto::get_key_id(new_key_path)?;
	let mut new_manifest = manifest;
	new_manifest.key_id = Some(new_key_id);
	let new_sidecar_json = crate::manifest::serialize(&new_manifest)?;
	let new_sidecar_path = staging.path().join("sidecar.new");
	std::fs::write(&new_sidecar_path, &new_sidecar_json).map_err(|e| EngineError::io(&new_sidecar_path, e))?;

	provider.push(&new_archive_path, filename).await?;
	provider.push(&new_sidecar_path, &sidecar_name).await?;

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn find_decryption_key_returns_none_when_retired_dir_is_absent() {
		let dir = tempfile::tempdir().unwrap();
		let config = test_config();
		let host = HostPaths::new(dir.path().join("home"));
		let result = find_decryption_key(&config, &host, "deadbeefdeadbeef").unwrap();
		assert!(result.is_none());
	}

	fn test_config() -> Config {
		Config {
			encrypt: true,
			encrypt_key_path: None,
			include: Vec::new(),
			extra_paths: Vec::new(),
			exclude: Vec::new(),
			include_transcripts: false,
			include_persistor: false,
			retention: crate::config::RetentionConfig { count: 5 },
			destinations: Default::default(),
			schedule: None,
			hostname: None,
			temp_dir: None,
			skip_disk_check: false,
			alert_after_failures: 3,
		}
	}
}
