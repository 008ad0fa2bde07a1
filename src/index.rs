//! Cross-provider index: remote lightweight-index fast path, per-provider
//! manifest-scan fallback, local cache with TTL.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::EngineError;
use crate::manifest::{self, BackupManifest};
use crate::providers::Provider;
use crate::util::bounded_map;
use crate::util::sidecar::sidecar_path;

pub const LIGHTWEIGHT_INDEX_NAME: &str = "openclaw-index.json";
const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REFRESH_CONCURRENCY: usize = 4;

/// One logical backup across all providers holding it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupEntry {
	pub timestamp: DateTime<Utc>,
	pub filename: String,
	pub providers: Vec<String>,
	pub encrypted: bool,
	pub size_bytes: u64,
	pub file_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupIndex {
	pub last_refreshed: DateTime<Utc>,
	pub entries: Vec<BackupEntry>,
}

pub struct IndexManager {
	cache_path: PathBuf,
}

impl IndexManager {
	pub fn new(cache_path: impl Into<PathBuf>) -> Self {
		Self {
			cache_path: cache_path.into(),
		}
	}

	/// Returns the cached index if fresh enough, else refreshes.
	#[instrument(skip(self, providers))]
	pub async fn get_index(&self, providers: &[Provider]) -> Result<BackupIndex, EngineError> {
		if let Some(cached) = self.read_cache() {
			let age = Utc::now().signed_duration_since(cached.last_refreshed);
			if age < chrono::Duration::from_std(CACHE_TTL).unwrap_or(chrono::Duration::zero()) {
				return Ok(cached);
			}
		}

		self.refresh(providers).await
	}

	fn read_cache(&self) -> Option<BackupIndex> {
		let contents = std::fs::read_to_string(&self.cache_path).ok()?;
		serde_json::from_str(&contents).ok()
	}

	fn write_cache(&self, index: &BackupIndex) {
		let Ok(json) = serde_json::to_string(index) else {
			return;
		};
		if let Err(e) = write_owner_only(&self.cache_path, &json) {
			warn!(path = ?self.cache_path, error = %e, "failed to write index cache");
		}
	}

	pub fn invalidate(&self) -> Result<(), EngineError> {
		match std::fs::remove_file(&self.cache_path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::io(&self.cache_path, e)),
		}
	}

	/// Refreshes from all providers, merges, caches locally, and
	/// best-effort pushes the merged index back as the lightweight index.
	#[instrument(skip(self, providers))]
	pub async fn refresh(&self, providers: &[Provider]) -> Result<BackupIndex, EngineError> {
		let owned: Vec<Provider> = providers.to_vec();
		let per_provider = bounded_map(owned, DEFAULT_REFRESH_CONCURRENCY, |provider| async move {
			let entries = refresh_one(&provider).await;
			(provider.name().to_string(), entries)
		})
		.await;

		let mut merged: BTreeMap<String, BackupEntry> = BTreeMap::new();
		for (provider_name, entries) in per_provider {
			for entry in entries {
				let key = key_for(&entry.filename);
				merged
					.entry(key)
					.and_modify(|existing| {
						let mut set: HashSet<String> = existing.providers.iter().cloned().collect();
						set.insert(provider_name.clone());
						existing.providers = set.into_iter().collect();
						existing.providers.sort();
					})
					.or_insert_with(|| {
						let mut e = entry.clone();
						e.providers = vec![provider_name.clone()];
						e
					});
			}
		}

		let mut entries: Vec<BackupEntry> = merged.into_values().collect();
		entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

		let index = BackupIndex {
			last_refreshed: Utc::now(),
			entries,
		};

		self.write_cache(&index);
		self.push_lightweight(providers, &index).await;

		Ok(index)
	}

	async fn push_lightweight(&self, providers: &[Provider], index: &BackupIndex) {
		let Ok(json) = serde_json::to_string(index) else {
			return;
		};
		let Ok(tmp) = tempfile::NamedTempFile::new() else {
			return;
		};
		if std::fs::write(tmp.path(), &json).is_err() {
			return;
		}

		for provider in providers {
			if let Err(e) = provider.push(tmp.path(), LIGHTWEIGHT_INDEX_NAME).await {
				warn!(provider = provider.name(), error = %e, "failed to push lightweight index");
			}
		}
	}
}

fn key_for(filename: &str) -> String {
	let base = filename
		.strip_suffix(".tar.gz.age")
		.or_else(|| filename.strip_suffix(".tar.gz"))
		.unwrap_or(filename);
	base.to_string()
}

async fn refresh_one(provider: &Provider) -> Vec<BackupEntry> {
	if let Ok(entries) = fetch_lightweight(provider).await {
		return entries;
	}
	fetch_via_manifest_scan(provider).await
}

async fn fetch_lightweight(provider: &Provider) -> Result<Vec<BackupEntry>, EngineError> {
	let tmp = tempfile::NamedTempFile::new().map_err(|e| EngineError::other(e.to_string()))?;
	provider.pull(LIGHTWEIGHT_INDEX_NAME, tmp.path()).await?;
	let contents = std::fs::read_to_string(tmp.path()).map_err(|e| EngineError::io(tmp.path(), e))?;
	let value: serde_json::Value =
		serde_json::from_str(&contents).map_err(|e| EngineError::other(e.to_string()))?;

	if !is_valid_index_shape(&value) {
		return Err(EngineError::other("lightweight index failed shape validation"));
	}

	let index: BackupIndex = serde_json::from_value(value).map_err(|e| EngineError::other(e.to_string()))?;
	Ok(index.entries)
}

fn is_valid_index_shape(value: &serde_json::Value) -> bool {
	let Some(obj) = value.as_object() else {
		return false;
	};
	obj.get("last_refreshed").and_then(|v| v.as_str()).is_some() && obj.get("entries").map(|v| v.is_array()).unwrap_or(false)
}

async fn fetch_via_manifest_scan(provider: &Provider) -> Vec<BackupEntry> {
	let names = match provider.list().await {
		Ok(n) => n,
		Err(e) => {
			warn!(provider = provider.name(), error = %e, "failed to list provider for index fallback");
			return Vec::new();
		}
	};

	let mut entries = Vec::new();
	for name in names {
		if !name.ends_with(".manifest.json") {
			continue;
		}

		let Ok(tmp) = tempfile::NamedTempFile::new() else {
			continue;
		};
		if let Err(e) = provider.pull(&name, tmp.path()).await {
			warn!(provider = provider.name(), name, error = %e, "failed to pull manifest for index");
			continue;
		}

		let Ok(contents) = std::fs::read_to_string(tmp.path()) else {
			continue;
		};
		let Ok(m) = manifest::deserialize(&contents) else {
			continue;
		};

		entries.push(entry_from_manifest(&m, &name));
	}

	entries
}

fn entry_from_manifest(manifest: &BackupManifest, manifest_name: &str) -> BackupEntry {
	let archive_suffix = if manifest.encrypted { ".tar.gz.age" } else { ".tar.gz" };
	let base = manifest_name.trim_end_matches(".manifest.json");
	let filename = format!("{base}{archive_suffix}");
	let _ = sidecar_path(&filename); // keep the two derivations in lockstep

	BackupEntry {
		timestamp: manifest.timestamp,
		filename,
		providers: Vec::new(),
		encrypted: manifest.encrypted,
		size_bytes: manifest.files.iter().map(|f| f.size_bytes).sum(),
		file_count: manifest.files.len(),
	}
}

fn write_owner_only(path: &Path, contents: &str) -> Result<(), EngineError> {
	use std::io::Write;
	use std::os::unix::fs::OpenOptionsExt;

	let tmp_path = path.with_extension("tmp");
	{
		let mut file = std::fs::OpenOptions::new()
			.write(true)
			.create(true)
			.truncate(true)
			.mode(0o600)
			.open(&tmp_path)
			.map_err(|e| EngineError::io(&tmp_path, e))?;
		file.write_all(contents.as_bytes()).map_err(|e| EngineError::io(&tmp_path, e))?;
		file.sync_all().map_err(|e| EngineError::io(&tmp_path, e))?;
	}
	std::fs::rename(&tmp_path, path).map_err(|e| EngineError::io(path, e))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(ts: &str, filename: &str, providers: &[&str]) -> BackupEntry {
		BackupEntry {
			timestamp: ts.parse().unwrap(),
			filename: filename.to_string(),
			providers: providers.iter().map(|s| s.to_string()).collect(),
			encrypted: false,
			size_bytes: 10,
			file_count: 1,
		}
	}

	#[test]
	fn key_for_strips_archive_suffix() {
		assert_eq!(key_for("host-1.tar.gz"), "host-1");
		assert_eq!(key_for("host-1.tar.gz.age"), "host-1");
	}

	#[test]
	fn cache_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let cache = dir.path().join("index.json");
		let manager = IndexManager::new(&cache);

		let index = BackupIndex {
			last_refreshed: Utc::now(),
			entries: vec![entry("2024-01-01T00:00:00Z", "host-1.tar.gz", &["local"])],
		};
		manager.write_cache(&index);

		let read = manager.read_cache().unwrap();
		assert_eq!(read.entries.len(), 1);
	}

	#[test]
	fn invalidate_missing_cache_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		let manager = IndexManager::new(dir.path().join("missing.json"));
		manager.invalidate().unwrap();
	}

	#[test]
	fn shape_validator_rejects_missing_fields() {
		let bad = serde_json::json!({"entries": []});
		assert!(!is_valid_index_shape(&bad));
	}
}
