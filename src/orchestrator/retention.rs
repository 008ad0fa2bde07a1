//! Retention pruner: keep the newest `retention.count` backups across
//! the merged index, delete the rest from every provider
//! that holds them.

use serde::Serialize;
use tracing::{instrument, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::index::IndexManager;
use crate::providers::Provider;
use crate::util::sidecar_path;

use super::backup::HostPaths;

#[derive(Debug, Clone, Serialize)]
pub struct RetentionResult {
	pub deleted: Vec<String>,
	pub kept: Vec<String>,
	pub errors: Vec<String>,
}

#[instrument(skip(config, host, providers))]
pub async fn run_retention(
	config: &Config,
	host: &HostPaths,
	providers: &[Provider],
) -> Result<RetentionResult, EngineError> {
	let index_manager = IndexManager::new(host.index_cache_path());
	let index = index_manager.refresh(providers).await?;

	let keep_count = config.retention.count as usize;
	let kept: Vec<String> = index.entries.iter().take(keep_count).map(|e| e.filename.clone()).collect();
	let to_delete = &index.entries[keep_count.min(index.entries.len())..];

	let mut deleted = Vec::new();
	let mut errors = Vec::new();

	for entry in to_delete {
		let sidecar_name = sidecar_path(&entry.filename);
		let mut entry_deleted = false;

		for provider_name in &entry.providers {
			let Some(provider) = providers.iter().find(|p| p.name() == *provider_name) else {
				continue;
			};

			match provider.delete(&entry.filename).await {
				Ok(()) => entry_deleted = true,
				Err(e) => {
					warn!(provider = provider_name.as_str(), archive = entry.filename.as_str(), error = %e, "failed to delete archive");
					errors.push(format!("{}@{}: {e}", entry.filename, provider_name));
				}
			}

			if let Err(e) = provider.delete(&sidecar_name).await {
				warn!(provider = provider_name.as_str(), sidecar = sidecar_name.as_str(), error = %e, "failed to delete sidecar");
				errors.push(format!("{sidecar_name}@{provider_name}: {e}"));
			}
		}

		if entry_deleted {
			deleted.push(entry.filename.clone());
		}
	}

	let refreshed = index_manager.refresh(providers).await;
	if let Err(e) = refreshed {
		warn!(error = %e, "failed to refresh index after pruning");
	}
	index_manager.invalidate()?;

	Ok(RetentionResult { deleted, kept, errors })
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::index::BackupEntry;
	use chrono::Utc;

	fn entry(filename: &str) -> BackupEntry {
		BackupEntry {
			timestamp: Utc::now(),
			filename: filename.to_string(),
			providers: vec!["local".to_string()],
			encrypted: false,
			size_bytes: 10,
			file_count: 1,
		}
	}

	#[test]
	fn split_point_never_underflows_when_fewer_entries_than_retention() {
		let entries = vec![entry("a"), entry("b")];
		let keep_count = 5usize;
		let split = keep_count.min(entries.len());
		assert_eq!(&entries[split..], &[] as &[BackupEntry]);
	}
}
