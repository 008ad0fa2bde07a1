//! Local filesystem provider: copy/list/unlink scoped to a root directory.

use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::error::EngineError;
use crate::util::safe_join;

use super::{is_listable, sort_newest_first, CheckResult};

#[derive(Debug, Clone)]
pub struct LocalProvider {
	name: String,
	root: PathBuf,
}

impl LocalProvider {
	pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
		Self {
			name: name.into(),
			root: root.into(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	#[instrument(skip(self))]
	pub async fn push(&self, local_path: &Path, remote_name: &str) -> Result<(), EngineError> {
		let dest = safe_join(&self.root, remote_name)?;
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| EngineError::io(parent, e))?;
		}
		tokio::fs::copy(local_path, &dest)
			.await
			.map_err(|e| EngineError::io(&dest, e))?;
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn pull(&self, remote_name: &str, local_path: &Path) -> Result<(), EngineError> {
		let src = safe_join(&self.root, remote_name)?;
		if let Some(parent) = local_path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| EngineError::io(parent, e))?;
		}
		tokio::fs::copy(&src, local_path)
			.await
			.map_err(|e| EngineError::io(&src, e))?;
		Ok(())
	}

	pub async fn list(&self) -> Result<Vec<String>, EngineError> {
		self.list_all().await
	}

	/// Walks the root (not recursively beyond one hostname-subdir level)
	/// collecting archive/sidecar names, including legacy root-level
	/// entries without a hostname prefix.
	#[instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<String>, EngineError> {
		let root = self.root.clone();
		let names = tokio::task::spawn_blocking(move || collect_names(&root))
			.await
			.map_err(|e| EngineError::other(format!("list task panicked: {e}")))??;
		let mut names = names;
		sort_newest_first(&mut names);
		Ok(names)
	}

	#[instrument(skip(self))]
	pub async fn delete(&self, remote_name: &str) -> Result<(), EngineError> {
		let path = safe_join(&self.root, remote_name)?;
		match tokio::fs::remove_file(&path).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::io(&path, e)),
		}
	}

	pub async fn check(&self) -> CheckResult {
		if !self.root.exists() {
			if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
				return CheckResult::unavailable(format!("cannot create {:?}: {e}", self.root));
			}
		}
		match tokio::fs::metadata(&self.root).await {
			Ok(meta) if meta.is_dir() => CheckResult::ok(),
			Ok(_) => CheckResult::unavailable(format!("{:?} is not a directory", self.root)),
			Err(e) => CheckResult::unavailable(e.to_string()),
		}
	}
}

fn collect_names(root: &Path) -> Result<Vec<String>, EngineError> {
	let mut names = Vec::new();
	collect_level(root, "", &mut names)?;
	Ok(names)
}

fn collect_level(dir: &Path, prefix: &str, names: &mut Vec<String>) -> Result<(), EngineError> {
	let entries = match std::fs::read_dir(dir) {
		Ok(e) => e,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
		Err(e) => return Err(EngineError::io(dir, e)),
	};

	for entry in entries {
		let entry = entry.map_err(|e| EngineError::io(dir, e))?;
		let path = entry.path();
		let file_name = entry.file_name().to_string_lossy().into_owned();

		if path.is_dir() {
			let sub_prefix = if prefix.is_empty() {
				file_name.clone()
			} else {
				format!("{prefix}/{file_name}")
			};
			collect_level(&path, &sub_prefix, names)?;
		} else if is_listable(&file_name) {
			let qualified = if prefix.is_empty() {
				file_name
			} else {
				format!("{prefix}/{file_name}")
			};
			names.push(qualified);
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn push_and_pull_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let src_dir = tempfile::tempdir().unwrap();
		let src = src_dir.path().join("a.tar.gz");
		tokio::fs::write(&src, b"content").await.unwrap();

		let provider = LocalProvider::new("local", dir.path());
		provider.push(&src, "host/host-1.tar.gz").await.unwrap();

		let dest = src_dir.path().join("pulled.tar.gz");
		provider.pull("host/host-1.tar.gz", &dest).await.unwrap();
		assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"content");
	}

	#[tokio::test]
	async fn list_all_includes_legacy_and_hostname_entries() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::create_dir(dir.path().join("host")).unwrap();
		std::fs::write(dir.path().join("host/host-2.tar.gz"), b"x").unwrap();
		std::fs::write(dir.path().join("legacy.tar.gz"), b"x").unwrap();
		std::fs::write(dir.path().join("ignored.txt"), b"x").unwrap();

		let provider = LocalProvider::new("local", dir.path());
		let names = provider.list_all().await.unwrap();
		assert!(names.contains(&"host/host-2.tar.gz".to_string()));
		assert!(names.contains(&"legacy.tar.gz".to_string()));
		assert!(!names.iter().any(|n| n.ends_with(".txt")));
	}

	#[tokio::test]
	async fn delete_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let provider = LocalProvider::new("local", dir.path());
		provider.delete("missing.tar.gz").await.unwrap();
	}

	#[tokio::test]
	async fn push_rejects_traversal() {
		let dir = tempfile::tempdir().unwrap();
		let src_dir = tempfile::tempdir().unwrap();
		let src = src_dir.path().join("a.tar.gz");
		tokio::fs::write(&src, b"x").await.unwrap();

		let provider = LocalProvider::new("local", dir.path());
		let err = provider.push(&src, "../escape.tar.gz").await;
		assert!(err.is_err());
	}
}
