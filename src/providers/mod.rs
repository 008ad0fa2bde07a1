//! Storage provider abstraction: push / pull / list / listAll / delete /
//! check, with two concrete backends.
//!
//! Modeled as an enum rather than a trait object: there are exactly two
//! backends and neither the orchestrator nor tests need open dispatch,
//! so a `match` keeps every call site free of boxed futures.

use std::path::Path;

use crate::config::Config;
use crate::error::EngineError;

pub mod local;
pub mod remote_sync;

pub use local::LocalProvider;
pub use remote_sync::RemoteSyncProvider;

/// Result of a provider availability probe.
#[derive(Debug, Clone)]
pub struct CheckResult {
	pub available: bool,
	pub error: Option<String>,
}

impl CheckResult {
	pub fn ok() -> Self {
		Self {
			available: true,
			error: None,
		}
	}

	pub fn unavailable(error: impl Into<String>) -> Self {
		Self {
			available: false,
			error: Some(error.into()),
		}
	}
}

/// One destination endpoint: a local directory, a remote-sync remote, or
/// both (a destination may configure `path` and `remote` simultaneously;
/// the orchestrator then treats it as two providers under the same
/// destination name).
#[derive(Debug, Clone)]
pub enum Provider {
	Local(LocalProvider),
	RemoteSync(RemoteSyncProvider),
}

impl Provider {
	pub fn name(&self) -> &str {
		match self {
			Self::Local(p) => p.name(),
			Self::RemoteSync(p) => p.name(),
		}
	}

	pub async fn push(&self, local_path: &Path, remote_name: &str) -> Result<(), EngineError> {
		reject_unsafe_name(remote_name)?;
		match self {
			Self::Local(p) => p.push(local_path, remote_name).await,
			Self::RemoteSync(p) => p.push(local_path, remote_name).await,
		}
	}

	pub async fn pull(&self, remote_name: &str, local_path: &Path) -> Result<(), EngineError> {
		reject_unsafe_name(remote_name)?;
		match self {
			Self::Local(p) => p.pull(remote_name, local_path).await,
			Self::RemoteSync(p) => p.pull(remote_name, local_path).await,
		}
	}

	pub async fn list(&self) -> Result<Vec<String>, EngineError> {
		match self {
			Self::Local(p) => p.list().await,
			Self::RemoteSync(p) => p.list().await,
		}
	}

	/// Lists including hostname subdirs and legacy root-level names.
	pub async fn list_all(&self) -> Result<Vec<String>, EngineError> {
		match self {
			Self::Local(p) => p.list_all().await,
			Self::RemoteSync(p) => p.list_all().await,
		}
	}

	pub async fn delete(&self, remote_name: &str) -> Result<(), EngineError> {
		reject_unsafe_name(remote_name)?;
		match self {
			Self::Local(p) => p.delete(remote_name).await,
			Self::RemoteSync(p) => p.delete(remote_name).await,
		}
	}

	pub async fn check(&self) -> CheckResult {
		match self {
			Self::Local(p) => p.check().await,
			Self::RemoteSync(p) => p.check().await,
		}
	}
}

/// Shared guard: rejects any remote name that is absolute or contains a
/// `..` component, before any provider touches the filesystem or spawns a
/// subprocess.
pub fn reject_unsafe_name(remote_name: &str) -> Result<(), EngineError> {
	use std::path::Component;

	let path = Path::new(remote_name);
	if path.is_absolute() {
		return Err(EngineError::PathTraversal(remote_name.to_string()));
	}
	for component in path.components() {
		if matches!(component, Component::ParentDir) {
			return Err(EngineError::PathTraversal(remote_name.to_string()));
		}
	}
	Ok(())
}

/// True for names a provider's `list`/`list_all` should surface: archives
/// or sidecars.
pub fn is_listable(name: &str) -> bool {
	crate::util::sidecar::is_archive_filename(name) || crate::util::sidecar::is_manifest_filename(name)
}

/// Newest-first lexicographic sort, shared by both backends.
pub fn sort_newest_first(names: &mut [String]) {
	names.sort_unstable_by(|a, b| b.cmp(a));
}

/// Instantiates one `Provider` per configured destination. A destination
/// with both `path` and `remote` set produces two providers sharing its
/// name, the latter indicating a dual-local-and-remote destination.
pub fn build_all(config: &Config) -> Vec<Provider> {
	let mut providers = Vec::new();
	for (name, dest) in &config.destinations {
		if let Some(path) = &dest.path {
			providers.push(Provider::Local(LocalProvider::new(
				name.clone(),
				crate::config::expand_tilde(path),
			)));
		}
		if let Some(remote) = &dest.remote {
			providers.push(Provider::RemoteSync(RemoteSyncProvider::with_default_binary(
				name.clone(),
				remote.clone(),
			)));
		}
	}
	providers
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_absolute_names() {
		assert!(reject_unsafe_name("/etc/passwd").is_err());
	}

	#[test]
	fn rejects_parent_segments() {
		assert!(reject_unsafe_name("../escape").is_err());
		assert!(reject_unsafe_name("a/../../escape").is_err());
	}

	#[test]
	fn allows_plain_names() {
		assert!(reject_unsafe_name("host/host-2024.tar.gz").is_ok());
	}

	#[test]
	fn sorts_newest_first() {
		let mut names = vec!["a-2024-01-01.tar.gz".to_string(), "a-2024-06-01.tar.gz".to_string()];
		sort_newest_first(&mut names);
		assert_eq!(names[0], "a-2024-06-01.tar.gz");
	}
}
