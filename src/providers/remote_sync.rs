//! Remote-sync provider: wraps an external sync tool invoked via
//! `copyto`, `lsf`, `deletefile`, `lsd`.

use std::path::Path;
use std::time::Duration;

use tracing::instrument;

use crate::error::EngineError;

use super::{is_listable, sort_newest_first, CheckResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `rclone`'s CLI happens to expose exactly the `copyto`/`lsf`/`lsd`/
/// `deletefile`/`version` surface this provider needs from a remote-sync
/// tool, so it's the concrete binary this provider shells out to.
pub const REMOTE_SYNC_BIN: &str = "rclone";

#[derive(Debug, Clone)]
pub struct RemoteSyncProvider {
	name: String,
	binary: String,
	remote_base: String,
}

impl RemoteSyncProvider {
	pub fn new(name: impl Into<String>, binary: impl Into<String>, remote_base: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			binary: binary.into(),
			remote_base: remote_base.into(),
		}
	}

	pub fn with_default_binary(name: impl Into<String>, remote_base: impl Into<String>) -> Self {
		Self::new(name, REMOTE_SYNC_BIN, remote_base)
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn remote_path(&self, remote_name: &str) -> String {
		format!("{}/{}", self.remote_base.trim_end_matches('/'), remote_name)
	}

	#[instrument(skip(self))]
	pub async fn push(&self, local_path: &Path, remote_name: &str) -> Result<(), EngineError> {
		let dst = self.remote_path(remote_name);
		self.run(&["copyto", &path_str(local_path), &dst]).await?;
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn pull(&self, remote_name: &str, local_path: &Path) -> Result<(), EngineError> {
		let src = self.remote_path(remote_name);
		if let Some(parent) = local_path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| EngineError::io(parent, e))?;
		}
		self.run(&["copyto", &src, &path_str(local_path)]).await?;
		Ok(())
	}

	pub async fn list(&self) -> Result<Vec<String>, EngineError> {
		self.list_all().await
	}

	#[instrument(skip(self))]
	pub async fn list_all(&self) -> Result<Vec<String>, EngineError> {
		let output = self.run(&["lsf", &self.remote_base]).await?;
		let mut names: Vec<String> = output
			.lines()
			.map(str::trim)
			.filter(|l| !l.is_empty() && is_listable(l))
			.map(str::to_string)
			.collect();
		sort_newest_first(&mut names);
		Ok(names)
	}

	#[instrument(skip(self))]
	pub async fn delete(&self, remote_name: &str) -> Result<(), EngineError> {
		let target = self.remote_path(remote_name);
		self.run(&["deletefile", &target]).await?;
		Ok(())
	}

	pub async fn check(&self) -> CheckResult {
		match self.run(&["lsd", &self.remote_base]).await {
			Ok(_) => CheckResult::ok(),
			Err(e) => CheckResult::unavailable(e.to_string()),
		}
	}

	pub async fn is_available(&self) -> bool {
		self.run(&["version"]).await.is_ok()
	}

	async fn run(&self, args: &[&str]) -> Result<String, EngineError> {
		let binary = self.binary.clone();
		let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();

		let task = tokio::task::spawn_blocking(move || {
			duct::cmd(&binary, args)
				.stdout_capture()
				.stderr_capture()
				.unchecked()
				.run()
		});

		let output = tokio::time::timeout(DEFAULT_TIMEOUT, task)
			.await
			.map_err(|_| EngineError::other(format!("{} timed out", self.binary)))?
			.map_err(|e| EngineError::other(format!("{} task panicked: {e}", self.binary)))?
			.map_err(|e| EngineError::Subprocess {
				program: self.binary.clone(),
				code: None,
				stderr: e.to_string(),
			})?;

		if !output.status.success() {
			return Err(EngineError::Subprocess {
				program: self.binary.clone(),
				code: output.status.code(),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}

		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

fn path_str(path: &Path) -> String {
	path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn remote_path_joins_base_and_name() {
		let p = RemoteSyncProvider::new("r", "rclone", "remote:bucket");
		assert_eq!(p.remote_path("host/host-1.tar.gz"), "remote:bucket/host/host-1.tar.gz");
	}

	#[test]
	fn remote_path_trims_trailing_slash_on_base() {
		let p = RemoteSyncProvider::new("r", "rclone", "remote:bucket/");
		assert_eq!(p.remote_path("a.tar.gz"), "remote:bucket/a.tar.gz");
	}
}
