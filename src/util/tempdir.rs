//! Scoped temp-dir creation with owner-only permissions.
//!
//! Staging directories (archive creation, restore extraction) must not be
//! readable by other local users, since they transiently hold decrypted
//! personal data. Removal is guaranteed on all exit paths via `Drop`.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::EngineError;

pub struct ScopedTempDir {
	inner: TempDir,
}

impl ScopedTempDir {
	/// Creates a new owner-only-mode temp directory, optionally rooted at
	/// `under` (the configured `tempDir` override) instead of the system
	/// default.
	pub fn new(under: Option<&Path>) -> Result<Self, EngineError> {
		let builder_result = match under {
			Some(dir) => tempfile::Builder::new()
				.prefix("openclaw-backup-")
				.tempdir_in(dir),
			None => tempfile::Builder::new()
				.prefix("openclaw-backup-")
				.tempdir(),
		};

		let inner = builder_result.map_err(|e| EngineError::io(under.unwrap_or(Path::new(".")), e))?;

		set_owner_only(inner.path())?;

		Ok(Self { inner })
	}

	pub fn path(&self) -> &Path {
		self.inner.path()
	}

	pub fn to_path_buf(&self) -> PathBuf {
		self.inner.path().to_path_buf()
	}
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<(), EngineError> {
	use std::fs::Permissions;
	use std::os::unix::fs::PermissionsExt;

	std::fs::set_permissions(path, Permissions::from_mode(0o700))
		.map_err(|e| EngineError::io(path, e))
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<(), EngineError> {
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creates_owner_only_dir() {
		let dir = ScopedTempDir::new(None).unwrap();
		assert!(dir.path().is_dir());

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			let mode = std::fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777;
			assert_eq!(mode, 0o700);
		}
	}

	#[test]
	fn removed_on_drop() {
		let path = {
			let dir = ScopedTempDir::new(None).unwrap();
			dir.to_path_buf()
		};
		assert!(!path.exists());
	}
}
