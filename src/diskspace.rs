//! Disk-space preflight: statfs on the staging filesystem, fail fast with
//! a human-readable MB report.

use std::path::Path;

use tracing::instrument;

use crate::error::EngineError;

const MIB: u64 = 1024 * 1024;

/// `needed = (Σ file sizes) × 2 + 100 MiB` — the multiplier covers the
/// staging symlink tree plus the gzipped copy existing simultaneously.
pub fn needed_bytes(total_file_bytes: u64) -> u64 {
	total_file_bytes.saturating_mul(2).saturating_add(100 * MIB)
}

/// Checks that `path`'s filesystem has at least `needed_bytes` of
/// unprivileged-accessible free space. Uses the free-blocks-available
/// count (`f_bavail`, not `f_bfree`), which excludes root-reserved blocks.
#[instrument]
pub fn check(path: &Path, total_file_bytes: u64) -> Result<(), EngineError> {
	let needed = needed_bytes(total_file_bytes);
	let available = available_bytes(path)?;

	if available < needed {
		return Err(EngineError::DiskSpace {
			path: path.to_path_buf(),
			needed_mb: needed / MIB,
			available_mb: available / MIB,
		});
	}

	Ok(())
}

#[cfg(unix)]
fn available_bytes(path: &Path) -> Result<u64, EngineError> {
	let stat = nix::sys::statvfs::statvfs(path)
		.map_err(|e| EngineError::other(format!("statvfs {path:?}: {e}")))?;
	Ok(stat.blocks_available() as u64 * stat.fragment_size())
}

#[cfg(not(unix))]
fn available_bytes(_path: &Path) -> Result<u64, EngineError> {
	Ok(u64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn needed_bytes_applies_multiplier_and_floor() {
		assert_eq!(needed_bytes(0), 100 * MIB);
		assert_eq!(needed_bytes(10 * MIB), 20 * MIB + 100 * MIB);
	}

	#[test]
	fn passes_when_plenty_of_space() {
		let dir = tempfile::tempdir().unwrap();
		check(dir.path(), 1024).unwrap();
	}

	#[test]
	fn fails_when_requirement_absurdly_large() {
		let dir = tempfile::tempdir().unwrap();
		let err = check(dir.path(), u64::MAX / 4).unwrap_err();
		assert!(matches!(err, EngineError::DiskSpace { .. }));
	}
}
