//! Exclusive backup lock: PID+timestamp lockfile with liveness probe and
//! age-based stale recovery.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::EngineError;

/// A lock is stale only if BOTH the writer is confirmed dead AND it was
/// started more than this long ago.
const STALE_AGE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockData {
	pub pid: i32,
	pub started_at: DateTime<Utc>,
}

/// A held lock. `release()` is idempotent; dropping without releasing
/// still leaves the lockfile on disk — callers must call `release`
/// explicitly on every exit path.
pub struct LockHandle {
	path: PathBuf,
}

impl LockHandle {
	#[instrument(skip(self))]
	pub fn release(&self) -> Result<(), EngineError> {
		match std::fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::LockIo {
				path: self.path.clone(),
				source: e,
			}),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

/// Acquires the lock at `path`, recovering a stale lock if found.
#[instrument]
pub fn acquire(path: &Path) -> Result<LockHandle, EngineError> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(|e| EngineError::LockIo {
			path: parent.to_path_buf(),
			source: e,
		})?;
	}

	match try_create(path) {
		Ok(()) => return Ok(LockHandle { path: path.to_path_buf() }),
		Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
		Err(e) => {
			return Err(EngineError::LockIo {
				path: path.to_path_buf(),
				source: e,
			})
		}
	}

	let existing = read_lock(path)?;
	if is_stale(&existing) {
		warn!(?path, pid = existing.pid, "removing stale lock");
		match std::fs::remove_file(path) {
			Ok(()) => {}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => {
				return Err(EngineError::LockIo {
					path: path.to_path_buf(),
					source: e,
				})
			}
		}

		match try_create(path) {
			Ok(()) => Ok(LockHandle { path: path.to_path_buf() }),
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(EngineError::LockHeld(path.to_path_buf())),
			Err(e) => Err(EngineError::LockIo {
				path: path.to_path_buf(),
				source: e,
			}),
		}
	} else {
		Err(EngineError::LockHeld(path.to_path_buf()))
	}
}

fn try_create(path: &Path) -> std::io::Result<()> {
	let mut file = OpenOptions::new()
		.write(true)
		.create_new(true)
		.mode(0o600)
		.open(path)?;

	let data = LockData {
		pid: std::process::id() as i32,
		started_at: Utc::now(),
	};
	let json = serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string());
	file.write_all(json.as_bytes())?;
	Ok(())
}

fn read_lock(path: &Path) -> Result<LockData, EngineError> {
	let contents = std::fs::read_to_string(path).map_err(|e| EngineError::LockIo {
		path: path.to_path_buf(),
		source: e,
	})?;
	serde_json::from_str(&contents).map_err(|e| {
		EngineError::LockIo {
			path: path.to_path_buf(),
			source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
		}
	})
}

fn is_stale(data: &LockData) -> bool {
	let dead = !process_is_alive(data.pid);
	let old_enough = Utc::now().signed_duration_since(data.started_at)
		> chrono::Duration::from_std(STALE_AGE).unwrap_or(chrono::Duration::zero());
	dead && old_enough
}

#[cfg(unix)]
fn process_is_alive(pid: i32) -> bool {
	// Signal 0 performs no actual signal delivery; it only checks whether
	// the process exists and is signalable by us.
	kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: i32) -> bool {
	true
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_acquire_succeeds() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".backup.lock");
		let handle = acquire(&path).unwrap();
		assert!(path.exists());
		handle.release().unwrap();
		assert!(!path.exists());
	}

	#[test]
	fn second_acquire_fails_while_held() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".backup.lock");
		let _handle = acquire(&path).unwrap();
		let err = acquire(&path).unwrap_err();
		assert!(matches!(err, EngineError::LockHeld(_)));
	}

	#[test]
	fn release_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".backup.lock");
		let handle = acquire(&path).unwrap();
		handle.release().unwrap();
		handle.release().unwrap();
	}

	#[test]
	fn stale_lock_with_dead_pid_and_old_timestamp_is_recovered() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".backup.lock");

		// A PID essentially guaranteed not to be alive, paired with an
		// old enough timestamp.
		let stale = LockData {
			pid: 1_999_999_999,
			started_at: Utc::now() - chrono::Duration::hours(2),
		};
		std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

		let handle = acquire(&path).unwrap();
		handle.release().unwrap();
	}

	#[test]
	fn recent_lock_with_dead_pid_is_not_stale() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".backup.lock");

		let recent = LockData {
			pid: 1_999_999_999,
			started_at: Utc::now(),
		};
		std::fs::write(&path, serde_json::to_string(&recent).unwrap()).unwrap();

		let err = acquire(&path).unwrap_err();
		assert!(matches!(err, EngineError::LockHeld(_)));
	}
}
