//! Domain error taxonomy.
//!
//! Each variant is a distinct failure mode with its own treatment by the
//! orchestrators. Errors carry a one-line human context
//! plus their cause; wrapping is shallow, for diagnostics, not dispatch.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
	/// A required external program is absent, or a destination is
	/// unreachable. Detected before any I/O; fatal.
	#[error("prerequisite missing: {tool} ({hint})")]
	PrerequisiteMissing { tool: String, hint: String },

	/// Malformed config: bad JSON, wrong types, invalid cron, out-of-range
	/// retention. Fatal; names the offending field.
	#[error("invalid configuration: field `{field}` = {value:?}: {reason}")]
	ConfigInvalid {
		field: String,
		value: String,
		reason: String,
	},

	/// Another backup run holds the lock, and it is not stale.
	#[error("another backup is already running (lockfile: {0})")]
	LockHeld(PathBuf),

	#[error("failed to acquire lock at {path}: {source}")]
	LockIo {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// Not enough free space on the staging filesystem.
	#[error("insufficient disk space at {path}: need {needed_mb} MB, have {available_mb} MB")]
	DiskSpace {
		path: PathBuf,
		needed_mb: u64,
		available_mb: u64,
	},

	/// Wraps I/O errors that are not permission-skip cases.
	#[error("I/O error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	/// A spawned subprocess (age/tar/remote-sync tool) exited non-zero.
	#[error("{program} failed (exit {code:?}): {stderr}")]
	Subprocess {
		program: String,
		code: Option<i32>,
		stderr: String,
	},

	/// Manifest/archive checksum mismatch during restore. No files written.
	#[error("integrity check failed for {path}: expected {expected}, got {actual}")]
	Integrity {
		path: String,
		expected: String,
		actual: String,
	},

	/// Sidecar manifest and embedded manifest disagree on identity.
	#[error("tamper suspicion: {0}")]
	TamperSuspicion(String),

	/// A remote name would escape its provider's base directory.
	#[error("path traversal rejected: {0:?}")]
	PathTraversal(String),

	/// Generic "can't proceed" case with a message, used sparingly where no
	/// other variant fits (e.g. "no provider available").
	#[error("{0}")]
	Other(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
	pub fn other(msg: impl Into<String>) -> Self {
		Self::Other(msg.into())
	}

	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		Self::Io {
			path: path.into(),
			source,
		}
	}
}
