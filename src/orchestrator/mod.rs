//! Orchestrators: the state machines that compose the leaf modules into
//! the backup, restore, rotation, and retention workflows.

use serde::Serialize;

pub mod backup;
pub mod restore;
pub mod retention;
pub mod rotate;

pub use backup::{run_backup, BackupOptions, BackupResult};
pub use restore::{run_restore, RestoreOptions, RestoreResult};
pub use retention::{run_retention, RetentionResult};
pub use rotate::{run_rotate, RotateOptions, RotateResult};

/// Shared dry-run summary rendered identically by both backup and
/// restore.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DryRunSummary {
	pub file_count: usize,
	pub total_bytes: u64,
}
