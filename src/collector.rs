//! File collector: depth-first traversal of a configured root set, with
//! symlink-cycle protection and pattern-based exclusion.

use std::collections::HashSet;
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::glob::{is_excluded, parse_excludes, ExcludePattern};

/// An intent to archive, produced by the collector and never mutated
/// thereafter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectedFile {
	pub absolute_path: PathBuf,
	/// Key within the archive: `relative(dirname(root), absolute_path)`.
	pub relative_path: String,
	pub size_bytes: u64,
	pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectorConfig {
	pub include_roots: Vec<PathBuf>,
	pub extra_roots: Vec<PathBuf>,
	pub exclude_patterns: Vec<String>,
}

pub struct FileCollector {
	excludes: Vec<ExcludePattern>,
	visited_dirs: HashSet<PathBuf>,
	files: Vec<CollectedFile>,
}

impl FileCollector {
	pub fn new(config: &CollectorConfig) -> Self {
		Self {
			excludes: parse_excludes(&config.exclude_patterns),
			visited_dirs: HashSet::new(),
			files: Vec::new(),
		}
	}

	/// Runs the collector over every configured root, returning the
	/// deduplicated, order-preserving sequence of `CollectedFile`s.
	pub fn collect(config: &CollectorConfig) -> Result<Vec<CollectedFile>, EngineError> {
		let mut collector = Self::new(config);

		for root in config.include_roots.iter().chain(config.extra_roots.iter()) {
			collector.walk_root(root)?;
		}

		Ok(collector.files)
	}

	fn walk_root(&mut self, root: &Path) -> Result<(), EngineError> {
		// relative_path = relative(dirname(root), absolute_path).
		let base = root.parent().unwrap_or(Path::new("/")).to_path_buf();

		let meta = match fs::symlink_metadata(root) {
			Ok(m) => m,
			Err(e) if is_skippable(&e) => {
				warn!(?root, error = %e, "skipping unreadable root");
				return Ok(());
			}
			Err(e) => return Err(EngineError::io(root, e)),
		};

		if meta.file_type().is_symlink() {
			self.visit_symlink(root, &base)?;
		} else if meta.is_dir() {
			self.visit_dir(root, &base)?;
		} else if meta.is_file() {
			self.record_file(root, &base, &meta);
		}

		Ok(())
	}

	fn visit_dir(&mut self, dir: &Path, base: &Path) -> Result<(), EngineError> {
		let canonical = match dir.canonicalize() {
			Ok(c) => c,
			Err(e) if is_skippable(&e) => {
				warn!(?dir, error = %e, "skipping unreadable directory");
				return Ok(());
			}
			Err(e) => return Err(EngineError::io(dir, e)),
		};

		if !self.visited_dirs.insert(canonical) {
			debug!(?dir, "cycle detected, skipping");
			return Ok(());
		}

		let entries = match fs::read_dir(dir) {
			Ok(e) => e,
			Err(e) if is_skippable(&e) => {
				warn!(?dir, error = %e, "skipping unreadable directory");
				return Ok(());
			}
			Err(e) => return Err(EngineError::io(dir, e)),
		};

		for entry in entries {
			let entry = match entry {
				Ok(e) => e,
				Err(e) if is_skippable(&e) => {
					warn!(?dir, error = %e, "skipping unreadable entry");
					continue;
				}
				Err(e) => return Err(EngineError::io(dir, e)),
			};

			let path = entry.path();
			let name = entry.file_name().to_string_lossy().into_owned();
			let abs = path.to_string_lossy();

			if is_excluded(&self.excludes, &abs, &name) {
				continue;
			}

			let meta = match fs::symlink_metadata(&path) {
				Ok(m) => m,
				Err(e) if is_skippable(&e) => {
					warn!(?path, error = %e, "skipping unreadable entry");
					continue;
				}
				Err(e) => return Err(EngineError::io(&path, e)),
			};

			if meta.file_type().is_symlink() {
				self.visit_symlink(&path, base)?;
			} else if meta.is_dir() {
				self.visit_dir(&path, base)?;
			} else if meta.is_file() {
				self.record_file(&path, base, &meta);
			}
		}

		Ok(())
	}

	fn visit_symlink(&mut self, path: &Path, base: &Path) -> Result<(), EngineError> {
		// Follow the symlink's realpath before recording/recursing; if the
		// target is itself a symlink chain, `fs::metadata` already follows
		// it fully.
		let target_meta = match fs::metadata(path) {
			Ok(m) => m,
			Err(e) if is_skippable(&e) || e.kind() == std::io::ErrorKind::NotFound => {
				warn!(?path, error = %e, "symlink target missing, skipping");
				return Ok(());
			}
			Err(e) => return Err(EngineError::io(path, e)),
		};

		if target_meta.is_dir() {
			let real = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
			self.visit_dir(&real, base)
		} else if target_meta.is_file() {
			self.record_file(path, base, &target_meta);
			Ok(())
		} else {
			Ok(())
		}
	}

	fn record_file(&mut self, path: &Path, base: &Path, meta: &Metadata) {
		let Some(relative_path) = relative_to(base, path) else {
			warn!(?path, ?base, "could not compute relative path, skipping");
			return;
		};

		let modified = meta
			.modified()
			.ok()
			.map(DateTime::<Utc>::from)
			.unwrap_or_else(Utc::now);

		self.files.push(CollectedFile {
			absolute_path: path.to_path_buf(),
			relative_path,
			size_bytes: meta.len(),
			modified,
		});
	}
}

/// Computes `relative(base, path)` (`base` = `dirname(root)`) as the
/// archive-internal key for a collected file.
fn relative_to(base: &Path, path: &Path) -> Option<String> {
	path.strip_prefix(base)
		.ok()
		.map(|p| p.to_string_lossy().replace('\\', "/"))
}

/// True for EACCES/EPERM (both map to `PermissionDenied` in `std::io`),
/// which the collector skips over rather than aborting on.
fn is_skippable(e: &std::io::Error) -> bool {
	e.kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::os::unix::fs::symlink;

	#[test]
	fn collects_plain_files() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("a.txt"), b"hello").unwrap();
		fs::create_dir(dir.path().join("sub")).unwrap();
		fs::write(dir.path().join("sub/b.txt"), b"world").unwrap();

		let config = CollectorConfig {
			include_roots: vec![dir.path().to_path_buf()],
			extra_roots: vec![],
			exclude_patterns: vec![],
		};

		let files = FileCollector::collect(&config).unwrap();
		assert_eq!(files.len(), 2);
	}

	#[test]
	fn excludes_glob_pattern() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("keep.txt"), b"hi").unwrap();
		fs::write(dir.path().join("debug.log"), b"hi").unwrap();

		let config = CollectorConfig {
			include_roots: vec![dir.path().to_path_buf()],
			extra_roots: vec![],
			exclude_patterns: vec!["*.log".to_string()],
		};

		let files = FileCollector::collect(&config).unwrap();
		assert_eq!(files.len(), 1);
		assert!(files[0].relative_path.ends_with("keep.txt"));
	}

	#[test]
	fn detects_symlink_cycle() {
		let dir = tempfile::tempdir().unwrap();
		let sub = dir.path().join("sub");
		fs::create_dir(&sub).unwrap();
		symlink(dir.path(), sub.join("loop")).unwrap();

		let config = CollectorConfig {
			include_roots: vec![dir.path().to_path_buf()],
			extra_roots: vec![],
			exclude_patterns: vec![],
		};

		// Must terminate rather than recurse forever.
		let files = FileCollector::collect(&config).unwrap();
		assert_eq!(files.len(), 0);
	}

	#[test]
	fn follows_file_symlink() {
		let dir = tempfile::tempdir().unwrap();
		let target = dir.path().join("real.txt");
		fs::write(&target, b"hi").unwrap();
		symlink(&target, dir.path().join("link.txt")).unwrap();

		let config = CollectorConfig {
			include_roots: vec![dir.path().to_path_buf()],
			extra_roots: vec![],
			exclude_patterns: vec![],
		};

		let files = FileCollector::collect(&config).unwrap();
		assert_eq!(files.len(), 2);
	}
}
