//! Safe path joining with traversal guards.
//!
//! Used anywhere an externally-sourced relative path (an archive entry name,
//! a provider remote name, a manifest file path) is joined onto a trusted
//! base directory. The join must reject escapes *before* touching the
//! filesystem, since the target may not exist yet (e.g. a provider remote
//! name being validated prior to a push).

use std::path::{Component, Path, PathBuf};

use crate::error::EngineError;

/// Joins `base` and `rel`, rejecting any `rel` that is absolute or that
/// would resolve outside of `base` via `..` components.
///
/// This is purely lexical: it does not require `base` or the joined path to
/// exist, and it does not follow symlinks. Callers that need to guard
/// against symlink escapes (archive extraction, restore) must additionally
/// check the resolved realpath after the fact; see `archive::extract_archive`.
pub fn safe_join(base: &Path, rel: &str) -> Result<PathBuf, EngineError> {
	let rel_path = Path::new(rel);

	if rel_path.is_absolute() {
		return Err(EngineError::PathTraversal(rel.to_string()));
	}

	let mut depth: i64 = 0;
	let mut normalized = PathBuf::new();
	for component in rel_path.components() {
		match component {
			Component::Normal(part) => {
				depth += 1;
				normalized.push(part);
			}
			Component::CurDir => {}
			Component::ParentDir => {
				depth -= 1;
				if depth < 0 {
					return Err(EngineError::PathTraversal(rel.to_string()));
				}
				normalized.pop();
			}
			Component::RootDir | Component::Prefix(_) => {
				return Err(EngineError::PathTraversal(rel.to_string()));
			}
		}
	}

	Ok(base.join(normalized))
}

/// Verifies that `path`'s canonical (symlink-resolved) form lives within
/// `root`'s canonical form, including the case where `path == root`.
///
/// Used after archive extraction to reject entries whose name was safe but
/// whose symlink *target* escapes the extraction directory.
pub fn is_within(root: &Path, path: &Path) -> std::io::Result<bool> {
	let root = root.canonicalize()?;
	let resolved = path.canonicalize()?;

	if resolved == root {
		return Ok(true);
	}

	let mut root_with_sep = root.into_os_string();
	root_with_sep.push(std::path::MAIN_SEPARATOR.to_string());
	Ok(resolved.as_os_str().to_string_lossy().starts_with(
		root_with_sep
			.to_string_lossy()
			.as_ref(),
	))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_absolute() {
		assert!(safe_join(Path::new("/base"), "/etc/passwd").is_err());
	}

	#[test]
	fn rejects_parent_escape() {
		assert!(safe_join(Path::new("/base"), "../escape.txt").is_err());
		assert!(safe_join(Path::new("/base"), "a/../../escape.txt").is_err());
	}

	#[test]
	fn allows_internal_parent_that_stays_inside() {
		assert_eq!(
			safe_join(Path::new("/base"), "a/../b").unwrap(),
			Path::new("/base/b")
		);
	}

	#[test]
	fn joins_plain_relative() {
		assert_eq!(
			safe_join(Path::new("/base"), "a/b/c.txt").unwrap(),
			Path::new("/base/a/b/c.txt")
		);
	}
}
