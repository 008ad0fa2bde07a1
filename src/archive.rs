//! Archive builder: staging directory of symlinks → tar → gzip → optional
//! age pipe → output path, with traversal- and symlink-escape guards on
//! extract.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{instrument, warn};

use crate::collector::CollectedFile;
use crate::error::EngineError;
use crate::util::path::is_within;
use crate::util::{safe_join, ScopedTempDir};

const TAR_BIN: &str = "tar";
const AGE_BIN: &str = "age";

pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(2 * 60);

pub fn is_tar_available() -> bool {
	duct::cmd!(TAR_BIN, "--version")
		.stdout_capture()
		.stderr_capture()
		.unchecked()
		.run()
		.map(|o| o.status.success())
		.unwrap_or(false)
}

/// Creates an archive from `files`, writing `manifest_json` into the
/// archive root, optionally piping through the age encryptor when
/// `key_path` is given. The unencrypted stream never touches the
/// filesystem in the encrypted case: tar's stdout is piped directly into
/// age's stdin.
#[instrument(skip(files, manifest_json))]
pub async fn create_archive(
	files: &[CollectedFile],
	manifest_json: &str,
	output_path: &Path,
	key_path: Option<&Path>,
	staging_under: Option<&Path>,
	timeout: Duration,
) -> Result<(), EngineError> {
	let staging = ScopedTempDir::new(staging_under)?;

	stage_files(files, staging.path())?;
	std::fs::write(staging.path().join("manifest.json"), manifest_json)
		.map_err(|e| EngineError::io(staging.path().join("manifest.json"), e))?;

	let public_key = match key_path {
		Some(path) => Some(read_public_key(path)?),
		None => None,
	};

	let result = run_create(staging.path(), output_path, public_key.as_deref(), timeout).await;

	if result.is_err() {
		let _ = std::fs::remove_file(output_path);
	}

	// staging is removed by ScopedTempDir's Drop regardless of outcome.
	result
}

fn stage_files(files: &[CollectedFile], staging_root: &Path) -> Result<(), EngineError> {
	for file in files {
		let link_path = safe_join(staging_root, &file.relative_path)?;
		if let Some(parent) = link_path.parent() {
			std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
		}

		// If the source is itself a symlink, follow to its realpath before
		// linking: closes the TOCTOU window between collection and archival.
		let target = file
			.absolute_path
			.canonicalize()
			.unwrap_or_else(|_| file.absolute_path.clone());

		symlink(&target, &link_path).map_err(|e| EngineError::io(&link_path, e))?;
	}
	Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
	std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
	std::os::windows::fs::symlink_file(target, link)
}

fn read_public_key(key_path: &Path) -> Result<String, EngineError> {
	crate::crypto::get_public_key(key_path)
}

async fn run_create(
	staging: &Path,
	output_path: &Path,
	public_key: Option<&str>,
	timeout: Duration,
) -> Result<(), EngineError> {
	let staging = staging.to_path_buf();
	let output_path = output_path.to_path_buf();
	let public_key = public_key.map(str::to_string);

	let task = tokio::task::spawn_blocking(move || {
		let tar_expr = duct::cmd!(
			TAR_BIN,
			"czf",
			if public_key.is_some() { "-" } else { output_path.to_str().unwrap_or("out.tar.gz") },
			"--dereference",
			"-C",
			&staging,
			"."
		);

		let expr = if let Some(pubkey) = &public_key {
			let age_expr = duct::cmd!(AGE_BIN, "-e", "-r", pubkey, "-o", &output_path, "-");
			tar_expr.pipe(age_expr)
		} else {
			tar_expr
		};

		expr.stderr_capture().unchecked().run()
	});

	let output = tokio::time::timeout(timeout, task)
		.await
		.map_err(|_| EngineError::other(format!("archive creation timed out after {timeout:?}")))?
		.map_err(|e| EngineError::other(format!("archive creation task panicked: {e}")))?
		.map_err(|e| EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

	if !output.status.success() {
		return Err(EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: output.status.code(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	Ok(())
}

/// Extracts `archive_path` (a plain, already-decrypted `.tar.gz`) into
/// `output_dir`. Every entry name is validated with the traversal-safe
/// joiner before extraction runs; after extraction, every symlink's
/// realpath is checked to still live within `output_dir`.
#[instrument]
pub async fn extract_archive(
	archive_path: &Path,
	output_dir: &Path,
	timeout: Duration,
) -> Result<(), EngineError> {
	std::fs::create_dir_all(output_dir).map_err(|e| EngineError::io(output_dir, e))?;

	let names = list_entries(archive_path, timeout).await?;
	for name in &names {
		safe_join(output_dir, name)?;
	}

	run_extract(archive_path, output_dir, timeout).await?;

	check_symlink_escapes(output_dir)?;

	Ok(())
}

async fn list_entries(archive_path: &Path, timeout: Duration) -> Result<Vec<String>, EngineError> {
	let archive_path = archive_path.to_path_buf();
	let task = tokio::task::spawn_blocking(move || {
		duct::cmd!(TAR_BIN, "tzf", &archive_path)
			.stdout_capture()
			.stderr_capture()
			.unchecked()
			.run()
	});

	let output = tokio::time::timeout(timeout, task)
		.await
		.map_err(|_| EngineError::other(format!("archive listing timed out after {timeout:?}")))?
		.map_err(|e| EngineError::other(format!("archive listing task panicked: {e}")))?
		.map_err(|e| EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

	if !output.status.success() {
		return Err(EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: output.status.code(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	Ok(String::from_utf8_lossy(&output.stdout)
		.lines()
		.map(|l| l.trim_end_matches('/').to_string())
		.filter(|l| !l.is_empty() && l != ".")
		.collect())
}

async fn run_extract(archive_path: &Path, output_dir: &Path, timeout: Duration) -> Result<(), EngineError> {
	let archive_path = archive_path.to_path_buf();
	let output_dir = output_dir.to_path_buf();

	let task = tokio::task::spawn_blocking(move || {
		duct::cmd!(TAR_BIN, "xzf", &archive_path, "-C", &output_dir)
			.stderr_capture()
			.unchecked()
			.run()
	});

	let output = tokio::time::timeout(timeout, task)
		.await
		.map_err(|_| EngineError::other(format!("archive extraction timed out after {timeout:?}")))?
		.map_err(|e| EngineError::other(format!("archive extraction task panicked: {e}")))?
		.map_err(|e| EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

	if !output.status.success() {
		return Err(EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: output.status.code(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	Ok(())
}

fn check_symlink_escapes(output_dir: &Path) -> Result<(), EngineError> {
	for entry in walkdir_symlinks(output_dir)? {
		match is_within(output_dir, &entry) {
			Ok(true) => {}
			Ok(false) => {
				warn!(?entry, "symlink escapes extraction directory");
				return Err(EngineError::PathTraversal(format!(
					"symlink {entry:?} escapes extraction directory"
				)));
			}
			Err(e) => return Err(EngineError::io(&entry, e)),
		}
	}
	Ok(())
}

fn walkdir_symlinks(root: &Path) -> Result<Vec<PathBuf>, EngineError> {
	let mut out = Vec::new();
	let mut stack = vec![root.to_path_buf()];
	while let Some(dir) = stack.pop() {
		let entries = std::fs::read_dir(&dir).map_err(|e| EngineError::io(&dir, e))?;
		for entry in entries {
			let entry = entry.map_err(|e| EngineError::io(&dir, e))?;
			let path = entry.path();
			let meta = std::fs::symlink_metadata(&path).map_err(|e| EngineError::io(&path, e))?;
			if meta.file_type().is_symlink() {
				out.push(path);
			} else if meta.is_dir() {
				stack.push(path);
			}
		}
	}
	Ok(out)
}

/// Reads `manifest.json` out of an archive without extracting the rest.
#[instrument]
pub async fn read_manifest_from_archive(archive_path: &Path, timeout: Duration) -> Result<String, EngineError> {
	let archive_path = archive_path.to_path_buf();
	let task = tokio::task::spawn_blocking(move || {
		duct::cmd!(TAR_BIN, "xOzf", &archive_path, "manifest.json")
			.stdout_capture()
			.stderr_capture()
			.unchecked()
			.run()
	});

	let output = tokio::time::timeout(timeout, task)
		.await
		.map_err(|_| EngineError::other(format!("manifest read timed out after {timeout:?}")))?
		.map_err(|e| EngineError::other(format!("manifest read task panicked: {e}")))?
		.map_err(|e| EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

	if !output.status.success() {
		return Err(EngineError::Subprocess {
			program: TAR_BIN.to_string(),
			code: output.status.code(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	String::from_utf8(output.stdout).map_err(|e| EngineError::other(format!("manifest.json not utf8: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	#[test]
	fn stage_files_rejects_traversal() {
		let dir = tempfile::tempdir().unwrap();
		let real = dir.path().join("real.txt");
		fs::write(&real, b"hi").unwrap();

		let files = vec![CollectedFile {
			absolute_path: real,
			relative_path: "../escape.txt".to_string(),
			size_bytes: 2,
			modified: chrono::Utc::now(),
		}];

		let staging = dir.path().join("staging");
		fs::create_dir(&staging).unwrap();
		assert!(stage_files(&files, &staging).is_err());
	}

	#[test]
	fn stage_files_creates_symlinks_mirroring_structure() {
		let dir = tempfile::tempdir().unwrap();
		let real = dir.path().join("sub/real.txt");
		fs::create_dir_all(real.parent().unwrap()).unwrap();
		fs::write(&real, b"hi").unwrap();

		let files = vec![CollectedFile {
			absolute_path: real,
			relative_path: "nested/real.txt".to_string(),
			size_bytes: 2,
			modified: chrono::Utc::now(),
		}];

		let staging = dir.path().join("staging");
		fs::create_dir(&staging).unwrap();
		stage_files(&files, &staging).unwrap();

		let link = staging.join("nested/real.txt");
		assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
	}
}
