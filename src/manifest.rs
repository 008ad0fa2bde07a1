//! Manifest builder: hashes collected files, builds the `BackupManifest`,
//! validates it against an extracted tree.

use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tokio::io::AsyncReadExt;
use tracing::instrument;

use crate::collector::CollectedFile;
use crate::error::EngineError;
use crate::util::{bounded_map, safe_join};

pub const SCHEMA_VERSION: u32 = 1;
const DEFAULT_HASH_CONCURRENCY: usize = 16;

fn sha256_regex() -> &'static Regex {
	static RE: OnceLock<Regex> = OnceLock::new();
	RE.get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").unwrap())
}

/// Durable record of one archived file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestFile {
	pub path: String,
	pub sha256: String,
	pub size_bytes: u64,
	pub modified: DateTime<Utc>,
}

/// Top-level archive descriptor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupManifest {
	pub schema_version: u32,
	pub plugin_version: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub openclaw_version: Option<String>,
	pub hostname: String,
	pub timestamp: DateTime<Utc>,
	pub encrypted: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub key_id: Option<String>,
	pub include_transcripts: bool,
	pub include_persistor: bool,
	pub files: Vec<ManifestFile>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub persistor_export: Option<serde_json::Value>,
}

pub struct BuildOptions {
	pub plugin_version: String,
	pub openclaw_version: Option<String>,
	pub hostname: String,
	pub encrypted: bool,
	pub key_id: Option<String>,
	pub include_transcripts: bool,
	pub include_persistor: bool,
	pub persistor_export: Option<serde_json::Value>,
	pub hash_concurrency: Option<usize>,
}

/// Result of validating an extracted archive against its manifest.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
	pub valid: bool,
	pub errors: Vec<String>,
}

/// Hashes each `CollectedFile` (streaming, bounded concurrency) and builds
/// the manifest. `timestamp` is fixed by the caller at call time — it
/// becomes the canonical run id.
#[instrument(skip(files, options))]
pub async fn build_manifest(
	files: &[CollectedFile],
	timestamp: DateTime<Utc>,
	options: BuildOptions,
) -> Result<BackupManifest, EngineError> {
	let concurrency = options.hash_concurrency.unwrap_or(DEFAULT_HASH_CONCURRENCY);

	let items: Vec<CollectedFile> = files.to_vec();
	let hashed = bounded_map(items, concurrency, |file| async move {
		let sha256 = hash_file(&file.absolute_path).await;
		(file, sha256)
	})
	.await;

	let mut manifest_files = Vec::with_capacity(hashed.len());
	for (file, sha256) in hashed {
		let sha256 = sha256?;
		manifest_files.push(ManifestFile {
			path: file.relative_path,
			sha256,
			size_bytes: file.size_bytes,
			modified: file.modified,
		});
	}

	Ok(BackupManifest {
		schema_version: SCHEMA_VERSION,
		plugin_version: options.plugin_version,
		openclaw_version: options.openclaw_version,
		hostname: options.hostname,
		timestamp,
		encrypted: options.encrypted,
		key_id: options.key_id,
		include_transcripts: options.include_transcripts,
		include_persistor: options.include_persistor,
		files: manifest_files,
		persistor_export: options.persistor_export,
	})
}

/// Streaming SHA-256 of a file, never buffering the whole file in memory.
pub async fn hash_file(path: &Path) -> Result<String, EngineError> {
	let mut file = tokio::fs::File::open(path)
		.await
		.map_err(|e| EngineError::io(path, e))?;

	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; 64 * 1024];
	loop {
		let n = file
			.read(&mut buf)
			.await
			.map_err(|e| EngineError::io(path, e))?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}

	Ok(hex::encode(hasher.finalize()))
}

/// Validates an extracted directory against the manifest: re-hashes every
/// file and compares. Unsupported `schema_version` fails immediately
/// without touching the filesystem.
pub async fn validate_manifest(
	manifest: &BackupManifest,
	extract_dir: &Path,
) -> Result<ValidationResult, EngineError> {
	if manifest.schema_version != SCHEMA_VERSION {
		return Err(EngineError::Integrity {
			path: "manifest.json".into(),
			expected: format!("schema_version {SCHEMA_VERSION}"),
			actual: format!("schema_version {}", manifest.schema_version),
		});
	}

	let mut errors = Vec::new();
	for file in &manifest.files {
		let resolved = match safe_join(extract_dir, &file.path) {
			Ok(p) => p,
			Err(_) => {
				errors.push(format!("{}: path escapes extraction directory", file.path));
				continue;
			}
		};

		match hash_file(&resolved).await {
			Ok(actual) if actual == file.sha256 => {}
			Ok(actual) => errors.push(format!(
				"{}: checksum mismatch (expected {}, got {})",
				file.path, file.sha256, actual
			)),
			Err(e) => errors.push(format!("{}: {e}", file.path)),
		}
	}

	Ok(ValidationResult {
		valid: errors.is_empty(),
		errors,
	})
}

/// Shape validation: checks every required field's type and that every
/// `sha256` matches `[0-9a-f]{64}`.
/// Operates on the raw `serde_json::Value` so it can reject malformed
/// manifests before attempting strongly-typed deserialization.
pub fn is_valid_manifest_shape(value: &serde_json::Value) -> bool {
	let Some(obj) = value.as_object() else {
		return false;
	};

	let Some(schema_version) = obj.get("schema_version").and_then(|v| v.as_u64()) else {
		return false;
	};
	if schema_version != SCHEMA_VERSION as u64 {
		return false;
	}

	if obj.get("plugin_version").and_then(|v| v.as_str()).is_none() {
		return false;
	}
	if obj.get("hostname").and_then(|v| v.as_str()).is_none() {
		return false;
	}
	if obj.get("timestamp").and_then(|v| v.as_str()).is_none() {
		return false;
	}
	let Some(encrypted) = obj.get("encrypted").and_then(|v| v.as_bool()) else {
		return false;
	};
	if encrypted && obj.get("key_id").and_then(|v| v.as_str()).is_none() {
		return false;
	}

	let Some(files) = obj.get("files").and_then(|v| v.as_array()) else {
		return false;
	};

	let mut seen_paths = std::collections::HashSet::new();
	for file in files {
		let Some(file) = file.as_object() else {
			return false;
		};
		let Some(path) = file.get("path").and_then(|v| v.as_str()) else {
			return false;
		};
		if !seen_paths.insert(path.to_string()) {
			return false;
		}
		let Some(sha256) = file.get("sha256").and_then(|v| v.as_str()) else {
			return false;
		};
		if !sha256_regex().is_match(sha256) {
			return false;
		}
		if file.get("size_bytes").and_then(|v| v.as_u64()).is_none() {
			return false;
		}
		if file.get("modified").and_then(|v| v.as_str()).is_none() {
			return false;
		}
	}

	true
}

/// Stable 2-space-indented JSON serialization.
pub fn serialize(manifest: &BackupManifest) -> Result<String, EngineError> {
	let buf = Vec::new();
	let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
	let mut ser = serde_json::Serializer::with_formatter(buf, formatter);
	manifest
		.serialize(&mut ser)
		.map_err(|e| EngineError::other(format!("failed to serialize manifest: {e}")))?;
	String::from_utf8(ser.into_inner()).map_err(|e| EngineError::other(e.to_string()))
}

pub fn deserialize(json: &str) -> Result<BackupManifest, EngineError> {
	serde_json::from_str(json).map_err(|e| EngineError::other(format!("invalid manifest: {e}")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	fn sample_manifest() -> BackupManifest {
		BackupManifest {
			schema_version: SCHEMA_VERSION,
			plugin_version: "0.1.0".into(),
			openclaw_version: Some("1.2.3".into()),
			hostname: "myhost".into(),
			timestamp: "2024-01-01T00:00:00Z".parse().unwrap(),
			encrypted: false,
			key_id: None,
			include_transcripts: true,
			include_persistor: false,
			files: vec![ManifestFile {
				path: "a/b.txt".into(),
				sha256: "a".repeat(64),
				size_bytes: 5,
				modified: "2024-01-01T00:00:00Z".parse().unwrap(),
			}],
			persistor_export: None,
		}
	}

	#[test]
	fn round_trips_through_json() {
		let m = sample_manifest();
		let json = serialize(&m).unwrap();
		let back = deserialize(&json).unwrap();
		assert_eq!(m, back);
	}

	#[test]
	fn shape_validator_accepts_valid_manifest() {
		let m = sample_manifest();
		let json = serialize(&m).unwrap();
		let value: serde_json::Value = serde_json::from_str(&json).unwrap();
		assert!(is_valid_manifest_shape(&value));
	}

	#[test]
	fn shape_validator_rejects_bad_sha() {
		let mut value = serde_json::to_value(sample_manifest()).unwrap();
		value["files"][0]["sha256"] = serde_json::Value::String("not-hex".into());
		assert!(!is_valid_manifest_shape(&value));
	}

	#[test]
	fn shape_validator_rejects_duplicate_paths() {
		let mut m = sample_manifest();
		m.files.push(m.files[0].clone());
		let value = serde_json::to_value(&m).unwrap();
		assert!(!is_valid_manifest_shape(&value));
	}

	#[tokio::test]
	async fn validate_detects_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("b.txt"), b"hello").unwrap();

		let mut m = sample_manifest();
		m.files[0].path = "b.txt".into();
		m.files[0].sha256 = hash_file(&dir.path().join("b.txt")).await.unwrap();

		let ok = validate_manifest(&m, dir.path()).await.unwrap();
		assert!(ok.valid);

		fs::write(dir.path().join("b.txt"), b"tampered").unwrap();
		let bad = validate_manifest(&m, dir.path()).await.unwrap();
		assert!(!bad.valid);
		assert_eq!(bad.errors.len(), 1);
	}
}
