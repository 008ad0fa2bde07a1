//! Key lifecycle primitives and the age-compatible encryptor subprocess
//! wrapper.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{instrument, warn};

use crate::error::EngineError;

const AGE_KEYGEN_BIN: &str = "age-keygen";
const AGE_BIN: &str = "age";

/// Runs a subprocess to completion, capturing stdout and stderr, and maps a
/// non-zero exit into `EngineError::Subprocess` with the captured stderr
/// always included.
fn run_captured(expr: duct::Expression, program: &str) -> Result<Vec<u8>, EngineError> {
	let output = expr
		.stdout_capture()
		.stderr_capture()
		.unchecked()
		.run()
		.map_err(|e| EngineError::Subprocess {
			program: program.to_string(),
			code: None,
			stderr: e.to_string(),
		})?;

	if !output.status.success() {
		return Err(EngineError::Subprocess {
			program: program.to_string(),
			code: output.status.code(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
		});
	}

	Ok(output.stdout)
}

pub fn is_available() -> bool {
	duct::cmd!(AGE_BIN, "--version")
		.stdout_capture()
		.stderr_capture()
		.unchecked()
		.run()
		.map(|o| o.status.success())
		.unwrap_or(false)
}

/// Generates a new keypair at `key_path`.
///
/// Fails if `key_path` already exists: the file is created with
/// `O_CREAT|O_EXCL` so there is no TOCTOU window between an existence
/// check and the write.
#[instrument]
pub fn generate_key(key_path: &Path) -> Result<String, EngineError> {
	if let Some(parent) = key_path.parent() {
		std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
	}

	let stdout = run_captured(duct::cmd!(AGE_KEYGEN_BIN), AGE_KEYGEN_BIN)?;
	let material = String::from_utf8(stdout)
		.map_err(|e| EngineError::other(format!("keygen produced non-utf8 output: {e}")))?;

	let public_key = parse_public_key(&material)
		.ok_or_else(|| EngineError::other("keygen output did not contain a public key"))?;

	write_exclusive(key_path, material.as_bytes())?;

	if let Some(dir) = key_path.parent() {
		let pubkey_path = dir.join("backup-pubkey.txt");
		if let Err(e) = write_owner_only(&pubkey_path, public_key.as_bytes()) {
			warn!(?pubkey_path, error = %e, "failed to write public key sidecar");
		}

		let fingerprint = fingerprint_of(&public_key);
		let fp_path = dir.join("backup-key-fingerprint.txt");
		if let Err(e) = write_owner_only(&fp_path, fingerprint.as_bytes()) {
			warn!(?fp_path, error = %e, "failed to write fingerprint sidecar");
		}
	}

	Ok(public_key)
}

/// Returns the 16-hex-char fingerprint of the key at `key_path`.
pub fn get_key_id(key_path: &Path) -> Result<String, EngineError> {
	let public_key = get_public_key(key_path)?;
	Ok(fingerprint_of(&public_key))
}

/// Reads the key file at `key_path` and extracts its public key.
pub fn get_public_key(key_path: &Path) -> Result<String, EngineError> {
	let material = read_to_string(key_path)?;
	parse_public_key(&material)
		.ok_or_else(|| EngineError::other(format!("{key_path:?} does not contain a public key")))
}

fn fingerprint_of(public_key: &str) -> String {
	let digest = Sha256::digest(public_key.trim().as_bytes());
	hex::encode(digest)[..16].to_string()
}

/// Parses the public key line from age-keygen output or a key file: the
/// first line starting with `Public key:` or `# public key:`.
fn parse_public_key(material: &str) -> Option<String> {
	for line in material.lines() {
		let line = line.trim();
		let lower = line.to_ascii_lowercase();
		if let Some(rest) = lower.strip_prefix("# public key:") {
			let offset = line.len() - rest.len();
			return Some(line[offset..].trim().to_string());
		}
		if let Some(rest) = lower.strip_prefix("public key:") {
			let offset = line.len() - rest.len();
			return Some(line[offset..].trim().to_string());
		}
	}
	None
}

/// Encrypts `input` to `output` for the recipient whose public key is
/// stored at `key_path`. Uses recipient mode (`-r`), not identity mode:
/// encryption only ever needs the public half.
#[instrument]
pub fn encrypt_file(input: &Path, output: &Path, key_path: &Path) -> Result<(), EngineError> {
	let public_key = get_public_key(key_path)?;

	run_captured(
		duct::cmd!(
			AGE_BIN,
			"-e",
			"-r",
			&public_key,
			"-o",
			output,
			input
		),
		AGE_BIN,
	)?;
	Ok(())
}

/// Decrypts `input` to `output` using the identity file at `key_path`.
#[instrument]
pub fn decrypt_file(input: &Path, output: &Path, key_path: &Path) -> Result<(), EngineError> {
	run_captured(
		duct::cmd!(AGE_BIN, "-d", "-i", key_path, "-o", output, input),
		AGE_BIN,
	)?;
	Ok(())
}

fn write_exclusive(path: &Path, contents: &[u8]) -> Result<(), EngineError> {
	let mut file = OpenOptions::new()
		.write(true)
		.create_new(true)
		.mode(0o600)
		.open(path)
		.map_err(|e| {
			if e.kind() == std::io::ErrorKind::AlreadyExists {
				EngineError::other(format!("{path:?} already exists"))
			} else {
				EngineError::io(path, e)
			}
		})?;
	file.write_all(contents).map_err(|e| EngineError::io(path, e))
}

fn write_owner_only(path: &Path, contents: &[u8]) -> Result<(), EngineError> {
	let mut file = OpenOptions::new()
		.write(true)
		.create(true)
		.truncate(true)
		.mode(0o600)
		.open(path)
		.map_err(|e| EngineError::io(path, e))?;
	file.write_all(contents).map_err(|e| EngineError::io(path, e))
}

fn read_to_string(path: &Path) -> Result<String, EngineError> {
	let mut file = File::open(path).map_err(|e| EngineError::io(path, e))?;
	let mut buf = String::new();
	file.read_to_string(&mut buf).map_err(|e| EngineError::io(path, e))?;
	Ok(buf)
}

/// Observational key diagnostics: never fails, used for user-facing
/// status output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KeyInfo {
	pub exists: bool,
	pub readable: bool,
	pub pub_key: Option<String>,
	pub key_id: Option<String>,
	pub retired_key_count: usize,
}

pub fn inspect_key(key_path: &Path, retired_dir: &Path) -> KeyInfo {
	let exists = key_path.exists();
	let material = read_to_string(key_path).ok();
	let readable = material.is_some();
	let pub_key = material.as_deref().and_then(parse_public_key);
	let key_id = pub_key.as_deref().map(fingerprint_of);
	let retired_key_count = std::fs::read_dir(retired_dir)
		.map(|entries| {
			entries
				.filter_map(|e| e.ok())
				.filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("age"))
				.count()
		})
		.unwrap_or(0);

	KeyInfo {
		exists,
		readable,
		pub_key,
		key_id,
		retired_key_count,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_public_key_comment_form() {
		let material = "# created: 2024-01-01T00:00:00Z\n# public key: age1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq\nAGE-SECRET-KEY-1QQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQQ\n";
		let key = parse_public_key(material).unwrap();
		assert!(key.starts_with("age1"));
	}

	#[test]
	fn fingerprint_is_16_hex_chars() {
		let fp = fingerprint_of("age1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq");
		assert_eq!(fp.len(), 16);
		assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn write_exclusive_refuses_overwrite() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("key");
		write_exclusive(&path, b"one").unwrap();
		let err = write_exclusive(&path, b"two").unwrap_err();
		assert!(format!("{err}").contains("already exists"));
	}
}
