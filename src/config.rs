//! Configuration loading: a JSON5 document read either from a root
//! `backup` key or a standalone path, validated at load time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::EngineError;

fn default_encrypt() -> bool {
	true
}

fn default_alert_after_failures() -> u32 {
	3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
	pub path: Option<String>,
	pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
	pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	#[serde(default = "default_encrypt")]
	pub encrypt: bool,
	#[serde(rename = "encryptKeyPath")]
	pub encrypt_key_path: Option<String>,
	#[serde(default)]
	pub include: Vec<String>,
	#[serde(rename = "extraPaths", default)]
	pub extra_paths: Vec<String>,
	#[serde(default)]
	pub exclude: Vec<String>,
	#[serde(rename = "includeTranscripts", default)]
	pub include_transcripts: bool,
	#[serde(rename = "includePersistor", default)]
	pub include_persistor: bool,
	pub retention: RetentionConfig,
	pub destinations: HashMap<String, DestinationConfig>,
	pub schedule: Option<String>,
	pub hostname: Option<String>,
	#[serde(rename = "tempDir")]
	pub temp_dir: Option<String>,
	#[serde(rename = "skipDiskCheck", default)]
	pub skip_disk_check: bool,
	#[serde(rename = "alertAfterFailures", default = "default_alert_after_failures")]
	pub alert_after_failures: u32,
}

const MAX_RETENTION_COUNT: u32 = 1000;

/// Loads and validates a `Config` from a JSON5 file. If `key` is given,
/// the config is read from that top-level key of the document (the host
/// embeds this engine's config inside a larger document); otherwise the
/// whole document is the config.
#[instrument]
pub fn load(path: &Path, key: Option<&str>) -> Result<Config, EngineError> {
	let contents = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
	let document: serde_json::Value = json5::from_str(&contents)
		.map_err(|e| EngineError::ConfigInvalid {
			field: "<document>".to_string(),
			value: strip_control_chars(path.to_string_lossy().as_ref()),
			reason: e.to_string(),
		})?;

	let value = match key {
		Some(k) => document.get(k).cloned().ok_or_else(|| EngineError::ConfigInvalid {
			field: k.to_string(),
			value: "<missing>".to_string(),
			reason: "key not found in config document".to_string(),
		})?,
		None => document,
	};

	let config: Config = serde_json::from_value(value).map_err(|e| EngineError::ConfigInvalid {
		field: "<root>".to_string(),
		value: strip_control_chars(&e.to_string()),
		reason: "does not match expected shape".to_string(),
	})?;

	validate(&config)?;
	Ok(config)
}

fn validate(config: &Config) -> Result<(), EngineError> {
	if config.retention.count == 0 || config.retention.count > MAX_RETENTION_COUNT {
		return Err(EngineError::ConfigInvalid {
			field: "retention.count".to_string(),
			value: config.retention.count.to_string(),
			reason: format!("must be between 1 and {MAX_RETENTION_COUNT}"),
		});
	}

	for (name, dest) in &config.destinations {
		if dest.path.is_none() && dest.remote.is_none() {
			return Err(EngineError::ConfigInvalid {
				field: format!("destinations.{name}"),
				value: "{}".to_string(),
				reason: "exactly one of `path` or `remote` must be set".to_string(),
			});
		}
	}

	if let Some(cron) = &config.schedule {
		validate_cron(cron)?;
	}

	if config.alert_after_failures == 0 {
		return Err(EngineError::ConfigInvalid {
			field: "alertAfterFailures".to_string(),
			value: "0".to_string(),
			reason: "must be positive".to_string(),
		});
	}

	Ok(())
}

/// Validates 5-field arity and per-field numeric range. This engine never
/// evaluates the expression: scheduling is an external collaborator.
fn validate_cron(expr: &str) -> Result<(), EngineError> {
	let fields: Vec<&str> = expr.split_whitespace().collect();
	if fields.len() != 5 {
		return Err(EngineError::ConfigInvalid {
			field: "schedule".to_string(),
			value: strip_control_chars(expr),
			reason: "cron expression must have exactly 5 fields".to_string(),
		});
	}

	let ranges: [(u32, u32); 5] = [(0, 59), (0, 23), (1, 31), (1, 12), (0, 7)];
	for (field, (lo, hi)) in fields.iter().zip(ranges) {
		if *field == "*" {
			continue;
		}
		for part in field.split(',') {
			let number = part.trim_start_matches('*').trim_start_matches('/');
			if number.is_empty() {
				continue;
			}
			match number.parse::<u32>() {
				Ok(n) if n >= lo && n <= hi => {}
				_ => {
					return Err(EngineError::ConfigInvalid {
						field: "schedule".to_string(),
						value: strip_control_chars(expr),
						reason: format!("field {part:?} out of range {lo}-{hi}"),
					})
				}
			}
		}
	}

	Ok(())
}

fn strip_control_chars(s: &str) -> String {
	s.chars().filter(|c| !c.is_control()).collect()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
	if let Some(rest) = raw.strip_prefix("~/") {
		if let Some(home) = dirs::home_dir() {
			return home.join(rest);
		}
	} else if raw == "~" {
		if let Some(home) = dirs::home_dir() {
			return home;
		}
	}
	PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	fn write_config(dir: &Path, body: &str) -> PathBuf {
		let path = dir.join("backup.json5");
		fs::write(&path, body).unwrap();
		path
	}

	#[test]
	fn loads_minimal_valid_config() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_config(
			&dir,
			r#"{
				retention: { count: 5 },
				destinations: { local: { path: "/tmp/backups" } },
			}"#,
		);
		let config = load(&path, None).unwrap();
		assert!(config.encrypt);
		assert_eq!(config.retention.count, 5);
	}

	#[test]
	fn rejects_retention_count_out_of_range() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_config(
			&dir,
			r#"{ retention: { count: 0 }, destinations: {} }"#,
		);
		let err = load(&path, None).unwrap_err();
		assert!(matches!(err, EngineError::ConfigInvalid { .. }));
	}

	#[test]
	fn rejects_destination_with_neither_path_nor_remote() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_config(
			&dir,
			r#"{ retention: { count: 5 }, destinations: { bad: {} } }"#,
		);
		let err = load(&path, None).unwrap_err();
		assert!(matches!(err, EngineError::ConfigInvalid { .. }));
	}

	#[test]
	fn reads_from_nested_key() {
		let dir = tempfile::tempdir().unwrap();
		let path = write_config(
			&dir,
			r#"{
				backup: {
					retention: { count: 3 },
					destinations: { local: { path: "/tmp" } },
				},
			}"#,
		);
		let config = load(&path, Some("backup")).unwrap();
		assert_eq!(config.retention.count, 3);
	}

	#[test]
	fn validates_cron_arity() {
		assert!(validate_cron("* * * *").is_err());
		assert!(validate_cron("*/5 * * * *").is_ok());
		assert!(validate_cron("60 * * * *").is_err());
	}

	#[test]
	fn expand_tilde_uses_home_dir() {
		let expanded = expand_tilde("~/foo");
		assert!(expanded.ends_with("foo"));
	}
}
