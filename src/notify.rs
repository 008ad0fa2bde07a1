//! Notifications: write-then-rename last-result file, JSONL alerts log
//! past a failure threshold.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotificationOutcome {
	Success { details: serde_json::Value },
	Failure { details: serde_json::Value },
}

/// Durable outcome record for one backup run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupNotification {
	#[serde(flatten)]
	pub outcome: NotificationOutcome,
	pub timestamp: DateTime<Utc>,
	pub hostname: String,
	pub consecutive_failures: u32,
}

pub struct Notifier {
	last_result_path: PathBuf,
	alerts_path: PathBuf,
	alert_after_failures: u32,
}

impl Notifier {
	pub fn new(
		last_result_path: impl Into<PathBuf>,
		alerts_path: impl Into<PathBuf>,
		alert_after_failures: u32,
	) -> Self {
		Self {
			last_result_path: last_result_path.into(),
			alerts_path: alerts_path.into(),
			alert_after_failures,
		}
	}

	fn read_prior(&self) -> Option<BackupNotification> {
		let contents = std::fs::read_to_string(&self.last_result_path).ok()?;
		serde_json::from_str(&contents).ok()
	}

	/// The most recent recorded outcome, if any (status reporting).
	pub fn last_result(&self) -> Option<BackupNotification> {
		self.read_prior()
	}

	/// Records a successful run: resets `consecutive_failures` to 0.
	#[instrument(skip(self, details))]
	pub fn record_success(&self, hostname: &str, details: serde_json::Value) -> Result<(), EngineError> {
		let notification = BackupNotification {
			outcome: NotificationOutcome::Success { details },
			timestamp: Utc::now(),
			hostname: hostname.to_string(),
			consecutive_failures: 0,
		};
		self.write_last_result(&notification)
	}

	/// Records a failed run: increments `consecutive_failures` from the
	/// prior record if it was also a failure, else starts at 1. Appends to
	/// the alerts log once the threshold is reached.
	#[instrument(skip(self))]
	pub fn record_failure(&self, hostname: &str, error: &str) -> Result<(), EngineError> {
		let consecutive_failures = match self.read_prior() {
			Some(prior) if matches!(prior.outcome, NotificationOutcome::Failure { .. }) => {
				prior.consecutive_failures + 1
			}
			_ => 1,
		};

		let notification = BackupNotification {
			outcome: NotificationOutcome::Failure {
				details: serde_json::json!({ "error": error }),
			},
			timestamp: Utc::now(),
			hostname: hostname.to_string(),
			consecutive_failures,
		};

		self.write_last_result(&notification)?;

		if consecutive_failures >= self.alert_after_failures {
			self.append_alert(&notification)?;
		}

		Ok(())
	}

	fn write_last_result(&self, notification: &BackupNotification) -> Result<(), EngineError> {
		let json = serde_json::to_string(notification)
			.map_err(|e| EngineError::other(format!("failed to serialize notification: {e}")))?;

		let tmp_path = self.last_result_path.with_extension("tmp");
		{
			let mut file = std::fs::OpenOptions::new()
				.write(true)
				.create(true)
				.truncate(true)
				.mode(0o600)
				.open(&tmp_path)
				.map_err(|e| EngineError::io(&tmp_path, e))?;
			file.write_all(json.as_bytes()).map_err(|e| EngineError::io(&tmp_path, e))?;
			file.sync_all().map_err(|e| EngineError::io(&tmp_path, e))?;
		}
		std::fs::rename(&tmp_path, &self.last_result_path)
			.map_err(|e| EngineError::io(&self.last_result_path, e))
	}

	fn append_alert(&self, notification: &BackupNotification) -> Result<(), EngineError> {
		let json = serde_json::to_string(notification)
			.map_err(|e| EngineError::other(format!("failed to serialize alert: {e}")))?;

		let mut file = std::fs::OpenOptions::new()
			.append(true)
			.create(true)
			.mode(0o600)
			.open(&self.alerts_path)
			.map_err(|e| EngineError::io(&self.alerts_path, e))?;
		writeln!(file, "{json}").map_err(|e| EngineError::io(&self.alerts_path, e))
	}

	pub fn clear_alerts(&self) -> Result<(), EngineError> {
		match std::fs::remove_file(&self.alerts_path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(EngineError::io(&self.alerts_path, e)),
		}
	}

	/// Startup check: reads the last-result file and, if the run history
	/// shows consecutive failures, returns a human summary for the host to
	/// surface.
	pub fn startup_check(&self) -> Option<String> {
		let prior = self.read_prior()?;
		if matches!(prior.outcome, NotificationOutcome::Failure { .. }) && prior.consecutive_failures > 0 {
			Some(format!("last {} backup(s) failed", prior.consecutive_failures))
		} else {
			None
		}
	}
}

/// Resolves the hostname used in notifications and manifests: the
/// configured override if present, else the OS hostname.
pub fn resolve_hostname(configured: Option<&str>) -> String {
	configured
		.map(sanitize_hostname)
		.unwrap_or_else(|| sanitize_hostname(&os_hostname()))
}

fn os_hostname() -> String {
	hostname_from_env_or_uname()
}

#[cfg(unix)]
fn hostname_from_env_or_uname() -> String {
	nix::unistd::gethostname()
		.ok()
		.and_then(|h| h.into_string().ok())
		.unwrap_or_else(|| "unknown-host".to_string())
}

#[cfg(not(unix))]
fn hostname_from_env_or_uname() -> String {
	"unknown-host".to_string()
}

/// Sanitizes a hostname for use as a path component: strips everything
/// but alphanumerics, `-`, `_`, `.`.
pub fn sanitize_hostname(raw: &str) -> String {
	raw.chars()
		.filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	fn notifier(dir: &Path) -> Notifier {
		Notifier::new(dir.join("backup-last-result.json"), dir.join("backup-alerts.jsonl"), 3)
	}

	#[test]
	fn success_resets_consecutive_failures() {
		let dir = tempfile::tempdir().unwrap();
		let n = notifier(dir.path());
		n.record_failure("host", "boom").unwrap();
		n.record_failure("host", "boom").unwrap();
		n.record_success("host", serde_json::json!({})).unwrap();

		let prior = n.read_prior().unwrap();
		assert_eq!(prior.consecutive_failures, 0);
	}

	#[test]
	fn failures_increment_and_trigger_alert_at_threshold() {
		let dir = tempfile::tempdir().unwrap();
		let n = notifier(dir.path());
		n.record_failure("host", "one").unwrap();
		n.record_failure("host", "two").unwrap();
		assert!(!dir.path().join("backup-alerts.jsonl").exists());

		n.record_failure("host", "three").unwrap();
		assert!(dir.path().join("backup-alerts.jsonl").exists());
	}

	#[test]
	fn clear_alerts_missing_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		let n = notifier(dir.path());
		n.clear_alerts().unwrap();
	}

	#[test]
	fn sanitize_hostname_strips_unsafe_chars() {
		assert_eq!(sanitize_hostname("my host/../name!"), "myhostname");
	}

	#[test]
	fn resolve_hostname_prefers_configured() {
		assert_eq!(resolve_hostname(Some("configured-host")), "configured-host");
	}
}
