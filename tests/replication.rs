//! Replication partial-failure scenario: one destination's push fails,
//! the other succeeds, and the run still reports success overall — this
//! engine never treats partial replication as fatal.

use std::collections::HashMap;

use openclaw_backup::archive;
use openclaw_backup::config::{Config, DestinationConfig, RetentionConfig};
use openclaw_backup::crypto;
use openclaw_backup::orchestrator::backup::{run_backup, BackupOptions, HostPaths};

fn prerequisites_available() -> bool {
	archive::is_tar_available() && crypto::is_available()
}

#[cfg(unix)]
#[tokio::test]
async fn one_destination_failing_does_not_fail_the_whole_run() {
	if !prerequisites_available() {
		eprintln!("skipping: tar/age not available");
		return;
	}

	use std::os::unix::fs::PermissionsExt;

	let source_home = tempfile::tempdir().unwrap();
	let good_dest = tempfile::tempdir().unwrap();
	let broken_dest = tempfile::tempdir().unwrap();

	std::fs::write(source_home.path().join("file.txt"), b"contents").unwrap();

	// The destination directory itself exists (so the provider's
	// availability check passes) but cannot be written into, so the
	// actual push fails once replication starts.
	std::fs::set_permissions(broken_dest.path(), std::fs::Permissions::from_mode(0o500)).unwrap();

	let mut destinations = HashMap::new();
	destinations.insert(
		"good".to_string(),
		DestinationConfig {
			path: Some(good_dest.path().to_string_lossy().into_owned()),
			remote: None,
		},
	);
	destinations.insert(
		"broken".to_string(),
		DestinationConfig {
			path: Some(broken_dest.path().to_string_lossy().into_owned()),
			remote: None,
		},
	);

	let config = Config {
		encrypt: true,
		encrypt_key_path: None,
		include: vec![source_home.path().to_string_lossy().into_owned()],
		extra_paths: Vec::new(),
		exclude: Vec::new(),
		include_transcripts: true,
		include_persistor: false,
		retention: RetentionConfig { count: 5 },
		destinations,
		schedule: None,
		hostname: Some("replhost".to_string()),
		temp_dir: None,
		skip_disk_check: true,
		alert_after_failures: 3,
	};

	let host = HostPaths::new(source_home.path());
	let result = run_backup(&config, &host, BackupOptions::default()).await;

	// Restore write permission so the tempdir can clean itself up.
	std::fs::set_permissions(broken_dest.path(), std::fs::Permissions::from_mode(0o700)).unwrap();

	let result = result.expect("at least one destination succeeded, so the run should succeed");
	assert_eq!(result.succeeded_providers, vec!["good".to_string()]);

	let archive_pushed = std::fs::read_dir(good_dest.path().join("replhost"))
		.unwrap()
		.filter_map(|e| e.ok())
		.any(|e| e.path().extension().and_then(|s| s.to_str()) == Some("age"));
	assert!(archive_pushed, "the surviving destination should hold the archive");
}
