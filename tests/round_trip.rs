//! End-to-end backup/restore scenarios driven through the public
//! orchestrator API. Skipped (not failed) when `tar`/`age` aren't on
//! PATH, since these exercise the real subprocess pipeline.

use std::collections::HashMap;
use std::path::Path;

use openclaw_backup::archive;
use openclaw_backup::config::{Config, DestinationConfig, RetentionConfig};
use openclaw_backup::crypto;
use openclaw_backup::orchestrator::backup::{run_backup, BackupOptions, HostPaths};
use openclaw_backup::orchestrator::restore::{run_restore, RestoreOptions};
use openclaw_backup::providers::{LocalProvider, Provider};

fn prerequisites_available() -> bool {
	archive::is_tar_available() && crypto::is_available()
}

fn base_config(source_root: &Path, dest_root: &Path) -> Config {
	let mut destinations = HashMap::new();
	destinations.insert(
		"local".to_string(),
		DestinationConfig {
			path: Some(dest_root.to_string_lossy().into_owned()),
			remote: None,
		},
	);

	Config {
		encrypt: true,
		encrypt_key_path: None,
		include: vec![source_root.to_string_lossy().into_owned()],
		extra_paths: Vec::new(),
		exclude: Vec::new(),
		include_transcripts: true,
		include_persistor: false,
		retention: RetentionConfig { count: 5 },
		destinations,
		schedule: None,
		hostname: Some("integrationhost".to_string()),
		temp_dir: None,
		skip_disk_check: true,
		alert_after_failures: 3,
	}
}

#[tokio::test]
async fn encrypted_round_trip_preserves_nested_structure() {
	if !prerequisites_available() {
		eprintln!("skipping: tar/age not available");
		return;
	}

	let source_home = tempfile::tempdir().unwrap();
	let dest_root = tempfile::tempdir().unwrap();
	let restore_home = tempfile::tempdir().unwrap();

	let nested = source_home.path().join("notes/journal");
	std::fs::create_dir_all(&nested).unwrap();
	std::fs::write(nested.join("entry.md"), b"hello from the journal").unwrap();
	std::fs::write(source_home.path().join("top-level.txt"), b"top level contents").unwrap();

	let config = base_config(source_home.path(), dest_root.path());
	let backup_host = HostPaths::new(source_home.path());

	let backup_result = run_backup(&config, &backup_host, BackupOptions::default())
		.await
		.expect("backup should succeed");
	assert!(backup_result.archive_name.is_some());
	assert_eq!(backup_result.succeeded_providers, vec!["local".to_string()]);

	let restore_host = HostPaths::new(restore_home.path());
	let providers = vec![Provider::Local(LocalProvider::new("local", dest_root.path()))];

	let restore_result = run_restore(
		&config,
		&restore_host,
		&providers,
		RestoreOptions {
			source: "local".to_string(),
			timestamp: None,
			dry_run: false,
			skip_pre_backup: true,
			suppress_version_warning: true,
		},
	)
	.await
	.expect("restore should succeed");

	assert!(restore_result.errors.is_empty());

	// Collected paths are relative to dirname(root), so the restored tree
	// is nested one level under the source directory's own basename.
	let source_basename = source_home.path().file_name().unwrap();
	let restored_nested = restore_home.path().join(source_basename).join("notes/journal/entry.md");
	assert_eq!(
		std::fs::read_to_string(&restored_nested).unwrap(),
		"hello from the journal"
	);

	let restored_top_level = restore_home.path().join(source_basename).join("top-level.txt");
	assert_eq!(
		std::fs::read_to_string(&restored_top_level).unwrap(),
		"top level contents"
	);
}

#[tokio::test]
async fn dry_run_restore_writes_nothing() {
	if !prerequisites_available() {
		eprintln!("skipping: tar/age not available");
		return;
	}

	let source_home = tempfile::tempdir().unwrap();
	let dest_root = tempfile::tempdir().unwrap();
	let restore_home = tempfile::tempdir().unwrap();

	std::fs::write(source_home.path().join("file.txt"), b"contents").unwrap();

	let config = base_config(source_home.path(), dest_root.path());
	let backup_host = HostPaths::new(source_home.path());
	run_backup(&config, &backup_host, BackupOptions::default())
		.await
		.expect("backup should succeed");

	let restore_host = HostPaths::new(restore_home.path());
	let providers = vec![Provider::Local(LocalProvider::new("local", dest_root.path()))];

	let result = run_restore(
		&config,
		&restore_host,
		&providers,
		RestoreOptions {
			source: "local".to_string(),
			timestamp: None,
			dry_run: true,
			skip_pre_backup: true,
			suppress_version_warning: true,
		},
	)
	.await
	.expect("dry run should succeed");

	assert!(result.dry_run);
	assert!(result.dry_run_summary.is_some());
	assert_eq!(
		std::fs::read_dir(restore_home.path()).unwrap().count(),
		0,
		"dry run must not write into the restore home"
	);
}

#[tokio::test]
async fn corrupted_archive_aborts_restore_without_writing_files() {
	if !prerequisites_available() {
		eprintln!("skipping: tar/age not available");
		return;
	}

	let source_home = tempfile::tempdir().unwrap();
	let dest_root = tempfile::tempdir().unwrap();
	let restore_home = tempfile::tempdir().unwrap();

	std::fs::write(source_home.path().join("file.txt"), b"contents").unwrap();

	let config = base_config(source_home.path(), dest_root.path());
	let backup_host = HostPaths::new(source_home.path());
	run_backup(&config, &backup_host, BackupOptions::default())
		.await
		.expect("backup should succeed");

	let hostname_dir = dest_root.path().join("integrationhost");
	let archive_path = std::fs::read_dir(&hostname_dir)
		.unwrap()
		.filter_map(|e| e.ok())
		.map(|e| e.path())
		.find(|p| p.extension().and_then(|s| s.to_str()) == Some("age"))
		.expect("archive should have been pushed");

	// Flip bytes in the middle of the encrypted stream: valid age framing
	// is gone, so decryption itself fails before any file is extracted.
	let mut bytes = std::fs::read(&archive_path).unwrap();
	let mid = bytes.len() / 2;
	for b in bytes.iter_mut().skip(mid).take(16) {
		*b ^= 0xff;
	}
	std::fs::write(&archive_path, bytes).unwrap();

	let restore_host = HostPaths::new(restore_home.path());
	let providers = vec![Provider::Local(LocalProvider::new("local", dest_root.path()))];

	let result = run_restore(
		&config,
		&restore_host,
		&providers,
		RestoreOptions {
			source: "local".to_string(),
			timestamp: None,
			dry_run: false,
			skip_pre_backup: true,
			suppress_version_warning: true,
		},
	)
	.await;

	assert!(result.is_err(), "corrupted archive must fail restore");
	assert_eq!(
		std::fs::read_dir(restore_home.path()).unwrap().count(),
		0,
		"a failed restore must not have written partial files"
	);
}
