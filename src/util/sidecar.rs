//! Sidecar filename derivation: `<base>.manifest.json`.

/// Given an archive filename (`<host>-<ts>.tar.gz` or `<host>-<ts>.tar.gz.age`),
/// returns the sidecar manifest filename (`<host>-<ts>.manifest.json`).
pub fn sidecar_path(archive_name: &str) -> String {
	let base = archive_name
		.strip_suffix(".tar.gz.age")
		.or_else(|| archive_name.strip_suffix(".tar.gz"))
		.unwrap_or(archive_name);
	format!("{base}.manifest.json")
}

/// True iff `filename` is an archive file (encrypted or not) as opposed to
/// a sidecar manifest or lightweight index file.
pub fn is_archive_filename(filename: &str) -> bool {
	filename.ends_with(".tar.gz") || filename.ends_with(".tar.gz.age")
}

/// True iff `filename` is a sidecar manifest.
pub fn is_manifest_filename(filename: &str) -> bool {
	filename.ends_with(".manifest.json")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derives_sidecar_for_plain_archive() {
		assert_eq!(
			sidecar_path("host-2024-01-01T00-00-00.tar.gz"),
			"host-2024-01-01T00-00-00.manifest.json"
		);
	}

	#[test]
	fn derives_sidecar_for_encrypted_archive() {
		assert_eq!(
			sidecar_path("host-2024-01-01T00-00-00.tar.gz.age"),
			"host-2024-01-01T00-00-00.manifest.json"
		);
	}
}
