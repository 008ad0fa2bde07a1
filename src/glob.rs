//! Linear-time glob matching and exclusion-pattern classification.
//!
//! `*` is the only wildcard. Patterns longer than 500 characters are
//! rejected outright to bound the cost of matching.

const MAX_PATTERN_LEN: usize = 500;

/// Matches `name` against `pattern`, where `*` matches any run of
/// characters (including none) and consecutive `*`s collapse to one.
///
/// This is the classic two-pointer wildcard matcher: O(pattern.len() +
/// name.len()) amortised, no backtracking beyond a single bookmarked
/// position, so it cannot be driven quadratic by adversarial input.
pub fn glob_match(pattern: &str, name: &str) -> bool {
	if pattern.len() > MAX_PATTERN_LEN {
		return false;
	}

	let pattern: Vec<char> = pattern.chars().collect();
	let name: Vec<char> = name.chars().collect();

	let (mut pi, mut ni) = (0usize, 0usize);
	let (mut star_idx, mut star_match) = (None::<usize>, 0usize);

	while ni < name.len() {
		if pi < pattern.len() && (pattern[pi] == '*') {
			// Collapse consecutive stars.
			while pi < pattern.len() && pattern[pi] == '*' {
				pi += 1;
			}
			star_idx = Some(pi);
			star_match = ni;
		} else if pi < pattern.len() && pattern[pi] == name[ni] {
			pi += 1;
			ni += 1;
		} else if let Some(si) = star_idx {
			pi = si;
			star_match += 1;
			ni = star_match;
		} else {
			return false;
		}
	}

	while pi < pattern.len() && pattern[pi] == '*' {
		pi += 1;
	}

	pi == pattern.len()
}

/// One of the three exclusion-pattern shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExcludePattern {
	/// Contains `*`: matched against the bare file/dir name.
	Glob(String),
	/// Contains `/`: matched as a prefix or equality against the full
	/// absolute path.
	PathLike(String),
	/// Neither: matched against each path component.
	BareName(String),
}

impl ExcludePattern {
	pub fn parse(raw: &str) -> Self {
		if raw.contains('*') {
			Self::Glob(raw.to_string())
		} else if raw.contains('/') {
			Self::PathLike(raw.to_string())
		} else {
			Self::BareName(raw.to_string())
		}
	}

	/// Does this pattern exclude the entry at `abs_path` with bare file
	/// name `name`?
	pub fn matches(&self, abs_path: &str, name: &str) -> bool {
		match self {
			Self::Glob(pattern) => glob_match(pattern, name),
			Self::PathLike(prefix) => abs_path == prefix || abs_path.starts_with(prefix.as_str()),
			Self::BareName(bare) => abs_path
				.split('/')
				.any(|component| component == bare.as_str()),
		}
	}
}

/// Parses a raw exclude-pattern list into classified patterns, so only
/// patterns within the length bound survive.
pub fn parse_excludes(raw: &[String]) -> Vec<ExcludePattern> {
	raw.iter()
		.filter(|p| p.len() <= MAX_PATTERN_LEN)
		.map(|p| ExcludePattern::parse(p))
		.collect()
}

pub fn is_excluded(patterns: &[ExcludePattern], abs_path: &str, name: &str) -> bool {
	patterns.iter().any(|p| p.matches(abs_path, name))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn matches_plain_names() {
		assert!(glob_match("foo.txt", "foo.txt"));
		assert!(!glob_match("foo.txt", "bar.txt"));
	}

	#[test]
	fn matches_star_wildcards() {
		assert!(glob_match("*.log", "debug.log"));
		assert!(glob_match("*.log", ".log"));
		assert!(!glob_match("*.log", "debug.txt"));
		assert!(glob_match("node_modules", "node_modules"));
		assert!(glob_match("*", "anything"));
		assert!(glob_match("a*b*c", "aXbYYc"));
		assert!(!glob_match("a*b*c", "aXbYYd"));
	}

	#[test]
	fn collapses_consecutive_stars() {
		assert!(glob_match("a**b", "aXXXb"));
	}

	#[test]
	fn rejects_overlong_patterns() {
		let long = "a".repeat(501);
		assert!(!glob_match(&long, "a"));
	}

	#[test]
	fn classifies_pattern_shapes() {
		assert_eq!(
			ExcludePattern::parse("*.log"),
			ExcludePattern::Glob("*.log".into())
		);
		assert_eq!(
			ExcludePattern::parse("/home/user/tmp"),
			ExcludePattern::PathLike("/home/user/tmp".into())
		);
		assert_eq!(
			ExcludePattern::parse("node_modules"),
			ExcludePattern::BareName("node_modules".into())
		);
	}

	#[test]
	fn path_like_matches_prefix() {
		let pat = ExcludePattern::parse("/home/user/tmp");
		assert!(pat.matches("/home/user/tmp/file.txt", "file.txt"));
		assert!(pat.matches("/home/user/tmp", "tmp"));
		assert!(!pat.matches("/home/user/other", "other"));
	}

	#[test]
	fn bare_name_matches_any_component() {
		let pat = ExcludePattern::parse(".git");
		assert!(pat.matches("/home/user/project/.git/HEAD", "HEAD"));
	}
}
