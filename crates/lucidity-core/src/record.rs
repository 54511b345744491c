use serde::Serialize;
use std::path::PathBuf;

use lucidity_cache::SlotOperation;
use lucidity_git::{DiffSummary, FileDiff, GitChangeSet, ParseWarning, ReferenceKind};

/// Files with fewer changed lines than this are flagged `small_change`.
pub const SMALL_CHANGE_THRESHOLD: usize = 3;

/// Lock and checksum files: rarely worth reviewing line by line.
const LOCKFILE_SUFFIXES: &[&str] = &[".lock", ".sum", "package-lock.json", "yarn.lock", ".DS_Store"];
const LOCKFILE_NAMES: &[&str] = &["go.mod"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Changes,
    NoChanges,
}

/// How the workspace was made available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceSource {
    Local,
    Cloned,
    Fetched,
    /// A concurrent request had just refreshed the cached clone
    Reused,
}

impl From<SlotOperation> for WorkspaceSource {
    fn from(op: SlotOperation) -> Self {
        match op {
            SlotOperation::Cloned => WorkspaceSource::Cloned,
            SlotOperation::Fetched => WorkspaceSource::Fetched,
            SlotOperation::Reused => WorkspaceSource::Reused,
        }
    }
}

/// Where the changes came from and which selection produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceMetadata {
    /// The reference string as given
    pub reference: String,
    pub kind: ReferenceKind,
    /// Directory the diff ran in
    pub resolved_path: PathBuf,
    /// Clone URL with credentials redacted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_filter: Option<String>,
    pub source: WorkspaceSource,
}

/// One changed file plus consumer hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChange {
    #[serde(flatten)]
    pub diff: FileDiff,
    pub insertions: usize,
    pub deletions: usize,
    /// Fewer than [`SMALL_CHANGE_THRESHOLD`] changed lines. Informational.
    pub small_change: bool,
    /// Lock or checksum file
    pub lockfile: bool,
}

impl From<FileDiff> for FileChange {
    fn from(diff: FileDiff) -> Self {
        let insertions = diff.insertions();
        let deletions = diff.deletions();
        let lockfile = is_lockfile(&diff.path);
        Self {
            small_change: insertions + deletions < SMALL_CHANGE_THRESHOLD,
            insertions,
            deletions,
            lockfile,
            diff,
        }
    }
}

/// Everything one request produced, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeRecord {
    pub status: ChangeStatus,
    pub workspace: WorkspaceMetadata,
    pub summary: DiffSummary,
    /// In the order git reported them
    pub files: Vec<FileChange>,
    /// Set-level warnings and per-file diagnostics
    pub warnings: Vec<ParseWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ChangeRecord {
    /// Join a parsed change set with its workspace metadata.
    ///
    /// Every parsed file is kept; small and lock files are only flagged.
    pub fn assemble(change_set: GitChangeSet, workspace: WorkspaceMetadata) -> Self {
        let summary = DiffSummary::from_change_set(&change_set);
        let warnings = change_set.all_warnings();

        let status = if change_set.is_empty() {
            ChangeStatus::NoChanges
        } else {
            ChangeStatus::Changes
        };
        let hint = match status {
            ChangeStatus::NoChanges => Some(no_changes_hint(workspace.commit_range.as_deref())),
            ChangeStatus::Changes => None,
        };

        Self {
            status,
            summary,
            files: change_set.files.into_iter().map(FileChange::from).collect(),
            warnings,
            hint,
            workspace,
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.diff.path.as_str())
    }
}

fn no_changes_hint(commit_range: Option<&str>) -> String {
    match commit_range {
        Some(range) => format!("No changes detected in commit range: {}", range),
        None => "No uncommitted changes detected. To analyze committed changes, pass a \
                 commit range such as HEAD~1..HEAD (last commit), HEAD~5..HEAD (last five \
                 commits) or abc123^..abc123 (one specific commit)."
            .to_string(),
    }
}

/// Whether a path names a lock or checksum file.
pub fn is_lockfile(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    LOCKFILE_NAMES.contains(&name) || LOCKFILE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucidity_git::parse_unified_diff;

    fn metadata(commit_range: Option<&str>) -> WorkspaceMetadata {
        WorkspaceMetadata {
            reference: "/work/project".into(),
            kind: ReferenceKind::Local,
            resolved_path: PathBuf::from("/work/project"),
            clone_url: None,
            cache_key: None,
            branch: None,
            commit_range: commit_range.map(String::from),
            path_filter: None,
            source: WorkspaceSource::Local,
        }
    }

    const DIFF: &str = "\
diff --git a/z_last.rs b/z_last.rs
--- a/z_last.rs
+++ b/z_last.rs
@@ -1 +1 @@
-a
+b
diff --git a/Cargo.lock b/Cargo.lock
--- a/Cargo.lock
+++ b/Cargo.lock
@@ -1,3 +1,3 @@
-x
-y
-z
+x2
+y2
+z2
diff --git a/a_first.rs b/a_first.rs
--- a/a_first.rs
+++ b/a_first.rs
@@ -1,x +1 @@
";

    #[test]
    fn test_assemble_keeps_git_order_and_every_file() {
        let record = ChangeRecord::assemble(parse_unified_diff(DIFF), metadata(Some("HEAD~1..HEAD")));

        assert_eq!(record.status, ChangeStatus::Changes);
        assert!(record.hint.is_none());
        let paths: Vec<_> = record.paths().collect();
        assert_eq!(paths, vec!["z_last.rs", "Cargo.lock", "a_first.rs"]);

        let small = &record.files[0];
        assert!(small.small_change);
        assert!(!small.lockfile);
        assert_eq!((small.insertions, small.deletions), (1, 1));

        let lock = &record.files[1];
        assert!(lock.lockfile);
        assert!(!lock.small_change);

        assert!(record.files[2].diff.diagnostic.is_some());
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.summary.files_changed, 3);
    }

    #[test]
    fn test_empty_change_set_has_hint() {
        let record = ChangeRecord::assemble(GitChangeSet::default(), metadata(None));
        assert_eq!(record.status, ChangeStatus::NoChanges);
        assert!(record.hint.as_deref().unwrap().contains("HEAD~1..HEAD"));

        let record = ChangeRecord::assemble(GitChangeSet::default(), metadata(Some("a..b")));
        assert_eq!(
            record.hint.as_deref(),
            Some("No changes detected in commit range: a..b")
        );
    }

    #[test]
    fn test_serializes_as_plain_mapping() {
        let record = ChangeRecord::assemble(parse_unified_diff(DIFF), metadata(None));
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["status"], "changes");
        assert_eq!(value["workspace"]["kind"], "local");
        assert_eq!(value["workspace"]["source"], "local");
        assert_eq!(value["files"][0]["path"], "z_last.rs");
        assert_eq!(value["files"][0]["change_type"], "modified");
        assert_eq!(value["files"][0]["detected_language"], "rust");
        assert_eq!(value["files"][0]["hunks"][0]["lines"][0]["kind"], "removed");
        assert!(value["workspace"].get("clone_url").is_none());
    }

    #[test]
    fn test_lockfiles() {
        for path in [
            "Cargo.lock",
            "web/yarn.lock",
            "package-lock.json",
            "go.sum",
            "go.mod",
            "assets/.DS_Store",
        ] {
            assert!(is_lockfile(path), "{path}");
        }
        assert!(!is_lockfile("src/lock.rs"));
        assert!(!is_lockfile("docs/go.model"));
    }
}
