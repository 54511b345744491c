use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::command::{GitExecutor, GitInvocation, DEFAULT_COMMAND_TIMEOUT};
use crate::error::GitError;
use crate::language::{detect_language, UNKNOWN_LANGUAGE};
use crate::parser::{parse_unified_diff, ChangeType, FileDiff, GitChangeSet, TextSource};
use crate::validation::{is_valid_path, normalize_path, split_commit_range};

/// Which changes to collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffMode {
    /// Staged and unstaged changes against `HEAD`
    WorkingTree,
    /// Committed changes between two revisions
    Range { base: String, head: String },
}

impl DiffMode {
    /// Build a mode from an optional commit range, validating it.
    pub fn from_commits(commits: Option<&str>) -> Result<Self, GitError> {
        match commits {
            None => Ok(DiffMode::WorkingTree),
            Some(range) => {
                let (base, head) = split_commit_range(range).ok_or_else(|| {
                    GitError::InvalidReference(format!("Invalid commit range: {}", range))
                })?;
                Ok(DiffMode::Range {
                    base: base.to_string(),
                    head: head.to_string(),
                })
            }
        }
    }

    /// Revision the original side of a snapshot is read from.
    fn base_revision(&self) -> &str {
        match self {
            DiffMode::WorkingTree => "HEAD",
            DiffMode::Range { base, .. } => base,
        }
    }
}

/// Validate a path filter and convert it to git's separator.
pub fn normalize_path_filter(path: &str) -> Result<String, GitError> {
    if !is_valid_path(path) {
        return Err(GitError::InvalidReference(format!(
            "Invalid path filter: {}",
            path
        )));
    }
    Ok(normalize_path(path))
}

/// Retrieves diffs and file snapshots from a checked-out repository.
pub struct DiffRetriever {
    executor: Arc<dyn GitExecutor>,
    timeout: Duration,
}

impl DiffRetriever {
    pub fn new(executor: Arc<dyn GitExecutor>) -> Self {
        Self {
            executor,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Timeout for each local git command (diff, show, rev-parse).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn invocation<I, S>(&self, args: I, repo: &Path) -> GitInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GitInvocation::new(args, repo).with_timeout(self.timeout)
    }

    /// Check whether `dir` is inside a git work tree.
    pub async fn is_repository(&self, dir: &Path) -> Result<bool, GitError> {
        let inv = self.invocation(["rev-parse", "--is-inside-work-tree"], dir);
        let output = self.executor.run(&inv).await?;
        Ok(output.success() && output.stdout.trim() == "true")
    }

    /// Whether `HEAD` points at a commit yet.
    pub async fn has_head(&self, repo: &Path) -> Result<bool, GitError> {
        let inv = self.invocation(["rev-parse", "--verify", "--quiet", "HEAD^{commit}"], repo);
        Ok(self.executor.run(&inv).await?.success())
    }

    /// The work tree root containing `dir`, and `dir`'s path inside it
    /// (empty at the root, otherwise ending in `/`).
    pub async fn work_tree(&self, dir: &Path) -> Result<(PathBuf, String), GitError> {
        let inv = self.invocation(["rev-parse", "--show-toplevel", "--show-prefix"], dir);
        let output = self.executor.run_checked(&inv).await?;

        let mut lines = output.stdout.lines();
        let root = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| {
                GitError::InvalidReference(format!("Not inside a work tree: {}", dir.display()))
            })?;
        let prefix = lines.next().unwrap_or_default().trim().to_string();
        Ok((PathBuf::from(root), prefix))
    }

    /// Collect, parse and snapshot the changes selected by `commits` and `path`.
    ///
    /// `repo` may be any directory inside the work tree. A path filter is
    /// relative to `repo`; reported paths are relative to the work tree root.
    /// Inputs are validated before any git process is started.
    pub async fn retrieve(
        &self,
        repo: &Path,
        commits: Option<&str>,
        path: Option<&str>,
    ) -> Result<GitChangeSet, GitError> {
        let mode = DiffMode::from_commits(commits)?;
        let path = path.map(normalize_path_filter).transpose()?;

        // git prints paths relative to the root, so diff and read from there
        let (root, prefix) = self.work_tree(repo).await?;
        if !prefix.is_empty() {
            debug!(root = %root.display(), prefix = %prefix, "Workspace is inside the work tree");
        }
        let path = path.map(|p| format!("{}{}", prefix, p));
        let repo = root.as_path();

        let raw = self.raw_diff(repo, &mode, path.as_deref()).await?;
        let mut change_set = parse_unified_diff(&raw);

        debug!(
            files = change_set.files.len(),
            warnings = change_set.warnings.len(),
            diff_len = raw.len(),
            "Parsed git diff"
        );

        for file in &mut change_set.files {
            self.attach_snapshots(repo, &mode, file).await;
        }

        Ok(change_set)
    }

    /// Run `git diff` for the given mode and return its raw output.
    pub async fn raw_diff(
        &self,
        repo: &Path,
        mode: &DiffMode,
        path: Option<&str>,
    ) -> Result<String, GitError> {
        let mut args: Vec<String> = [
            "diff",
            "--no-color",
            "--no-ext-diff",
            "-M",
            "--src-prefix=a/",
            "--dst-prefix=b/",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        match mode {
            DiffMode::Range { base, head } => args.push(format!("{}..{}", base, head)),
            DiffMode::WorkingTree => {
                if self.has_head(repo).await? {
                    args.push("HEAD".to_string());
                } else {
                    info!(repo = %repo.display(), "No commits yet, diffing the index");
                    args.push("--cached".to_string());
                }
            }
        }

        if let Some(path) = path {
            args.push("--".to_string());
            args.push(path.to_string());
        }

        let inv = self.invocation(args, repo);
        let output = self.executor.run_checked(&inv).await?;
        Ok(output.stdout)
    }

    /// Replace hunk reconstructions with full file contents where possible.
    async fn attach_snapshots(&self, repo: &Path, mode: &DiffMode, file: &mut FileDiff) {
        if file.is_binary {
            return;
        }

        let original = match file.change_type {
            ChangeType::Added => Some(String::new()),
            _ => {
                self.show(repo, mode.base_revision(), file.original_path())
                    .await
            }
        };

        let modified = match (file.change_type, mode) {
            (ChangeType::Deleted, _) => Some(String::new()),
            (_, DiffMode::Range { head, .. }) => self.show(repo, head, &file.path).await,
            (_, DiffMode::WorkingTree) => read_working_file(repo, &file.path).await,
        };

        match (original, modified) {
            (Some(original), Some(modified)) => {
                file.original_text = original;
                file.modified_text = modified;
                file.text_source = TextSource::Snapshot;
            }
            _ => debug!(path = %file.path, "Snapshot unavailable, keeping hunk reconstruction"),
        }

        if file.detected_language == UNKNOWN_LANGUAGE {
            let sample = if file.modified_text.is_empty() {
                &file.original_text
            } else {
                &file.modified_text
            };
            file.detected_language = detect_language(&file.path, Some(sample)).to_string();
        }
    }

    async fn show(&self, repo: &Path, revision: &str, path: &str) -> Option<String> {
        let inv = self.invocation(["show".to_string(), format!("{}:{}", revision, path)], repo);
        match self.executor.run_checked(&inv).await {
            Ok(output) => Some(output.stdout),
            Err(e) => {
                debug!(revision, path, error = %e, "git show failed");
                None
            }
        }
    }
}

async fn read_working_file(repo: &Path, path: &str) -> Option<String> {
    match tokio::fs::read(repo.join(path)).await {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            debug!(path, error = %e, "Failed to read working tree file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::GitOutput;
    use crate::error::CommandError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers by subcommand and records every invocation.
    struct ScriptedGit {
        has_head: bool,
        diff: String,
        /// What `rev-parse --show-prefix` reports
        prefix: String,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedGit {
        fn new(has_head: bool, diff: &str) -> Self {
            Self {
                has_head,
                diff: diff.to_string(),
                prefix: String::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn in_subdirectory(mut self, prefix: &str) -> Self {
            self.prefix = prefix.to_string();
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GitExecutor for ScriptedGit {
        async fn run(&self, invocation: &GitInvocation) -> Result<GitOutput, CommandError> {
            self.calls.lock().unwrap().push(invocation.args.clone());
            let ok = |out: &str| -> Result<GitOutput, CommandError> {
                Ok(GitOutput::new(out.to_string(), String::new(), 0, Duration::ZERO))
            };
            match invocation.subcommand() {
                Some("rev-parse") if invocation.args.iter().any(|a| a == "--show-toplevel") => {
                    ok(&format!("{}\n{}\n", invocation.working_dir.display(), self.prefix))
                }
                Some("rev-parse") if self.has_head => ok("abc123\n"),
                Some("rev-parse") => Ok(GitOutput::new(String::new(), String::new(), 1, Duration::ZERO)),
                Some("diff") => ok(&self.diff),
                Some("show") => {
                    let object = &invocation.args[1];
                    if object.starts_with("HEAD~1:") {
                        ok("old\n")
                    } else {
                        ok("new\n")
                    }
                }
                _ => ok(""),
            }
        }
    }

    const DIFF: &str = "\
diff --git a/a.txt b/a.txt
--- a/a.txt
+++ b/a.txt
@@ -1 +1 @@
-old
+new
";

    #[test]
    fn test_mode_from_commits() {
        assert_eq!(DiffMode::from_commits(None).unwrap(), DiffMode::WorkingTree);
        assert_eq!(
            DiffMode::from_commits(Some("HEAD~1..HEAD")).unwrap(),
            DiffMode::Range {
                base: "HEAD~1".into(),
                head: "HEAD".into()
            }
        );
        assert!(DiffMode::from_commits(Some("HEAD; ls")).is_err());
    }

    #[test]
    fn test_path_filter_normalized() {
        assert_eq!(normalize_path_filter("src\\lib.rs").unwrap(), "src/lib.rs");
        assert!(normalize_path_filter("../secret").is_err());
    }

    #[tokio::test]
    async fn test_invalid_inputs_spawn_nothing() {
        let git = Arc::new(ScriptedGit::new(true, DIFF));
        let retriever = DiffRetriever::new(git.clone());

        let err = retriever
            .retrieve(Path::new("/repo"), Some("HEAD~1..HEAD; rm -rf /"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidReference(_)));

        let err = retriever
            .retrieve(Path::new("/repo"), None, Some("../../etc/passwd"))
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::InvalidReference(_)));

        assert!(git.calls().is_empty());
    }

    #[tokio::test]
    async fn test_range_diff_uses_object_store_snapshots() {
        let git = Arc::new(ScriptedGit::new(true, DIFF));
        let retriever = DiffRetriever::new(git.clone());

        let set = retriever
            .retrieve(Path::new("/repo"), Some("HEAD~1..HEAD"), Some("a.txt"))
            .await
            .unwrap();

        let file = &set.files[0];
        assert_eq!(file.original_text, "old\n");
        assert_eq!(file.modified_text, "new\n");
        assert_eq!(file.text_source, TextSource::Snapshot);

        let calls = git.calls();
        let diff_call = calls.iter().find(|c| c[0] == "diff").unwrap();
        assert!(diff_call.contains(&"HEAD~1..HEAD".to_string()));
        assert_eq!(&diff_call[diff_call.len() - 2..], &["--", "a.txt"]);
        assert!(calls.iter().any(|c| c == &["show", "HEAD~1:a.txt"]));
        assert!(calls.iter().any(|c| c == &["show", "HEAD:a.txt"]));
    }

    #[tokio::test]
    async fn test_unborn_head_diffs_index() {
        let git = Arc::new(ScriptedGit::new(false, ""));
        let retriever = DiffRetriever::new(git.clone());

        let set = retriever
            .retrieve(Path::new("/repo"), None, None)
            .await
            .unwrap();
        assert!(set.is_empty());

        let calls = git.calls();
        let diff_call = calls.iter().find(|c| c[0] == "diff").unwrap();
        assert!(diff_call.contains(&"--cached".to_string()));
        assert!(!diff_call.contains(&"HEAD".to_string()));
    }

    #[tokio::test]
    async fn test_missing_working_file_keeps_reconstruction() {
        let git = Arc::new(ScriptedGit::new(true, DIFF));
        let retriever = DiffRetriever::new(git);

        let set = retriever
            .retrieve(Path::new("/definitely/not/here"), None, None)
            .await
            .unwrap();

        let file = &set.files[0];
        assert_eq!(file.text_source, TextSource::HunkContext);
        assert_eq!(file.original_text, "old\n");
        assert_eq!(file.modified_text, "new\n");
    }

    #[tokio::test]
    async fn test_path_filter_scoped_to_subdirectory() {
        let git = Arc::new(ScriptedGit::new(true, DIFF).in_subdirectory("sub/"));
        let retriever = DiffRetriever::new(git.clone());

        retriever
            .retrieve(Path::new("/repo"), Some("HEAD~1..HEAD"), Some("a.txt"))
            .await
            .unwrap();

        let calls = git.calls();
        let diff_call = calls.iter().find(|c| c[0] == "diff").unwrap();
        assert_eq!(&diff_call[diff_call.len() - 2..], &["--", "sub/a.txt"]);
    }
}
