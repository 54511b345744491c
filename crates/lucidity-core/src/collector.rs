use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use lucidity_cache::RepositoryCache;
use lucidity_git::{
    normalize_path_filter, redact_arg, resolve_reference, DiffMode, DiffRetriever, GitExecutor,
    WorkspaceReference,
};

use crate::config::LucidityConfig;
use crate::error::LucidityError;
use crate::record::{ChangeRecord, WorkspaceMetadata, WorkspaceSource};

/// What to collect: a workspace reference plus optional filters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeRequest {
    pub workspace: String,
    /// Restrict the diff to one repository-relative path
    pub path: Option<String>,
    /// `<rev>..<rev>`; the working tree against `HEAD` when absent
    pub commits: Option<String>,
}

impl ChangeRequest {
    pub fn new(workspace: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into()).filter(|p: &String| !p.trim().is_empty());
        self
    }

    pub fn with_commits(mut self, commits: impl Into<String>) -> Self {
        self.commits = Some(commits.into()).filter(|c: &String| !c.trim().is_empty());
        self
    }
}

/// Turns a [`ChangeRequest`] into a [`ChangeRecord`].
///
/// Remote workspaces go through the repository cache; the slot stays locked
/// until the diff and all snapshots have been read.
pub struct ChangeCollector {
    executor: Arc<dyn GitExecutor>,
    cache: Arc<RepositoryCache>,
    command_timeout: Duration,
}

impl ChangeCollector {
    pub fn new(executor: Arc<dyn GitExecutor>, cache: Arc<RepositoryCache>) -> Self {
        Self {
            executor,
            cache,
            command_timeout: lucidity_git::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn from_config(config: &LucidityConfig) -> Self {
        Self::new(
            Arc::new(config.runner()),
            Arc::new(config.repository_cache()),
        )
        .with_command_timeout(config.command_timeout)
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    fn retriever(&self) -> DiffRetriever {
        DiffRetriever::new(self.executor.clone()).with_timeout(self.command_timeout)
    }

    /// Resolve the request's workspace and collect its changes.
    pub async fn collect(&self, request: &ChangeRequest) -> Result<ChangeRecord, LucidityError> {
        validate_filters(request)?;
        let reference = resolve_reference(&request.workspace)?;
        self.collect_reference(reference, request).await
    }

    /// Collect changes for an already-resolved reference.
    pub async fn collect_reference(
        &self,
        reference: WorkspaceReference,
        request: &ChangeRequest,
    ) -> Result<ChangeRecord, LucidityError> {
        validate_filters(request)?;
        let path_filter = request
            .path
            .as_deref()
            .map(normalize_path_filter)
            .transpose()?;
        let retriever = self.retriever();

        let record = match reference {
            WorkspaceReference::Local { path } => {
                let dir = self.local_repository(&retriever, &path).await?;
                let change_set = retriever
                    .retrieve(&dir, request.commits.as_deref(), path_filter.as_deref())
                    .await?;

                let workspace = WorkspaceMetadata {
                    reference: request.workspace.clone(),
                    kind: lucidity_git::ReferenceKind::Local,
                    resolved_path: dir,
                    clone_url: None,
                    cache_key: None,
                    branch: None,
                    commit_range: request.commits.clone(),
                    path_filter,
                    source: WorkspaceSource::Local,
                };
                ChangeRecord::assemble(change_set, workspace)
            }
            WorkspaceReference::Remote(remote) => {
                let slot = self.cache.acquire(&remote).await?;
                let change_set = retriever
                    .retrieve(&slot.path, request.commits.as_deref(), path_filter.as_deref())
                    .await?;

                let workspace = WorkspaceMetadata {
                    reference: request.workspace.clone(),
                    kind: lucidity_git::ReferenceKind::Remote,
                    resolved_path: slot.path.clone(),
                    clone_url: Some(redact_arg(&remote.clone_url)),
                    cache_key: Some(slot.cache_key.clone()),
                    branch: slot.branch.clone(),
                    commit_range: request.commits.clone(),
                    path_filter,
                    source: slot.operation.into(),
                };
                drop(slot);
                ChangeRecord::assemble(change_set, workspace)
            }
        };

        info!(
            workspace = %record.workspace.resolved_path.display(),
            files = record.files.len(),
            warnings = record.warnings.len(),
            "Collected changes"
        );
        Ok(record)
    }

    async fn local_repository(
        &self,
        retriever: &DiffRetriever,
        path: &Path,
    ) -> Result<PathBuf, LucidityError> {
        let dir = expand_home(path);
        if !dir.is_dir() {
            return Err(LucidityError::InvalidReference(format!(
                "Workspace directory does not exist: {}",
                dir.display()
            )));
        }
        if !retriever.is_repository(&dir).await? {
            return Err(LucidityError::InvalidReference(format!(
                "Not a git repository: {}. For a remote repository pass a URL such as \
                 git@github.com:owner/repo.git, https://github.com/owner/repo or owner/repo",
                dir.display()
            )));
        }
        debug!(path = %dir.display(), "Using local repository");
        Ok(dir)
    }
}

/// Reject unsafe ranges and paths before anything touches git or the disk.
fn validate_filters(request: &ChangeRequest) -> Result<(), LucidityError> {
    DiffMode::from_commits(request.commits.as_deref())?;
    if let Some(path) = &request.path {
        normalize_path_filter(path)?;
    }
    Ok(())
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
