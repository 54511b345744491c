use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use lucidity_git::validation::is_valid_branch_name;
use lucidity_git::{CommandError, GitExecutor, GitInvocation, RemoteRepository};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::CacheError;
use crate::slot::{cache_key, is_cloned, write_marker, CacheSlot, SlotOperation};

/// Prefix of the hidden directories clones are staged in.
pub(crate) const STAGING_PREFIX: &str = ".staging-";

/// Timeouts for the git commands the cache runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTimeouts {
    pub clone: Duration,
    pub fetch: Duration,
    /// rev-parse, symbolic-ref, checkout
    pub command: Duration,
}

impl Default for CacheTimeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(300),
            fetch: Duration::from_secs(60),
            command: lucidity_git::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Per-key metadata, guarded by the key's lock.
#[derive(Debug, Default)]
pub(crate) struct SlotState {
    pub(crate) last: Option<CacheSlot>,
}

#[derive(Debug, Default)]
pub(crate) struct SlotEntry {
    pub(crate) lock: Arc<AsyncMutex<SlotState>>,
    /// Bumped after every completed clone or fetch
    refreshed: AtomicU64,
}

/// Exclusive access to a cache slot.
///
/// The key's lock is held until the guard is dropped, so nothing else can
/// fetch, check out or sweep the slot while the caller reads from it.
#[derive(Debug)]
pub struct SlotGuard {
    slot: CacheSlot,
    _lock: OwnedMutexGuard<SlotState>,
}

impl Deref for SlotGuard {
    type Target = CacheSlot;

    fn deref(&self) -> &CacheSlot {
        &self.slot
    }
}

/// Cache of cloned remote repositories under one root directory.
///
/// Each remote maps to `<root>/<cache key>`. All git work on a slot happens
/// under that key's lock; different keys never wait on each other.
pub struct RepositoryCache {
    root: PathBuf,
    executor: Arc<dyn GitExecutor>,
    timeouts: CacheTimeouts,
    pub(crate) slots: Mutex<HashMap<String, Arc<SlotEntry>>>,
}

impl RepositoryCache {
    pub fn new(root: impl Into<PathBuf>, executor: Arc<dyn GitExecutor>) -> Self {
        Self {
            root: root.into(),
            executor,
            timeouts: CacheTimeouts::default(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: CacheTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeouts(&self) -> CacheTimeouts {
        self.timeouts
    }

    /// Metadata from the last successful `acquire` of `key`, if the slot is
    /// not locked right now.
    pub fn last_known(&self, key: &str) -> Option<CacheSlot> {
        let entry = self.entry(key);
        let state = entry.lock.try_lock().ok()?;
        state.last.clone()
    }

    pub(crate) fn entry(&self, key: &str) -> Arc<SlotEntry> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(key.to_string()).or_default().clone()
    }

    /// Make the remote's slot current and lock it.
    ///
    /// Clones on first use and fetches afterwards, then checks out the
    /// requested branch (or the remote default). A caller that waited while
    /// another one refreshed the same key reuses that refresh instead of
    /// fetching again.
    pub async fn acquire(&self, remote: &RemoteRepository) -> Result<SlotGuard, CacheError> {
        if let Some(branch) = &remote.branch {
            if !is_valid_branch_name(branch) {
                return Err(CacheError::InvalidReference(format!(
                    "Invalid branch name: {}",
                    branch
                )));
            }
        }

        let key = cache_key(remote);
        let slot_dir = self.root.join(&key);
        let entry = self.entry(&key);

        let seen = entry.refreshed.load(Ordering::SeqCst);
        let mut state = entry.lock.clone().lock_owned().await;
        debug!(cache_key = %key, "Acquired cache slot lock");

        tokio::fs::create_dir_all(&self.root).await?;

        let operation = if !is_cloned(&slot_dir) {
            if tokio::fs::metadata(&slot_dir).await.is_ok() {
                warn!(path = %slot_dir.display(), "Removing incomplete cache slot");
                tokio::fs::remove_dir_all(&slot_dir).await?;
            }
            self.clone_into(remote, &slot_dir).await?;
            SlotOperation::Cloned
        } else if entry.refreshed.load(Ordering::SeqCst) != seen {
            debug!(cache_key = %key, "Slot refreshed while waiting, skipping fetch");
            SlotOperation::Reused
        } else {
            self.fetch(remote, &slot_dir).await?;
            SlotOperation::Fetched
        };

        if operation != SlotOperation::Reused {
            entry.refreshed.fetch_add(1, Ordering::SeqCst);
        }

        let branch = self.checkout(remote, &slot_dir).await?;

        let now = Utc::now();
        if let Err(e) = write_marker(&slot_dir, now) {
            warn!(path = %slot_dir.display(), error = %e, "Failed to write last-accessed marker");
        }

        let slot = CacheSlot {
            cache_key: key,
            path: slot_dir,
            last_accessed: now,
            remote_url: remote.canonical_url(),
            branch,
            operation,
        };
        state.last = Some(slot.clone());

        info!(
            cache_key = %slot.cache_key,
            operation = ?slot.operation,
            branch = ?slot.branch,
            "Cache slot ready"
        );

        Ok(SlotGuard { slot, _lock: state })
    }

    async fn clone_into(&self, remote: &RemoteRepository, slot_dir: &Path) -> Result<(), CacheError> {
        let staging = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        info!(
            url = %lucidity_git::redact_arg(&remote.clone_url),
            path = %slot_dir.display(),
            "Cloning repository"
        );

        let inv = GitInvocation::new(
            [
                "clone".to_string(),
                "--quiet".to_string(),
                "--".to_string(),
                remote.clone_url.clone(),
                staging.display().to_string(),
            ],
            &self.root,
        )
        .with_timeout(self.timeouts.clone)
        .with_network();

        let result = match self.executor.run_checked(&inv).await {
            Ok(_) => tokio::fs::rename(&staging, slot_dir)
                .await
                .map_err(CacheError::from),
            Err(e) => Err(CacheError::from_network(&remote.canonical_url(), "clone", e)),
        };

        if result.is_err() {
            remove_if_present(&staging).await;
        }
        result
    }

    async fn fetch(&self, remote: &RemoteRepository, slot_dir: &Path) -> Result<(), CacheError> {
        info!(path = %slot_dir.display(), "Fetching repository");
        let inv = GitInvocation::new(["fetch", "--quiet", "--prune", "origin"], slot_dir)
            .with_timeout(self.timeouts.fetch)
            .with_network();

        self.executor
            .run_checked(&inv)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::from_network(&remote.canonical_url(), "fetch", e))
    }

    fn local(&self, args: &[&str], slot_dir: &Path) -> GitInvocation {
        GitInvocation::new(args.iter().copied(), slot_dir).with_timeout(self.timeouts.command)
    }

    /// Check out the requested branch, or the remote default. Returns the
    /// branch now checked out, if known.
    async fn checkout(
        &self,
        remote: &RemoteRepository,
        slot_dir: &Path,
    ) -> Result<Option<String>, CacheError> {
        let branch = match &remote.branch {
            Some(branch) => branch.clone(),
            None => match self.default_branch(slot_dir).await? {
                Some(branch) => branch,
                None => {
                    warn!(path = %slot_dir.display(), "Remote has no default branch, keeping current checkout");
                    return Ok(None);
                }
            },
        };

        let remote_ref = format!("refs/remotes/origin/{}", branch);
        let verify = format!("{}^{{commit}}", remote_ref);
        let exists = self
            .executor
            .run(&self.local(&["rev-parse", "--verify", "--quiet", verify.as_str()], slot_dir))
            .await?
            .success();
        if !exists {
            return Err(CacheError::InvalidReference(format!(
                "Branch '{}' not found in {}",
                branch,
                remote.slug()
            )));
        }

        self.executor
            .run_checked(&self.local(
                &[
                    "checkout",
                    "--quiet",
                    "--force",
                    "-B",
                    branch.as_str(),
                    remote_ref.as_str(),
                ],
                slot_dir,
            ))
            .await?;

        Ok(Some(branch))
    }

    async fn default_branch(&self, slot_dir: &Path) -> Result<Option<String>, CommandError> {
        let output = self
            .executor
            .run(&self.local(
                &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
                slot_dir,
            ))
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let name = output.stdout.trim();
        Ok(name
            .strip_prefix("origin/")
            .filter(|b| is_valid_branch_name(b))
            .map(String::from))
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed staging directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging directory"),
    }
}
