use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::CacheError;
use crate::manager::{RepositoryCache, STAGING_PREFIX};
use crate::slot::read_last_accessed;

/// A slot the sweep removed (or would remove, in a dry run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweptSlot {
    pub cache_key: String,
    pub path: PathBuf,
    pub last_accessed: DateTime<Utc>,
    pub idle_secs: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cache_dir: PathBuf,
    /// Slot directories examined
    pub scanned: usize,
    pub removed: Vec<SweptSlot>,
    /// Staging directories left behind by interrupted clones
    pub stale_staging: Vec<PathBuf>,
    /// Slots held by an in-flight request and left alone
    pub skipped_locked: usize,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

impl SweepReport {
    fn empty(cache_dir: &Path, dry_run: bool) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            scanned: 0,
            removed: Vec::new(),
            stale_staging: Vec::new(),
            skipped_locked: 0,
            freed_bytes: 0,
            dry_run,
        }
    }
}

impl RepositoryCache {
    /// Remove slots idle for at least `max_idle`.
    ///
    /// Slots whose lock is held are skipped, never waited on. Staging
    /// directories older than the clone timeout cannot belong to a running
    /// clone and are removed as well. A dry run reports the same candidates
    /// without deleting anything.
    pub fn sweep(&self, max_idle: Duration, dry_run: bool) -> Result<SweepReport, CacheError> {
        let root = self.root();
        let mut report = SweepReport::empty(root, dry_run);

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(cache_dir = %root.display(), "Cache directory does not exist");
                return Ok(report);
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let staging_max_age = self.timeouts().clone;

        for dir_entry in entries {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let is_dir = dir_entry.file_type()?.is_dir();
            if is_dir && name.starts_with(STAGING_PREFIX) {
                self.reap_staging(&dir_entry.path(), staging_max_age, &mut report)?;
                continue;
            }
            if name.starts_with('.') || !is_dir {
                continue;
            }
            report.scanned += 1;

            let entry = self.entry(&name);
            let Ok(mut state) = entry.lock.clone().try_lock_owned() else {
                debug!(cache_key = %name, "Slot in use, skipping");
                report.skipped_locked += 1;
                continue;
            };

            let path = dir_entry.path();
            let Some(last_accessed) = read_last_accessed(&path) else {
                warn!(path = %path.display(), "Cannot determine slot age, skipping");
                continue;
            };

            let idle = (now - last_accessed).to_std().unwrap_or(Duration::ZERO);
            if idle < max_idle {
                continue;
            }

            let size_bytes = dir_size(&path);
            if !dry_run {
                fs::remove_dir_all(&path)?;
                state.last = None;
            }

            info!(
                cache_key = %name,
                idle_secs = idle.as_secs(),
                size_bytes,
                dry_run,
                "Swept cache slot"
            );

            report.freed_bytes += size_bytes;
            report.removed.push(SweptSlot {
                cache_key: name,
                path,
                last_accessed,
                idle_secs: idle.as_secs(),
                size_bytes,
            });
        }

        Ok(report)
    }

    /// Remove every slot not currently in use, plus stale staging directories.
    pub fn clear(&self) -> Result<SweepReport, CacheError> {
        self.sweep(Duration::ZERO, false)
    }

    fn reap_staging(
        &self,
        path: &Path,
        max_age: Duration,
        report: &mut SweepReport,
    ) -> Result<(), CacheError> {
        let age = fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age <= max_age {
            debug!(path = %path.display(), "Staging directory may be in use, keeping");
            return Ok(());
        }

        let size_bytes = dir_size(path);
        if !report.dry_run {
            fs::remove_dir_all(path)?;
        }
        info!(
            path = %path.display(),
            age_secs = age.as_secs(),
            size_bytes,
            dry_run = report.dry_run,
            "Removed stale staging directory"
        );
        report.freed_bytes += size_bytes;
        report.stale_staging.push(path.to_path_buf());
        Ok(())
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}
