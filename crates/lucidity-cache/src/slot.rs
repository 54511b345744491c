//! Cache slot identity and the on-disk last-accessed marker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lucidity_git::RemoteRepository;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Marker file name, kept inside `.git` so it never shows up in diffs.
pub const MARKER_FILE: &str = "lucidity-last-accessed";

/// Hex characters of the URL hash used in a cache key.
const KEY_HASH_LEN: usize = 16;

/// What `acquire` had to do to make the slot current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOperation {
    Cloned,
    Fetched,
    /// Another caller refreshed the slot while this one waited for the lock
    Reused,
}

/// A cloned repository in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSlot {
    pub cache_key: String,
    pub path: PathBuf,
    pub last_accessed: DateTime<Utc>,
    /// Canonical URL the key was derived from
    pub remote_url: String,
    /// Branch checked out, when one was resolved
    pub branch: Option<String>,
    pub operation: SlotOperation,
}

/// Deterministic cache key for a remote: `<name>-<hash of canonical url>`.
///
/// The branch is not part of the key; branches are checked out in place.
pub fn cache_key(remote: &RemoteRepository) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote.canonical_url().as_bytes());
    let hash = hex::encode(hasher.finalize());

    let name: String = remote
        .name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let name = name.trim_matches('-');

    if name.is_empty() {
        hash[..KEY_HASH_LEN].to_string()
    } else {
        format!("{}-{}", name, &hash[..KEY_HASH_LEN])
    }
}

pub fn marker_path(slot_dir: &Path) -> PathBuf {
    slot_dir.join(".git").join(MARKER_FILE)
}

/// Whether `slot_dir` holds a clone (as opposed to leftovers).
pub fn is_cloned(slot_dir: &Path) -> bool {
    slot_dir.join(".git").is_dir()
}

/// Record `at` as the slot's last access. The marker is replaced atomically.
pub fn write_marker(slot_dir: &Path, at: DateTime<Utc>) -> io::Result<()> {
    let path = marker_path(slot_dir);
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, at.to_rfc3339())?;
    fs::rename(&tmp, &path)
}

/// Read the last-accessed time, falling back to the directory mtime when the
/// marker is missing or unreadable.
pub fn read_last_accessed(slot_dir: &Path) -> Option<DateTime<Utc>> {
    let path = marker_path(slot_dir);
    match fs::read_to_string(&path) {
        Ok(raw) => match DateTime::parse_from_rfc3339(raw.trim()) {
            Ok(ts) => return Some(ts.with_timezone(&Utc)),
            Err(e) => warn!(path = %path.display(), error = %e, "Unreadable last-accessed marker"),
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to read last-accessed marker"),
    }

    fs::metadata(slot_dir)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
