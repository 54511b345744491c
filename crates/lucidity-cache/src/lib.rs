//! # lucidity-cache
//!
//! Durable cache of cloned remote repositories.
//!
//! Each remote repository gets one slot directory under the cache root,
//! named by a key derived from its canonical URL. Slots are cloned on first
//! use and fetched on every later use. A `lucidity-last-accessed` marker
//! inside the slot's `.git` directory records when it was last used so that
//! [`RepositoryCache::sweep`] can evict idle slots across process restarts.
//!
//! ## Concurrency
//!
//! One async lock per cache key. [`RepositoryCache::acquire`] returns a
//! [`SlotGuard`] that holds the lock until dropped, so a request can run its
//! diff against the slot without another request fetching underneath it.
//! The sweep only ever `try_lock`s and skips slots that are in use.
//!
//! ```rust,ignore
//! let cache = RepositoryCache::new("/var/cache/lucidity", Arc::new(GitCommandRunner::new()));
//! let slot = cache.acquire(&remote).await?;
//! println!("{} ready at {}", slot.cache_key, slot.path.display());
//! drop(slot);
//!
//! let report = cache.sweep(Duration::from_secs(7 * 86_400), false)?;
//! ```

mod error;
mod manager;
mod slot;
mod sweep;

pub use error::CacheError;
pub use manager::{CacheTimeouts, RepositoryCache, SlotGuard};
pub use slot::{
    cache_key, marker_path, read_last_accessed, write_marker, CacheSlot, SlotOperation,
    MARKER_FILE,
};
pub use sweep::{SweepReport, SweptSlot};
