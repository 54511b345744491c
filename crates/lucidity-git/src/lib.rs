//! # lucidity-git
//!
//! Git plumbing for lucidity: turning a workspace reference into changes.
//!
//! ## Overview
//!
//! Everything here drives the `git` command-line tool; no library bindings
//! are used. The crate covers:
//! - Parsing workspace references (local paths, SSH, HTTPS, `owner/repo`)
//! - Validating branches, commit ranges and path filters
//! - Running git with timeouts and process-group cleanup
//! - Parsing unified diffs into per-file records
//! - Reading full file snapshots for each changed file
//!
//! ## Key Types
//!
//! - [`WorkspaceReference`] - Parsed local or remote workspace
//! - [`GitExecutor`] - Seam for running git; [`GitCommandRunner`] is the real one
//! - [`DiffRetriever`] - Runs `git diff` and attaches snapshots
//! - [`GitChangeSet`] / [`FileDiff`] / [`Hunk`] - Parsed diff output
//! - [`DiffSummary`] - Files changed, insertions, deletions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lucidity_git::{DiffRetriever, GitCommandRunner};
//! use std::{path::Path, sync::Arc};
//!
//! let retriever = DiffRetriever::new(Arc::new(GitCommandRunner::new()));
//! let changes = retriever
//!     .retrieve(Path::new("."), Some("HEAD~1..HEAD"), None)
//!     .await?;
//!
//! for file in &changes.files {
//!     println!("{} {} ({})", file.change_type, file.path, file.detected_language);
//! }
//! ```

mod command;
mod diff;
mod error;
mod language;
mod parser;
mod reference;
mod summary;
pub mod validation;

pub use command::{
    redact_arg, GitCommandRunner, GitExecutor, GitInvocation, GitOutput,
    DEFAULT_COMMAND_TIMEOUT, NO_VERIFY_SSH_COMMAND,
};
pub use diff::{normalize_path_filter, DiffMode, DiffRetriever};
pub use error::{CommandError, GitError};
pub use language::{detect_language, UNKNOWN_LANGUAGE};
pub use parser::{
    parse_unified_diff, reconstruct_from_hunks, unquote, ChangeType, DiffLine, FileDiff,
    GitChangeSet, Hunk, LineKind, ParseWarning, TextSource,
};
pub use reference::{
    parse_reference, resolve_reference, ReferenceKind, RemoteRepository, WorkspaceReference,
};
pub use summary::DiffSummary;
