use std::time::Duration;
use thiserror::Error;

/// Failure of a single git process invocation.
///
/// `command` strings are rendered with URL credentials redacted.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("git command timed out after {timeout:?}: {command}")]
    Timeout { command: String, timeout: Duration },

    #[error("git command exited with code {code}: {command}: {}", .stderr.trim())]
    NonZeroExit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("git executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("refusing to pass unsafe argument to git: {0:?}")]
    InvalidArgument(String),

    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

impl CommandError {
    /// Captured stderr, when the process got far enough to produce any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            CommandError::NonZeroExit { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}

/// Errors from reference parsing and diff retrieval.
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
