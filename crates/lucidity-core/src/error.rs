use lucidity_cache::CacheError;
use lucidity_git::{CommandError, GitError};
use serde::Serialize;
use thiserror::Error;

/// Every failure a request can end in.
#[derive(Error, Debug)]
pub enum LucidityError {
    /// Malformed or unsafe workspace, branch, range or path input. Never
    /// reaches a subprocess.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Clone or fetch failed, timed out, or the remote was unreachable.
    #[error("Repository unavailable: {url}: {reason}")]
    RepositoryUnavailable {
        url: String,
        reason: String,
        stderr: String,
    },

    /// git failed for any other reason.
    #[error("Command failed: {command}: {}", .stderr.trim())]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Serializable form of an error for callers on the other side of a
/// process or protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

impl LucidityError {
    /// Stable snake_case name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            LucidityError::InvalidReference(_) => "invalid_reference",
            LucidityError::RepositoryUnavailable { .. } => "repository_unavailable",
            LucidityError::CommandFailed { .. } => "command_failed",
            LucidityError::Io(_) => "io",
            LucidityError::Config(_) => "config",
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            LucidityError::RepositoryUnavailable { stderr, .. }
            | LucidityError::CommandFailed { stderr, .. } => {
                Some(stderr.as_str()).filter(|s| !s.trim().is_empty())
            }
            _ => None,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            stderr: self.stderr().map(|s| s.trim().to_string()),
        }
    }
}

impl From<CommandError> for LucidityError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidArgument(arg) => LucidityError::InvalidReference(format!(
                "Unsafe argument rejected: {}",
                arg
            )),
            CommandError::NonZeroExit {
                command,
                code,
                stderr,
            } => LucidityError::CommandFailed {
                command,
                code: Some(code),
                stderr,
            },
            CommandError::Timeout { command, timeout } => LucidityError::CommandFailed {
                command,
                code: None,
                stderr: format!("timed out after {:?}", timeout),
            },
            CommandError::ExecutableNotFound(binary) => LucidityError::CommandFailed {
                command: binary.clone(),
                code: None,
                stderr: format!("git executable not found: {}", binary),
            },
            CommandError::Spawn(e) => LucidityError::Io(e),
        }
    }
}

impl From<GitError> for LucidityError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::InvalidReference(msg) => LucidityError::InvalidReference(msg),
            GitError::Command(e) => e.into(),
            GitError::Io(e) => LucidityError::Io(e),
        }
    }
}

impl From<CacheError> for LucidityError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidReference(msg) => LucidityError::InvalidReference(msg),
            CacheError::RepositoryUnavailable {
                url,
                reason,
                stderr,
            } => LucidityError::RepositoryUnavailable {
                url,
                reason,
                stderr,
            },
            CacheError::Command(e) => e.into(),
            CacheError::Io(e) => LucidityError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kinds() {
        assert_eq!(
            LucidityError::InvalidReference("x".into()).kind(),
            "invalid_reference"
        );
        assert_eq!(LucidityError::Config("x".into()).kind(), "config");
    }

    #[test]
    fn test_command_errors_map_to_taxonomy() {
        let err: LucidityError = CommandError::NonZeroExit {
            command: "git diff".into(),
            code: 128,
            stderr: "fatal: bad revision\n".into(),
        }
        .into();
        assert_eq!(err.kind(), "command_failed");
        assert_eq!(err.stderr(), Some("fatal: bad revision\n"));
        assert_eq!(err.report().stderr.as_deref(), Some("fatal: bad revision"));

        let err: LucidityError = CommandError::InvalidArgument("a\nb".into()).into();
        assert_eq!(err.kind(), "invalid_reference");

        let err: LucidityError = CommandError::Timeout {
            command: "git diff".into(),
            timeout: Duration::from_secs(30),
        }
        .into();
        assert!(matches!(err, LucidityError::CommandFailed { code: None, .. }));
    }

    #[test]
    fn test_cache_errors_map_to_taxonomy() {
        let err: LucidityError = CacheError::RepositoryUnavailable {
            url: "git@github.com:o/r.git".into(),
            reason: "git clone exited with code 128".into(),
            stderr: "fatal: repository not found".into(),
        }
        .into();
        assert_eq!(err.kind(), "repository_unavailable");

        let err: LucidityError = CacheError::InvalidReference("no branch".into()).into();
        assert_eq!(err.kind(), "invalid_reference");

        let err: LucidityError = GitError::InvalidReference("bad range".into()).into();
        assert_eq!(err.kind(), "invalid_reference");
    }
}
