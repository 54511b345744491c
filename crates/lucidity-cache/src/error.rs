use lucidity_git::CommandError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Repository unavailable: {url}: {reason}")]
    RepositoryUnavailable {
        url: String,
        reason: String,
        /// stderr of the failed clone or fetch
        stderr: String,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Classify a failed clone or fetch.
    ///
    /// Timeouts and non-zero exits mean the remote could not be reached or
    /// read; anything else is a local problem and stays a command error.
    pub(crate) fn from_network(url: &str, operation: &str, err: CommandError) -> Self {
        match err {
            CommandError::Timeout { timeout, .. } => CacheError::RepositoryUnavailable {
                url: url.to_string(),
                reason: format!("git {} timed out after {:?}", operation, timeout),
                stderr: String::new(),
            },
            CommandError::NonZeroExit { code, stderr, .. } => CacheError::RepositoryUnavailable {
                url: url.to_string(),
                reason: format!("git {} exited with code {}", operation, code),
                stderr,
            },
            other => CacheError::Command(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_network_failures_are_unavailable() {
        let err = CacheError::from_network(
            "git@github.com:o/r.git",
            "clone",
            CommandError::NonZeroExit {
                command: "git clone".into(),
                code: 128,
                stderr: "fatal: repository not found".into(),
            },
        );
        match err {
            CacheError::RepositoryUnavailable { reason, stderr, .. } => {
                assert!(reason.contains("128"));
                assert_eq!(stderr, "fatal: repository not found");
            }
            other => panic!("unexpected {:?}", other),
        }

        let err = CacheError::from_network(
            "u",
            "fetch",
            CommandError::Timeout {
                command: "git fetch".into(),
                timeout: Duration::from_secs(60),
            },
        );
        assert!(matches!(err, CacheError::RepositoryUnavailable { .. }));
    }

    #[test]
    fn test_local_failures_stay_command_errors() {
        let err = CacheError::from_network(
            "u",
            "clone",
            CommandError::ExecutableNotFound("git".into()),
        );
        assert!(matches!(err, CacheError::Command(_)));
    }
}
