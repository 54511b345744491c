//! Runtime configuration.
//!
//! Built from defaults, then an optional `lucidity.toml`, then `LUCIDITY_*`
//! environment variables. Later layers win.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use lucidity_cache::{CacheTimeouts, RepositoryCache};
use lucidity_git::GitCommandRunner;

use crate::error::LucidityError;

/// The config file name
pub const CONFIG_FILE_NAME: &str = "lucidity.toml";

pub const ENV_CACHE_DIR: &str = "LUCIDITY_CACHE_DIR";
pub const ENV_CLONE_TIMEOUT: &str = "LUCIDITY_CLONE_TIMEOUT";
pub const ENV_FETCH_TIMEOUT: &str = "LUCIDITY_FETCH_TIMEOUT";
pub const ENV_COMMAND_TIMEOUT: &str = "LUCIDITY_COMMAND_TIMEOUT";
pub const ENV_CLEANUP_DAYS: &str = "LUCIDITY_CLEANUP_DAYS";
pub const ENV_SSH_VERIFY: &str = "LUCIDITY_SSH_VERIFY";
pub const ENV_GIT_BINARY: &str = "LUCIDITY_GIT_BINARY";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LucidityConfig {
    /// Root directory holding one subdirectory per cached repository
    pub cache_dir: PathBuf,
    pub clone_timeout: Duration,
    pub fetch_timeout: Duration,
    /// Timeout for local git commands (diff, show, checkout, rev-parse)
    pub command_timeout: Duration,
    /// Slots idle for this many days are removed by the cleanup sweep
    pub cleanup_days: u64,
    /// Verify SSH host keys for clone and fetch
    pub ssh_verify: bool,
    pub git_binary: PathBuf,
}

impl Default for LucidityConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            clone_timeout: Duration::from_secs(300),
            fetch_timeout: Duration::from_secs(60),
            command_timeout: lucidity_git::DEFAULT_COMMAND_TIMEOUT,
            cleanup_days: 7,
            ssh_verify: false,
            git_binary: PathBuf::from("git"),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("lucidity").join("repos"))
        .unwrap_or_else(|| std::env::temp_dir().join("lucidity-repos"))
}

/// Contents of `lucidity.toml`. Every field is optional.
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub cache_dir: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub clone_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub fetch_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub command_timeout: Option<Duration>,
    pub cleanup_days: Option<u64>,
    pub ssh_verify: Option<bool>,
    pub git_binary: Option<PathBuf>,
}

impl FileConfig {
    /// Read and parse a config file.
    pub fn from_path(path: &Path) -> Result<Self, LucidityError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LucidityError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            LucidityError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

impl LucidityConfig {
    /// Load configuration from all layers.
    ///
    /// `explicit` must exist when given. Otherwise `lucidity.toml` in
    /// `working_dir` is used if present.
    pub fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<Self, LucidityError> {
        let file = match explicit {
            Some(path) => Some(FileConfig::from_path(path)?),
            None => {
                let path = working_dir.join(CONFIG_FILE_NAME);
                if path.exists() {
                    Some(FileConfig::from_path(&path)?)
                } else {
                    None
                }
            }
        };

        let mut config = Self::default();
        if let Some(file) = file {
            config = config.with_file(file)?;
        }
        let config = config.with_env(std::env::vars())?;
        debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Apply values set in a config file. Timeouts below one second are
    /// rejected.
    pub fn with_file(mut self, file: FileConfig) -> Result<Self, LucidityError> {
        if let Some(dir) = file.cache_dir {
            self.cache_dir = dir;
        }
        if let Some(t) = file.clone_timeout {
            self.clone_timeout = check_timeout("clone_timeout", t)?;
        }
        if let Some(t) = file.fetch_timeout {
            self.fetch_timeout = check_timeout("fetch_timeout", t)?;
        }
        if let Some(t) = file.command_timeout {
            self.command_timeout = check_timeout("command_timeout", t)?;
        }
        if let Some(days) = file.cleanup_days {
            self.cleanup_days = days;
        }
        if let Some(verify) = file.ssh_verify {
            self.ssh_verify = verify;
        }
        if let Some(binary) = file.git_binary {
            self.git_binary = binary;
        }
        Ok(self)
    }

    /// Apply `LUCIDITY_*` variables. Unrelated keys are ignored; malformed
    /// values are errors.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Result<Self, LucidityError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                ENV_CACHE_DIR if !value.is_empty() => self.cache_dir = PathBuf::from(value),
                ENV_CLONE_TIMEOUT => self.clone_timeout = parse_seconds(key, value)?,
                ENV_FETCH_TIMEOUT => self.fetch_timeout = parse_seconds(key, value)?,
                ENV_COMMAND_TIMEOUT => self.command_timeout = parse_seconds(key, value)?,
                ENV_CLEANUP_DAYS => self.cleanup_days = parse_number(key, value)?,
                ENV_SSH_VERIFY => self.ssh_verify = parse_flag(key, value)?,
                ENV_GIT_BINARY if !value.is_empty() => self.git_binary = PathBuf::from(value),
                _ => {}
            }
        }
        Ok(self)
    }

    /// Idle time after which the sweep removes a slot.
    pub fn cleanup_max_idle(&self) -> Duration {
        Duration::from_secs(self.cleanup_days.saturating_mul(SECONDS_PER_DAY))
    }

    pub fn cache_timeouts(&self) -> CacheTimeouts {
        CacheTimeouts {
            clone: self.clone_timeout,
            fetch: self.fetch_timeout,
            command: self.command_timeout,
        }
    }

    /// A git runner honoring the binary and SSH settings.
    pub fn runner(&self) -> GitCommandRunner {
        GitCommandRunner::new()
            .with_binary(&self.git_binary)
            .with_ssh_verify(self.ssh_verify)
    }

    /// A repository cache rooted at `cache_dir`.
    pub fn repository_cache(&self) -> RepositoryCache {
        RepositoryCache::new(&self.cache_dir, Arc::new(self.runner()))
            .with_timeouts(self.cache_timeouts())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64, LucidityError> {
    value.parse().map_err(|_| {
        LucidityError::Config(format!(
            "{} must be a non-negative integer, got {:?}",
            key, value
        ))
    })
}

fn parse_seconds(key: &str, value: &str) -> Result<Duration, LucidityError> {
    check_timeout(key, Duration::from_secs(parse_number(key, value)?))
}

fn check_timeout(key: &str, timeout: Duration) -> Result<Duration, LucidityError> {
    if timeout < Duration::from_secs(1) {
        return Err(LucidityError::Config(format!(
            "{} must be at least 1 second",
            key
        )));
    }
    Ok(timeout)
}

fn parse_flag(key: &str, value: &str) -> Result<bool, LucidityError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(LucidityError::Config(format!(
            "{} must be true/false, 1/0 or yes/no, got {:?}",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LucidityConfig::default();
        assert_eq!(config.clone_timeout, Duration::from_secs(300));
        assert_eq!(config.fetch_timeout, Duration::from_secs(60));
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.cleanup_days, 7);
        assert!(!config.ssh_verify);
        assert!(config.cache_dir.ends_with("repos") || config.cache_dir.ends_with("lucidity-repos"));
        assert_eq!(config.cleanup_max_idle(), Duration::from_secs(7 * SECONDS_PER_DAY));
    }

    #[test]
    fn test_env_overrides() {
        let config = LucidityConfig::default()
            .with_env(env(&[
                ("LUCIDITY_CACHE_DIR", "/srv/cache"),
                ("LUCIDITY_CLONE_TIMEOUT", "600"),
                ("LUCIDITY_FETCH_TIMEOUT", " 90 "),
                ("LUCIDITY_CLEANUP_DAYS", "0"),
                ("LUCIDITY_SSH_VERIFY", "Yes"),
                ("LUCIDITY_GIT_BINARY", "/usr/local/bin/git"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(config.clone_timeout, Duration::from_secs(600));
        assert_eq!(config.fetch_timeout, Duration::from_secs(90));
        assert_eq!(config.cleanup_days, 0);
        assert!(config.ssh_verify);
        assert_eq!(config.git_binary, PathBuf::from("/usr/local/bin/git"));
    }

    #[test]
    fn test_malformed_env_is_error() {
        for (key, value) in [
            ("LUCIDITY_CLONE_TIMEOUT", "five minutes"),
            ("LUCIDITY_FETCH_TIMEOUT", "-1"),
            ("LUCIDITY_COMMAND_TIMEOUT", "0"),
            ("LUCIDITY_CLEANUP_DAYS", "7d"),
            ("LUCIDITY_SSH_VERIFY", "maybe"),
        ] {
            let err = LucidityConfig::default()
                .with_env(env(&[(key, value)]))
                .unwrap_err();
            assert_eq!(err.kind(), "config", "{key}={value}");
        }
    }

    #[test]
    fn test_file_then_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"
cache_dir = "/from/file"
clone_timeout = "10m"
fetch_timeout = "45s"
cleanup_days = 3
"#,
        )
        .unwrap();

        let file = FileConfig::from_path(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(file.clone_timeout, Some(Duration::from_secs(600)));

        let config = LucidityConfig::default()
            .with_file(file)
            .unwrap()
            .with_env(env(&[("LUCIDITY_CLEANUP_DAYS", "14")]))
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/from/file"));
        assert_eq!(config.fetch_timeout, Duration::from_secs(45));
        assert_eq!(config.cleanup_days, 14);
    }

    #[test]
    fn test_file_zero_timeout_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "clone_timeout = \"0s\"\n",
        )
        .unwrap();

        let err = LucidityConfig::load(None, dir.path()).unwrap_err();
        assert_eq!(err.kind(), "config");
        assert!(err.to_string().contains("clone_timeout must be at least 1 second"));

        let file = FileConfig {
            command_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(LucidityConfig::default().with_file(file).is_err());
    }

    #[test]
    fn test_unknown_file_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "cache_directory = \"/x\"\n").unwrap();

        let err = FileConfig::from_path(&path).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = LucidityConfig::load(Some(&dir.path().join("missing.toml")), dir.path())
            .unwrap_err();
        assert_eq!(err.kind(), "config");
    }
}
