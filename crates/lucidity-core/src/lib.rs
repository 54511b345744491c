mod collector;
mod config;
mod error;
mod record;

pub use collector::{ChangeCollector, ChangeRequest};
pub use config::{
    FileConfig, LucidityConfig, CONFIG_FILE_NAME, ENV_CACHE_DIR, ENV_CLEANUP_DAYS,
    ENV_CLONE_TIMEOUT, ENV_COMMAND_TIMEOUT, ENV_FETCH_TIMEOUT, ENV_GIT_BINARY, ENV_SSH_VERIFY,
};
pub use error::{ErrorReport, LucidityError};
pub use record::{
    is_lockfile, ChangeRecord, ChangeStatus, FileChange, WorkspaceMetadata, WorkspaceSource,
    SMALL_CHANGE_THRESHOLD,
};
