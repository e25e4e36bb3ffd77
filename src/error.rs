use crate::models::application::{Application, ApplicationStatus, Role};
use crate::models::command::CommandKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cannot {command} application {app_id}: not allowed for {role} while {from}")]
    InvalidTransition {
        app_id: String,
        command: CommandKind,
        from: ApplicationStatus,
        role: Role,
    },

    #[error("Cannot {command} application {app_id}: missing {missing:?}, malformed {malformed:?}")]
    Validation {
        app_id: String,
        command: CommandKind,
        missing: Vec<String>,
        malformed: Vec<String>,
    },

    #[error("Conflicting {command} for application {app_id}: {reason}")]
    Conflict {
        app_id: String,
        command: CommandKind,
        reason: String,
    },

    #[error(transparent)]
    Sync(#[from] SyncFailure),

    #[error("Backend error ({status:?}): {message}")]
    Api { status: Option<u16>, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Errors raised before any request leaves the process. These never
    /// mutate local state.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransition { .. }
                | Error::Validation { .. }
                | Error::Conflict { .. }
                | Error::NotFound(_)
        )
    }
}

/// A persist that failed after its optimistic mutation was applied. By the
/// time this is returned the store already holds `snapshot` again.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Failed to sync {command} for application {app_id}: {reason}")]
pub struct SyncFailure {
    pub app_id: String,
    pub command: CommandKind,
    pub reason: String,
    pub snapshot: Application,
}
