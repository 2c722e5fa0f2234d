use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MigrationError>;

/// Everything that can stop a migration. All variants are terminal for the
/// invocation that produced them; nothing here is retried.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("invalid migration: {0}")]
    Invalid(String),

    #[error("migration source not found: {}: {source}", .path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "migration {identifier} has drifted: recorded checksum {recorded}, script checksum {current}"
    )]
    Drift {
        identifier: String,
        recorded: String,
        current: String,
    },

    #[error("migration {identifier} failed: {source}")]
    Execution {
        identifier: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to connect to {target}: {reason}")]
    Connection { target: String, reason: String },

    #[error("migration table error: {context}: {source}")]
    Tracking {
        context: String,
        #[source]
        source: rusqlite::Error,
    },
}

impl MigrationError {
    /// Short, stable name for the error kind, used in CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Invalid(_) => "invalid",
            Self::NotFound { .. } => "not_found",
            Self::Drift { .. } => "drift",
            Self::Execution { .. } => "execution",
            Self::Connection { .. } => "connection",
            Self::Tracking { .. } => "tracking",
        }
    }

    pub(crate) fn tracking(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| Self::Tracking { context, source }
    }
}
