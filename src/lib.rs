//! Rekey - backup, identifier-prefix migration and rollback for task stores.
//!
//! This library provides the core functionality for the `rekey` CLI tool:
//! renaming the key namespace of a beads-style task database (and the
//! agent-mail database that references it) with a verified backup taken
//! before any write and a rollback path that snapshots live state first.

pub mod action_log;
pub mod backup;
pub mod cli;
pub mod commands;
pub mod config;
pub mod migrate;
pub mod rollback;
pub mod storage;

use std::path::PathBuf;

/// Exit code for a successful run.
pub const EXIT_OK: i32 = 0;
/// Exit code for bad arguments, missing stores, collisions or a cancelled run.
pub const EXIT_VALIDATION: i32 = 1;
/// Exit code for a failed store transaction or failed post-migration checks.
pub const EXIT_DATABASE: i32 = 2;
/// Exit code for a failed backup or restore.
pub const EXIT_BACKUP: i32 = 3;


/// Library-level error type for rekey operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Store is not readable and writable: {}", .0.display())]
    AccessDenied(PathBuf),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Migration of store '{store}' failed and was rolled back: {source}")]
    Migration { store: String, source: Box<Error> },

    #[error("Post-migration validation failed: {}", .0.join("; "))]
    PostValidation(Vec<String>),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A failure that happened after a backup was written; `backup` restores the prior state.
    #[error("{source}")]
    Recoverable { backup: PathBuf, source: Box<Error> },
}

impl Error {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_)
            | Error::Config(_)
            | Error::NotFound(_)
            | Error::AccessDenied(_)
            | Error::Cancelled(_) => EXIT_VALIDATION,
            Error::Migration { .. } | Error::PostValidation(_) | Error::Database(_) => {
                EXIT_DATABASE
            }
            Error::Backup(_) | Error::Restore(_) | Error::Io(_) | Error::Json(_) => EXIT_BACKUP,
            Error::Recoverable { source, .. } => source.exit_code(),
        }
    }

    /// Backup directory that recovers from this error, if one was written.
    pub fn recovery_backup(&self) -> Option<&std::path::Path> {
        match self {
            Error::Recoverable { backup, .. } => Some(backup),
            _ => None,
        }
    }

    /// Whether this error is a validation failure (nothing was touched).
    pub fn is_validation(&self) -> bool {
        match self {
            Error::Recoverable { source, .. } => source.is_validation(),
            other => other.exit_code() == EXIT_VALIDATION,
        }
    }

    pub(crate) fn recoverable(self, backup: impl Into<PathBuf>) -> Self {
        match self {
            already @ Error::Recoverable { .. } => already,
            other => Error::Recoverable {
                backup: backup.into(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias for rekey operations.
pub type Result<T> = std::result::Result<T, Error>;
