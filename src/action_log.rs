//! Operation journal for rekey commands.
//!
//! Every command that resolves a project appends one JSONL record to
//! `<backup root>/rekey.log`, next to the backups it created. The journal is
//! the audit trail of which migration produced which backup and which
//! rollback restored it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Journal file name inside a project's backup root.
pub const JOURNAL_FILE: &str = "rekey.log";

/// Represents a single journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    /// ISO 8601 timestamp when the command finished
    pub timestamp: DateTime<Utc>,

    /// Command name (e.g., "migrate-prefix", "rollback")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub exit_code: i32,

    /// Backup written or restored by the command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,

    pub duration_ms: u64,

    /// User who executed the command
    pub user: String,
}

impl ActionLog {
    pub fn new(command: &str, args: serde_json::Value, exit_code: i32, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.to_string(),
            args: sanitize_args(&args),
            success: exit_code == crate::EXIT_OK,
            error: None,
            exit_code,
            backup: None,
            duration_ms,
            user: get_current_user(),
        }
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }

    pub fn with_backup(mut self, backup: Option<PathBuf>) -> Self {
        self.backup = backup;
        self
    }
}

/// Journal path for a project's backup root.
pub fn journal_path(backup_root: &Path) -> PathBuf {
    backup_root.join(JOURNAL_FILE)
}

/// Append `entry` to the journal at `path`.
///
/// Failures are reported to the caller, which is expected to warn and carry
/// on: a journal problem never changes a command's outcome.
pub fn log_action(path: &Path, entry: &ActionLog) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;

    tracing::debug!(path = %path.display(), command = %entry.command, "journal entry written");
    Ok(())
}

/// Truncate long strings, however deeply nested.
fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), sanitize_args(value)))
                .collect(),
        ),
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
        }
        serde_json::Value::String(s) if s.chars().count() > 200 => {
            let head: String = s.chars().take(197).collect();
            serde_json::Value::String(format!("{}... ({} chars)", head, s.chars().count()))
        }
        _ => args.clone(),
    }
}

/// Get the current user's username.
fn get_current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
