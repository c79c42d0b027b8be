//! Common test utilities for rekey integration tests.
//!
//! Provides `TestEnv`: an isolated project with a beads-style task store and
//! an isolated home directory holding an agent-mail store at its default
//! location, so the user's real `~/.mcp_agent_mail` is never touched.

#![allow(dead_code)]

use assert_cmd::Command;
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

pub const TASK_SCHEMA: &str = r#"
    CREATE TABLE issues (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'open',
        priority INTEGER NOT NULL DEFAULT 2,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE dependencies (
        issue_id TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        type TEXT NOT NULL DEFAULT 'blocks',
        PRIMARY KEY (issue_id, depends_on_id),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
    CREATE TABLE labels (
        issue_id TEXT NOT NULL,
        label TEXT NOT NULL,
        PRIMARY KEY (issue_id, label)
    );
    CREATE TABLE comments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id TEXT NOT NULL,
        text TEXT NOT NULL
    );
    CREATE TABLE config (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

pub const MAIL_SCHEMA: &str = r#"
    CREATE TABLE messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id TEXT,
        subject TEXT NOT NULL
    );
    CREATE TABLE file_reservations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path_pattern TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT ''
    );
"#;

/// A test environment with isolated project and home directories.
pub struct TestEnv {
    pub project_dir: TempDir,
    pub home_dir: TempDir,
}

impl TestEnv {
    /// Create a project with empty task and mail stores.
    pub fn new() -> Self {
        let env = Self {
            project_dir: TempDir::new().unwrap(),
            home_dir: TempDir::new().unwrap(),
        };

        std::fs::create_dir_all(env.task_db().parent().unwrap()).unwrap();
        Connection::open(env.task_db())
            .unwrap()
            .execute_batch(TASK_SCHEMA)
            .unwrap();

        std::fs::create_dir_all(env.mail_db().parent().unwrap()).unwrap();
        Connection::open(env.mail_db())
            .unwrap()
            .execute_batch(MAIL_SCHEMA)
            .unwrap();

        env
    }

    /// Project with `count` issues under `prefix` and `edges` dependency edges.
    pub fn with_issues(prefix: &str, count: usize, edges: usize) -> Self {
        let env = Self::new();
        env.add_issues(prefix, count, edges);
        env
    }

    /// Get a Command for the rekey binary with an isolated home directory.
    pub fn rekey(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_rekey"));
        cmd.current_dir(self.project_dir.path());
        cmd.env("HOME", self.home_dir.path());
        cmd.env("XDG_CONFIG_HOME", self.home_dir.path().join(".config"));
        cmd.env_remove("RUST_LOG");
        cmd
    }

    pub fn path(&self) -> &Path {
        self.project_dir.path()
    }

    pub fn project_arg(&self) -> String {
        self.path().to_string_lossy().to_string()
    }

    pub fn task_db(&self) -> PathBuf {
        self.path().join(".beads").join("beads.db")
    }

    /// Mail store at its default location under the isolated home.
    pub fn mail_db(&self) -> PathBuf {
        self.home_dir
            .path()
            .join(".mcp_agent_mail")
            .join("storage.sqlite3")
    }

    pub fn backup_root(&self) -> PathBuf {
        self.path().join(".beads").join("backups")
    }

    pub fn tasks(&self) -> Connection {
        Connection::open(self.task_db()).unwrap()
    }

    pub fn mail(&self) -> Connection {
        Connection::open(self.mail_db()).unwrap()
    }

    /// Insert issues `<prefix>-1..=count`, with `edges` edges `n+1 -> n`.
    pub fn add_issues(&self, prefix: &str, count: usize, edges: usize) {
        let conn = self.tasks();
        for n in 1..=count {
            conn.execute(
                "INSERT INTO issues (id, title) VALUES (?1, ?2)",
                params![format!("{prefix}-{n}"), format!("Issue {n}")],
            )
            .unwrap();
        }
        for n in 1..=edges {
            conn.execute(
                "INSERT INTO dependencies (issue_id, depends_on_id) VALUES (?1, ?2)",
                params![format!("{prefix}-{}", n + 1), format!("{prefix}-{n}")],
            )
            .unwrap();
        }
    }

    pub fn add_message(&self, thread_id: &str) {
        self.mail()
            .execute(
                "INSERT INTO messages (thread_id, subject) VALUES (?1, 'status')",
                [thread_id],
            )
            .unwrap();
    }

    pub fn add_reservation(&self, reason: &str) {
        self.mail()
            .execute(
                "INSERT INTO file_reservations (path_pattern, reason) VALUES ('src/**', ?1)",
                [reason],
            )
            .unwrap();
    }

    /// Count rows with a `SELECT COUNT(*)` query against the task store.
    pub fn count_tasks(&self, sql: &str) -> i64 {
        self.tasks().query_row(sql, [], |r| r.get(0)).unwrap()
    }

    pub fn count_mail(&self, sql: &str) -> i64 {
        self.mail().query_row(sql, [], |r| r.get(0)).unwrap()
    }

    /// Backup directories directly under the backup root.
    pub fn backups(&self) -> Vec<PathBuf> {
        if !self.backup_root().is_dir() {
            return Vec::new();
        }
        let mut dirs: Vec<PathBuf> = std::fs::read_dir(self.backup_root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        dirs
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a command's stdout as JSON.
pub fn parse_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).unwrap()
}

/// SHA-256 of a file, lowercase hex.
pub fn sha256(path: &Path) -> String {
    rekey::backup::sha256_file(path).unwrap()
}
