//! Catalog of the columns that hold task keys.
//!
//! Three strengths of reference exist, and each is rewritten differently:
//!
//! - **Keys and declared references** ([`TASK_KEY`], [`TASK_REFERENCES`]):
//!   the whole value is a key, renamed only when it starts with `"<from>-"`.
//! - **Thread ids** ([`THREAD_REFERENCE`]): a loosely-typed string in the mail
//!   store; every `"<from>-"` occurrence is substituted.
//! - **Free text** ([`RESERVATION_REASON`]): prose that may mention a key;
//!   substituted the same way but through its own operation, since a
//!   coincidental `"<from>-"` inside an unrelated word is rewritten too.

use crate::Result;
use crate::storage;
use rusqlite::Connection;

/// A `table.column` holding task keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyField {
    pub table: &'static str,
    pub column: &'static str,
}

impl KeyField {
    pub const fn new(table: &'static str, column: &'static str) -> Self {
        Self { table, column }
    }

    /// `table.column`, used in reports and check names.
    pub fn label(&self) -> String {
        format!("{}.{}", self.table, self.column)
    }

    /// Whether this field exists in the store's schema.
    pub fn present(&self, conn: &Connection) -> Result<bool> {
        storage::column_exists(conn, self.table, self.column)
    }

    /// SQL predicate selecting rows whose value starts with the token in `?1`
    /// (`?2` is the token length). Case-sensitive, unlike `LIKE`.
    pub fn anchored_predicate(&self) -> String {
        format!("substr(\"{}\", 1, ?2) = ?1", self.column)
    }

    /// SQL predicate selecting rows whose value contains the token in `?1`.
    pub fn contains_predicate(&self) -> String {
        format!("instr(\"{}\", ?1) > 0", self.column)
    }
}

/// Primary key of the task store.
pub const TASK_KEY: KeyField = KeyField::new("issues", "id");

/// Dependency edge endpoints.
pub const DEPENDENCY_ISSUE: KeyField = KeyField::new("dependencies", "issue_id");
pub const DEPENDENCY_TARGET: KeyField = KeyField::new("dependencies", "depends_on_id");

/// Declared foreign-key fields of the task store. Missing tables are skipped.
pub const TASK_REFERENCES: &[KeyField] = &[
    DEPENDENCY_ISSUE,
    DEPENDENCY_TARGET,
    KeyField::new("labels", "issue_id"),
    KeyField::new("comments", "issue_id"),
    KeyField::new("events", "issue_id"),
    KeyField::new("dirty_issues", "issue_id"),
    KeyField::new("child_counters", "parent_id"),
];

/// Thread id on mail messages.
pub const THREAD_REFERENCE: KeyField = KeyField::new("messages", "thread_id");

/// Free-text reason on file reservations.
pub const RESERVATION_REASON: KeyField = KeyField::new("file_reservations", "reason");

/// Task store config table and the key holding the issue prefix.
pub const CONFIG_TABLE: &str = "config";
pub const PREFIX_SETTING: &str = "issue_prefix";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels() {
        assert_eq!(TASK_KEY.label(), "issues.id");
        assert_eq!(RESERVATION_REASON.label(), "file_reservations.reason");
    }

    #[test]
    fn test_anchored_predicate_is_case_sensitive() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE issues (id TEXT PRIMARY KEY);
             INSERT INTO issues VALUES ('dirt-1'), ('DIRT-2'), ('dirty-3'), ('x-dirt-4');",
        )
        .unwrap();

        let sql = format!(
            "SELECT COUNT(*) FROM issues WHERE {}",
            TASK_KEY.anchored_predicate()
        );
        let n = storage::count(&conn, &sql, rusqlite::params!["dirt-", 5]).unwrap();
        assert_eq!(n, 1);

        let sql = format!(
            "SELECT COUNT(*) FROM issues WHERE {}",
            TASK_KEY.contains_predicate()
        );
        let n = storage::count(&conn, &sql, rusqlite::params!["dirt-"]).unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn test_present_skips_missing_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE labels (issue_id TEXT, label TEXT);")
            .unwrap();
        assert!(TASK_REFERENCES[2].present(&conn).unwrap());
        assert!(!TASK_REFERENCES[3].present(&conn).unwrap());
    }
}
