//! Read-only analysis of what a prefix rename would touch.

use super::fields::{
    CONFIG_TABLE, DEPENDENCY_ISSUE, DEPENDENCY_TARGET, KeyField, PREFIX_SETTING,
    RESERVATION_REASON, TASK_KEY, TASK_REFERENCES, THREAD_REFERENCE,
};
use super::prefix::PrefixRename;
use crate::storage::{self, count};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

/// How many colliding keys to list in reports.
pub const COLLISION_SAMPLE_LIMIT: usize = 10;

/// Rows of one field carrying a given token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldCount {
    pub field: String,
    pub rows: i64,
}

impl FieldCount {
    pub fn new(field: &KeyField, rows: i64) -> Self {
        Self {
            field: field.label(),
            rows,
        }
    }
}

/// Analysis of the task store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStoreAnalysis {
    pub issues_total: i64,
    /// Issues whose key carries the `from` token
    pub issues_matching: i64,
    /// Issues whose key already carries the `to` token
    pub issues_target: i64,
    pub dependencies_total: i64,
    /// Edges with either endpoint carrying the `from` token
    pub dependencies_matching: i64,
    /// Edges with an endpoint that resolves to no issue
    pub dangling_dependencies: i64,
    /// Per-field rows carrying the `from` token, for every present reference field
    pub references: Vec<FieldCount>,
    pub collisions: i64,
    pub collision_samples: Vec<String>,
    /// Value of the `issue_prefix` setting, if the store has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_setting: Option<String>,
}

impl TaskStoreAnalysis {
    /// Rows carrying the `from` token in `field`, zero when absent.
    pub fn reference_rows(&self, field: &KeyField) -> i64 {
        let label = field.label();
        self.references
            .iter()
            .find(|r| r.field == label)
            .map(|r| r.rows)
            .unwrap_or(0)
    }
}

/// Analysis of the mail store. Informational only: mail content is not a
/// uniqueness-constrained namespace, so nothing here is collision-checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailStoreAnalysis {
    pub messages_total: i64,
    /// Thread ids starting with the `from` token
    pub thread_refs: i64,
    /// Thread ids containing the `from` token anywhere
    pub thread_mentions: i64,
    pub reservations_total: i64,
    /// Reservation reasons containing the `from` token
    pub reason_mentions: i64,
}

/// Combined analysis of every store in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub from: String,
    pub to: String,
    pub tasks: TaskStoreAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<MailStoreAnalysis>,
}

impl Analysis {
    pub fn has_collisions(&self) -> bool {
        self.tasks.collisions > 0
    }

    /// Whether any store holds something to rename.
    pub fn has_work(&self) -> bool {
        let tasks = self.tasks.issues_matching > 0
            || self.tasks.references.iter().any(|r| r.rows > 0)
            || self.tasks.prefix_setting.as_deref() == Some(self.from.as_str());
        let mail = self
            .mail
            .as_ref()
            .is_some_and(|m| m.thread_mentions > 0 || m.reason_mentions > 0);
        tasks || mail
    }
}

/// Analyze the task store for `rename`.
pub fn analyze_tasks(conn: &Connection, rename: &PrefixRename) -> Result<TaskStoreAnalysis> {
    if !TASK_KEY.present(conn)? {
        return Err(Error::Validation(format!(
            "task store has no {} column; is this a beads database?",
            TASK_KEY.label()
        )));
    }

    let from_token = rename.from_token();
    let to_token = rename.to_token();

    let issues_total = count(conn, "SELECT COUNT(*) FROM issues", [])?;
    let issues_matching = count_anchored(conn, &TASK_KEY, &from_token)?;
    let issues_target = count_anchored(conn, &TASK_KEY, &to_token)?;

    let mut references = Vec::new();
    for field in TASK_REFERENCES {
        if field.present(conn)? {
            references.push(FieldCount::new(
                field,
                count_anchored(conn, field, &from_token)?,
            ));
        }
    }

    let has_edges = DEPENDENCY_ISSUE.present(conn)? && DEPENDENCY_TARGET.present(conn)?;
    let (dependencies_total, dependencies_matching, dangling_dependencies) = if has_edges {
        let total = count(conn, "SELECT COUNT(*) FROM dependencies", [])?;
        let matching = count(
            conn,
            "SELECT COUNT(*) FROM dependencies
             WHERE substr(issue_id, 1, ?2) = ?1 OR substr(depends_on_id, 1, ?2) = ?1",
            params![from_token, token_len(&from_token)],
        )?;
        let dangling = count(
            conn,
            "SELECT COUNT(*) FROM dependencies d
             WHERE NOT EXISTS (SELECT 1 FROM issues i WHERE i.id = d.issue_id)
                OR NOT EXISTS (SELECT 1 FROM issues i WHERE i.id = d.depends_on_id)",
            [],
        )?;
        (total, matching, dangling)
    } else {
        (0, 0, 0)
    };

    let collisions = count(
        conn,
        "SELECT COUNT(*) FROM issues a
         WHERE substr(a.id, 1, ?2) = ?1
           AND EXISTS (SELECT 1 FROM issues b WHERE b.id = ?3 || substr(a.id, ?2 + 1))",
        params![from_token, token_len(&from_token), to_token],
    )?;
    let collision_samples = if collisions > 0 {
        collision_samples(conn, rename)?
    } else {
        Vec::new()
    };

    Ok(TaskStoreAnalysis {
        issues_total,
        issues_matching,
        issues_target,
        dependencies_total,
        dependencies_matching,
        dangling_dependencies,
        references,
        collisions,
        collision_samples,
        prefix_setting: prefix_setting(conn)?,
    })
}

/// Analyze the mail store for `rename`.
pub fn analyze_mail(conn: &Connection, rename: &PrefixRename) -> Result<MailStoreAnalysis> {
    let from_token = rename.from_token();
    let mut analysis = MailStoreAnalysis::default();

    if THREAD_REFERENCE.present(conn)? {
        analysis.messages_total = count(conn, "SELECT COUNT(*) FROM messages", [])?;
        analysis.thread_refs = count_anchored(conn, &THREAD_REFERENCE, &from_token)?;
        analysis.thread_mentions = count_containing(conn, &THREAD_REFERENCE, &from_token)?;
    } else {
        tracing::debug!("mail store has no messages.thread_id");
    }

    if RESERVATION_REASON.present(conn)? {
        analysis.reservations_total = count(conn, "SELECT COUNT(*) FROM file_reservations", [])?;
        analysis.reason_mentions = count_containing(conn, &RESERVATION_REASON, &from_token)?;
    }

    Ok(analysis)
}

/// Rows of `field` starting with `token`.
pub(crate) fn count_anchored(conn: &Connection, field: &KeyField, token: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\" WHERE {}",
        field.table,
        field.anchored_predicate()
    );
    count(conn, &sql, params![token, token_len(token)])
}

/// Rows of `field` containing `token` anywhere.
pub(crate) fn count_containing(conn: &Connection, field: &KeyField, token: &str) -> Result<i64> {
    let sql = format!(
        "SELECT COUNT(*) FROM \"{}\" WHERE {}",
        field.table,
        field.contains_predicate()
    );
    count(conn, &sql, params![token])
}

/// Length of a token in characters, as SQLite's `substr` counts them.
pub(crate) fn token_len(token: &str) -> i64 {
    token.chars().count() as i64
}

fn collision_samples(conn: &Connection, rename: &PrefixRename) -> Result<Vec<String>> {
    let from_token = rename.from_token();
    let mut stmt = conn.prepare(
        "SELECT a.id FROM issues a
         WHERE substr(a.id, 1, ?2) = ?1
           AND EXISTS (SELECT 1 FROM issues b WHERE b.id = ?3 || substr(a.id, ?2 + 1))
         ORDER BY a.id
         LIMIT ?4",
    )?;
    let ids = stmt
        .query_map(
            params![
                from_token,
                token_len(&from_token),
                rename.to_token(),
                COLLISION_SAMPLE_LIMIT as i64
            ],
            |row| row.get::<_, String>(0),
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(ids
        .into_iter()
        .map(|id| {
            let renamed = rename.rename_key(&id).unwrap_or_default();
            format!("{} -> {}", id, renamed)
        })
        .collect())
}

fn prefix_setting(conn: &Connection) -> Result<Option<String>> {
    if !storage::column_exists(conn, CONFIG_TABLE, "value")? {
        return Ok(None);
    }
    let value = conn
        .query_row(
            "SELECT value FROM config WHERE key = ?1",
            [PREFIX_SETTING],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}
