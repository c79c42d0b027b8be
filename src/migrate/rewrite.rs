//! Store rewrites. Each store is rewritten inside its own transaction.

use super::analysis::FieldCount;
use super::fields::{
    CONFIG_TABLE, KeyField, PREFIX_SETTING, RESERVATION_REASON, TASK_KEY, TASK_REFERENCES,
    THREAD_REFERENCE,
};
use super::prefix::PrefixRename;
use crate::Result;
use crate::storage::{self, Store, StoreKind, execute};
use rusqlite::{Connection, params};
use serde::Serialize;

/// Rows changed in one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRewrite {
    pub store: StoreKind,
    pub fields: Vec<FieldCount>,
}

impl StoreRewrite {
    /// Total rows changed across every field.
    pub fn rows_changed(&self) -> i64 {
        self.fields.iter().map(|f| f.rows).sum()
    }

    /// Rows changed in `field`, zero when it was not touched.
    pub fn rows(&self, field: &KeyField) -> i64 {
        let label = field.label();
        self.fields
            .iter()
            .find(|f| f.field == label)
            .map(|f| f.rows)
            .unwrap_or(0)
    }
}

/// Rename keys and every declared reference in the task store.
pub fn rewrite_task_store(store: &mut Store, rename: &PrefixRename) -> Result<StoreRewrite> {
    store.with_transaction(|conn| {
        let mut fields = vec![FieldCount::new(
            &TASK_KEY,
            rename_key_field(conn, &TASK_KEY, rename)? as i64,
        )];

        for field in TASK_REFERENCES {
            if field.present(conn)? {
                let rows = rename_key_field(conn, field, rename)?;
                fields.push(FieldCount::new(field, rows as i64));
            }
        }

        if let Some(rows) = update_prefix_setting(conn, rename)? {
            fields.push(FieldCount {
                field: format!("{}.{}", CONFIG_TABLE, PREFIX_SETTING),
                rows: rows as i64,
            });
        }

        Ok(StoreRewrite {
            store: StoreKind::Tasks,
            fields,
        })
    })
}

/// Substitute thread ids and reservation reasons in the mail store.
pub fn rewrite_mail_store(store: &mut Store, rename: &PrefixRename) -> Result<StoreRewrite> {
    store.with_transaction(|conn| {
        let mut fields = Vec::new();
        if THREAD_REFERENCE.present(conn)? {
            let rows = substitute_thread_ids(conn, rename)?;
            fields.push(FieldCount::new(&THREAD_REFERENCE, rows as i64));
        }
        if RESERVATION_REASON.present(conn)? {
            let rows = substitute_free_text(conn, &RESERVATION_REASON, rename)?;
            fields.push(FieldCount::new(&RESERVATION_REASON, rows as i64));
        }
        Ok(StoreRewrite {
            store: StoreKind::Mail,
            fields,
        })
    })
}

/// Key-aware rename: rewrite values of `field` that start with `"<from>-"`.
///
/// Only the leading token is replaced; the local id is kept byte for byte.
pub fn rename_key_field(
    conn: &Connection,
    field: &KeyField,
    rename: &PrefixRename,
) -> Result<usize> {
    let from_token = rename.from_token();
    let sql = format!(
        "UPDATE \"{table}\" SET \"{col}\" = ?3 || substr(\"{col}\", ?2 + 1) WHERE {pred}",
        table = field.table,
        col = field.column,
        pred = field.anchored_predicate(),
    );
    execute(
        conn,
        &sql,
        params![
            from_token,
            super::analysis::token_len(&from_token),
            rename.to_token()
        ],
    )
}

/// Substitute `"<from>-"` with `"<to>-"` everywhere inside mail thread ids.
pub fn substitute_thread_ids(conn: &Connection, rename: &PrefixRename) -> Result<usize> {
    replace_token(conn, &THREAD_REFERENCE, rename)
}

/// Heuristic substitution inside free text.
///
/// Every occurrence of `"<from>-"` in `field` becomes `"<to>-"`, including
/// occurrences that only look like a key: with `from = "dirt"` the reason
/// `"redirt-5 cleanup"` becomes `"rechimaro-5 cleanup"`. No word-boundary
/// anchoring is applied.
pub fn substitute_free_text(
    conn: &Connection,
    field: &KeyField,
    rename: &PrefixRename,
) -> Result<usize> {
    replace_token(conn, field, rename)
}

fn replace_token(conn: &Connection, field: &KeyField, rename: &PrefixRename) -> Result<usize> {
    let sql = format!(
        "UPDATE \"{table}\" SET \"{col}\" = replace(\"{col}\", ?1, ?2) WHERE {pred}",
        table = field.table,
        col = field.column,
        pred = field.contains_predicate(),
    );
    execute(conn, &sql, params![rename.from_token(), rename.to_token()])
}

/// Point the store's `issue_prefix` setting at the new prefix.
///
/// Returns `None` when the store has no such setting or it names a different
/// prefix.
fn update_prefix_setting(conn: &Connection, rename: &PrefixRename) -> Result<Option<usize>> {
    if !storage::column_exists(conn, CONFIG_TABLE, "value")? {
        return Ok(None);
    }
    let rows = execute(
        conn,
        "UPDATE config SET value = ?1 WHERE key = ?2 AND value = ?3",
        params![rename.to(), PREFIX_SETTING, rename.from()],
    )?;
    Ok((rows > 0).then_some(rows))
}
