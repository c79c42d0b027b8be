//! Store adapter for the SQLite databases rekey operates on.
//!
//! The migration engine needs very little from a store: open it by path,
//! count rows, run a parameterized statement, and run a unit of work inside a
//! transaction. Everything else (schemas, ORMs, migrations) belongs to the
//! systems that own these databases.
//!
//! Foreign-key enforcement is left at SQLite's connection default (off).
//! Renaming a key and then its references inside one transaction would trip
//! immediate enforcement halfway through; referential integrity is asserted by
//! the post-migration checks instead.

pub mod layout;

pub use layout::{
    BACKUP_DIR, DEFAULT_STORE_DIR, DEFAULT_TASK_DB, ProjectLayout, StoreKind, StoreRef,
};

use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags, Params};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// How a store is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    /// Never writes the main file, not even a WAL checkpoint on close
    ReadOnly,
}

/// An open store.
pub struct Store {
    path: PathBuf,
    conn: Connection,
    access: Access,
}

impl Store {
    /// Open an existing store for reading and writing.
    ///
    /// Never creates a file. Fails with [`Error::NotFound`] when the path is
    /// missing and [`Error::AccessDenied`] when it cannot be opened read/write.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, Access::ReadWrite)
    }

    /// Open an existing store without write access.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        Self::open_with(path, Access::ReadOnly)
    }

    pub fn open_with(path: &Path, access: Access) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(Error::Validation(format!(
                "store path is not a file: {}",
                path.display()
            )));
        }

        let mode = match access {
            Access::ReadWrite => {
                // SQLite silently falls back to read-only, so probe the file first
                if let Err(e) = OpenOptions::new().read(true).write(true).open(path) {
                    return Err(match e.kind() {
                        ErrorKind::PermissionDenied => Error::AccessDenied(path.to_path_buf()),
                        ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
                        _ => Error::Io(e),
                    });
                }
                OpenFlags::SQLITE_OPEN_READ_WRITE
            }
            Access::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
        };

        let conn = Connection::open_with_flags(
            path,
            mode | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Reading the schema fails fast on files that are not SQLite databases
        count(&conn, "SELECT COUNT(*) FROM sqlite_master", [])?;

        tracing::debug!(path = %path.display(), ?access, "opened store");
        Ok(Self {
            path: path.to_path_buf(),
            conn,
            access,
        })
    }

    /// Path this store was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Borrow the underlying connection for read-only queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Count rows with a `SELECT COUNT(*) ...` style query.
    pub fn count<P: Params>(&self, sql: &str, params: P) -> Result<i64> {
        count(&self.conn, sql, params)
    }

    /// Execute a statement outside of any explicit transaction.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize> {
        execute(&self.conn, sql, params)
    }

    /// Run `f` inside a transaction.
    ///
    /// The transaction commits when `f` returns `Ok` and is rolled back when
    /// it returns `Err`, so none of its statements remain visible.
    pub fn with_transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let conn: &Connection = &tx;
        match f(conn) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %rollback_err,
                        "explicit rollback failed; SQLite discards the transaction on close"
                    );
                }
                Err(err)
            }
        }
    }

    /// Fold any write-ahead log into the main database file.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Count rows with a `SELECT COUNT(*) ...` style query.
pub fn count<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<i64> {
    Ok(conn.query_row(sql, params, |row| row.get(0))?)
}

/// Execute a statement and return the number of rows it changed.
pub fn execute<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<usize> {
    let rows = conn.execute(sql, params)?;
    tracing::debug!(sql, rows, "executed statement");
    Ok(rows)
}

/// Check whether a table exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let n = count(
        conn,
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
    )?;
    Ok(n > 0)
}

/// Check whether `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }
    let n = count(
        conn,
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
    )?;
    Ok(n > 0)
}

/// Journal sidecar files SQLite may keep next to a database.
pub fn sidecar_paths(path: &Path) -> Vec<PathBuf> {
    ["-wal", "-shm", "-journal"]
        .iter()
        .map(|suffix| {
            let mut name = path.as_os_str().to_os_string();
            name.push(suffix);
            PathBuf::from(name)
        })
        .collect()
}

/// Whether a database has an active write-ahead log next to it.
pub fn has_wal(path: &Path) -> bool {
    let mut name = path.as_os_str().to_os_string();
    name.push("-wal");
    Path::new(&name).exists()
}
