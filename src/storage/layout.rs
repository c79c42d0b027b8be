//! Project layout: where the coupled stores and the backup root live.
//!
//! A project keeps its task store under `<project>/.beads/beads.db` and its
//! backups under `<project>/.beads/backups/`. The mail store is shared by
//! every project on the machine and is passed in explicitly.

use crate::{Error, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default directory holding the task store, relative to the project.
pub const DEFAULT_STORE_DIR: &str = ".beads";

/// Default task store file name inside the store directory.
pub const DEFAULT_TASK_DB: &str = "beads.db";

/// Backup root directory name inside the store directory.
pub const BACKUP_DIR: &str = "backups";

/// The kinds of store rekey knows how to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Task store (issues, dependencies and keyed side tables)
    Tasks,
    /// Messaging store (thread ids and reservation reasons)
    Mail,
}

impl StoreKind {
    /// Parse a store kind from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "tasks" | "task" | "beads" => Some(Self::Tasks),
            "mail" | "agent_mail" | "agent-mail" => Some(Self::Mail),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Mail => "mail",
        }
    }

    /// File stem used for this store inside a backup directory.
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::Tasks => "beads",
            Self::Mail => "agent_mail",
        }
    }

    /// Reverse of [`StoreKind::store_name`].
    pub fn from_store_name(name: &str) -> Option<Self> {
        match name {
            "beads" => Some(Self::Tasks),
            "agent_mail" => Some(Self::Mail),
            _ => None,
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A store file taking part in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreRef {
    pub kind: StoreKind,
    pub path: PathBuf,
}

impl StoreRef {
    pub fn new(kind: StoreKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Name of this store inside backup directories.
    pub fn name(&self) -> &'static str {
        self.kind.store_name()
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }
}

/// Resolved on-disk locations for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectLayout {
    /// Canonical project root
    pub project: PathBuf,
    /// Directory holding the task store and backups
    pub store_dir: PathBuf,
    /// Task store file
    pub task_db: PathBuf,
    /// Mail store file, if one is configured
    pub mail_db: Option<PathBuf>,
}

impl ProjectLayout {
    /// Resolve and validate the layout of `project`.
    ///
    /// The project directory and the task store must exist. The mail store is
    /// optional and is only checked when a run opens it.
    pub fn resolve(
        project: &Path,
        store_dir: &str,
        task_db: &str,
        mail_db: Option<PathBuf>,
    ) -> Result<Self> {
        if !project.is_dir() {
            return Err(Error::Validation(format!(
                "project directory does not exist: {}",
                project.display()
            )));
        }
        let project = project.canonicalize()?;
        let store_dir = project.join(store_dir);
        let task_db = store_dir.join(task_db);

        if !task_db.is_file() {
            return Err(Error::Validation(format!(
                "no task store found at {} (expected <project>/{}/{})",
                task_db.display(),
                store_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                task_db
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )));
        }

        let mail_db = match mail_db {
            Some(path) => Some(std::path::absolute(&path)?),
            None => None,
        };

        Ok(Self {
            project,
            store_dir,
            task_db,
            mail_db,
        })
    }

    /// Directory that holds every backup of this project.
    pub fn backup_root(&self) -> PathBuf {
        self.store_dir.join(BACKUP_DIR)
    }

    /// Stores taking part in a run, task store first.
    pub fn stores(&self) -> Vec<StoreRef> {
        let mut stores = vec![StoreRef::new(StoreKind::Tasks, &self.task_db)];
        if let Some(ref mail) = self.mail_db {
            stores.push(StoreRef::new(StoreKind::Mail, mail));
        }
        stores
    }
}
