//! Migration engine: rename the key prefix of the coupled stores.
//!
//! A run moves through fixed phases:
//!
//! ```text
//! Validated -> Analyzed -> BackedUp -> Migrated -> PostValidated
//!                  \            \           \            \
//!                   `------------`-----------`------------`--> Failed
//! ```
//!
//! Nothing is written before `BackedUp`. Each store is rewritten in its own
//! transaction, task store first. There is no transaction spanning both
//! stores: if the mail store fails after the task store committed, the task
//! store stays migrated and the error carries the backup to roll back from.

pub mod analysis;
pub mod fields;
pub mod prefix;
pub mod rewrite;
pub mod verify;

pub use analysis::{
    Analysis, COLLISION_SAMPLE_LIMIT, FieldCount, MailStoreAnalysis, TaskStoreAnalysis,
    analyze_mail, analyze_tasks,
};
pub use fields::KeyField;
pub use prefix::{PrefixRename, validate_prefix};
pub use rewrite::{
    StoreRewrite, rename_key_field, rewrite_mail_store, rewrite_task_store,
    substitute_free_text, substitute_thread_ids,
};
pub use verify::{Check, PostValidation, post_validate};

use crate::backup::{self, BackupKind, BackupManifest, BackupRequest};
use crate::storage::{Access, ProjectLayout, Store, StoreKind, StoreRef};
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

/// Where a migration run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationPhase {
    Validated,
    Analyzed,
    BackedUp,
    Migrated,
    PostValidated,
    Failed,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Analyzed => "analyzed",
            Self::BackedUp => "backed-up",
            Self::Migrated => "migrated",
            Self::PostValidated => "post-validated",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One migration run over a project's stores.
pub struct Migration {
    rename: PrefixRename,
    tasks: Store,
    mail: Option<Store>,
    phase: MigrationPhase,
    backup: Option<PathBuf>,
}

impl Migration {
    /// Open every store taking part in the run.
    ///
    /// The task store must exist, and be writable unless `access` is
    /// [`Access::ReadOnly`]. A configured mail store that does not exist is
    /// skipped with a warning.
    pub fn prepare(rename: PrefixRename, layout: &ProjectLayout, access: Access) -> Result<Self> {
        let tasks = Store::open_with(&layout.task_db, access)?;
        let mail = match layout.mail_db {
            Some(ref path) if path.exists() => Some(Store::open_with(path, access)?),
            Some(ref path) => {
                tracing::warn!(path = %path.display(), "mail store does not exist, skipping it");
                None
            }
            None => None,
        };

        tracing::info!(rename = %rename, project = %layout.project.display(), "migration validated");
        Ok(Self {
            rename,
            tasks,
            mail,
            phase: MigrationPhase::Validated,
            backup: None,
        })
    }

    pub fn rename(&self) -> &PrefixRename {
        &self.rename
    }

    pub fn phase(&self) -> MigrationPhase {
        self.phase
    }

    /// Stores this run reads and writes, task store first.
    pub fn stores(&self) -> Vec<StoreRef> {
        let mut stores = vec![StoreRef::new(StoreKind::Tasks, self.tasks.path())];
        if let Some(ref mail) = self.mail {
            stores.push(StoreRef::new(StoreKind::Mail, mail.path()));
        }
        stores
    }

    /// Read-only analysis of every store in the run.
    pub fn analyze(&mut self) -> Result<Analysis> {
        let analysis = self.snapshot().inspect_err(|_| self.phase = MigrationPhase::Failed)?;
        self.phase = MigrationPhase::Analyzed;
        tracing::info!(
            matching = analysis.tasks.issues_matching,
            edges = analysis.tasks.dependencies_matching,
            collisions = analysis.tasks.collisions,
            "analysis complete"
        );
        Ok(analysis)
    }

    /// Record the backup taken for this run. Writes are refused until then.
    pub fn record_backup(&mut self, manifest: &BackupManifest) {
        self.backup = Some(manifest.dir.clone());
        self.phase = MigrationPhase::BackedUp;
    }

    /// Rewrite every store, each in its own transaction.
    ///
    /// A failure rolls back the failing store and is wrapped so that it
    /// carries the backup directory.
    pub fn migrate(&mut self) -> Result<Vec<StoreRewrite>> {
        let Some(backup) = self.backup.clone() else {
            return Err(Error::Validation(
                "refusing to write before a backup has been taken".to_string(),
            ));
        };
        if self.phase != MigrationPhase::BackedUp {
            return Err(Error::Validation(format!(
                "cannot migrate from phase {}",
                self.phase
            )));
        }
        if self.tasks.access() == Access::ReadOnly {
            return Err(Error::Validation("stores were opened read-only".to_string()));
        }

        let mut rewrites = Vec::new();
        let task_rewrite = match rewrite_task_store(&mut self.tasks, &self.rename) {
            Ok(rewrite) => rewrite,
            Err(e) => {
                self.phase = MigrationPhase::Failed;
                return Err(store_failure(StoreKind::Tasks, e).recoverable(backup));
            }
        };
        tracing::info!(rows = task_rewrite.rows_changed(), "task store migrated");
        rewrites.push(task_rewrite);

        if let Some(ref mut mail) = self.mail {
            match rewrite_mail_store(mail, &self.rename) {
                Ok(mail_rewrite) => {
                    tracing::info!(rows = mail_rewrite.rows_changed(), "mail store migrated");
                    rewrites.push(mail_rewrite);
                }
                Err(e) => {
                    self.phase = MigrationPhase::Failed;
                    return Err(store_failure(StoreKind::Mail, e).recoverable(backup));
                }
            }
        }

        self.phase = MigrationPhase::Migrated;
        Ok(rewrites)
    }

    /// Check the rewritten stores against the analysis taken before.
    pub fn post_validate(&mut self, before: &Analysis) -> Result<PostValidation> {
        let Some(backup) = self.backup.clone() else {
            return Err(Error::Validation(
                "cannot post-validate before a backup has been taken".to_string(),
            ));
        };
        let after = self
            .snapshot()
            .map_err(|e| e.recoverable(&backup))
            .inspect_err(|_| self.phase = MigrationPhase::Failed)?;

        let result = post_validate(before, &after.tasks, after.mail.as_ref());
        if !result.passed() {
            self.phase = MigrationPhase::Failed;
            let failures = result.failures().iter().map(|c| c.to_string()).collect();
            return Err(Error::PostValidation(failures).recoverable(backup));
        }

        self.phase = MigrationPhase::PostValidated;
        tracing::info!(checks = result.checks.len(), "post-validation passed");
        Ok(result)
    }

    fn snapshot(&self) -> Result<Analysis> {
        let tasks = analyze_tasks(self.tasks.conn(), &self.rename)?;
        let mail = match self.mail {
            Some(ref store) => Some(analyze_mail(store.conn(), &self.rename)?),
            None => None,
        };
        Ok(Analysis {
            from: self.rename.from().to_string(),
            to: self.rename.to().to_string(),
            tasks,
            mail,
        })
    }
}

fn store_failure(store: StoreKind, err: Error) -> Error {
    Error::Migration {
        store: store.store_name().to_string(),
        source: Box::new(err),
    }
}

/// Options for [`run`].
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    /// Analyze only; never back up or write
    pub dry_run: bool,
    /// Re-hash backup copies from disk
    pub verify_backup: bool,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub from: String,
    pub to: String,
    pub dry_run: bool,
    pub phase: MigrationPhase,
    pub analysis: Analysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupManifest>,
    pub rewrites: Vec<StoreRewrite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<PostValidation>,
}

impl MigrationReport {
    /// Whether the run found nothing to rename and wrote nothing.
    pub fn is_noop(&self) -> bool {
        !self.dry_run && self.backup.is_none()
    }
}

/// Run a full migration: validate, analyze, back up, migrate, post-validate.
///
/// Collisions stop the run before anything is written, dry-run or not. A run
/// with nothing to rename succeeds without taking a backup.
pub fn run(
    layout: &ProjectLayout,
    rename: PrefixRename,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    // A read-only connection never checkpoints leftover WAL frames on close
    let access = if options.dry_run {
        Access::ReadOnly
    } else {
        Access::ReadWrite
    };
    let mut migration = Migration::prepare(rename, layout, access)?;
    let analysis = migration.analyze()?;

    if analysis.has_collisions() {
        return Err(Error::Validation(format!(
            "{} key(s) would collide with existing '{}' keys: {}",
            analysis.tasks.collisions,
            migration.rename().to(),
            analysis.tasks.collision_samples.join(", ")
        )));
    }

    let mut report = MigrationReport {
        from: analysis.from.clone(),
        to: analysis.to.clone(),
        dry_run: options.dry_run,
        phase: migration.phase(),
        analysis,
        backup: None,
        rewrites: Vec::new(),
        validation: None,
    };

    if options.dry_run {
        tracing::info!("dry run, no changes made");
        return Ok(report);
    }
    if !report.analysis.has_work() {
        tracing::info!(from = %report.from, "nothing carries the old prefix, no changes made");
        return Ok(report);
    }

    let request = BackupRequest::new(BackupKind::Migrate)
        .with_verify(options.verify_backup)
        .with_prefixes(&report.from, &report.to);
    let manifest = backup::create_backup(&migration.stores(), &layout.backup_root(), &request)?;
    migration.record_backup(&manifest);
    report.backup = Some(manifest);

    report.rewrites = migration.migrate()?;
    report.validation = Some(migration.post_validate(&report.analysis)?);
    report.phase = migration.phase();
    Ok(report)
}
