//! Command implementations for the rekey CLI.
//!
//! Each command takes already-resolved inputs, calls into the library and
//! returns a result that renders as JSON (default) or as a human summary.
//! - `backup` - Snapshot the coupled stores
//! - `migrate_prefix` - Rename the key prefix
//! - `rollback` - Restore a backup
//! - `list_backups` - Show a project's backups

use crate::backup::{self, BackupKind, BackupManifest, BackupRequest};
use crate::migrate::{self, MigrationOptions, MigrationReport, PrefixRename};
use crate::rollback::{self, RollbackOptions, RollbackPlan, RollbackResult};
use crate::storage::ProjectLayout;
use crate::{Error, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// The exact command that restores `backup_dir`.
pub fn rollback_command(backup_dir: &Path) -> String {
    format!("rekey rollback --backup {} --verify", backup_dir.display())
}

/// The exact command that snapshots the stores of `project`.
pub fn backup_command(project: &Path) -> String {
    format!("rekey backup --project {} --verify", project.display())
}

/// Manual recovery for a failed command.
///
/// A failure after a backup was written points at its rollback. A failure
/// before any write points at a fresh backup of `project`, when known.
pub fn recovery_command(err: &Error, project: Option<&Path>) -> Option<String> {
    match err.recovery_backup() {
        Some(dir) => Some(rollback_command(dir)),
        None => project.map(backup_command),
    }
}

/// Recovery instructions for a failed command, see [`recovery_command`].
pub fn recovery_hint(err: &Error, project: Option<&Path>) -> Option<String> {
    let command = recovery_command(err, project)?;
    let hint = if err.recovery_backup().is_some() {
        "A backup was taken before the failure. To restore it run:"
    } else {
        "No store was changed. To back up the stores before retrying run:"
    };
    Some(format!("{}\n    {}", hint, command))
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

// === backup ===

#[derive(Serialize)]
pub struct BackupResult {
    pub backup: BackupManifest,
    pub rollback_command: String,
}

impl Output for BackupResult {
    fn to_json(&self) -> String {
        to_json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!("Backup created: {}\n", self.backup.dir.display());
        write_stores(&mut out, &self.backup);
        let _ = write!(out, "\nRestore with:\n    {}", self.rollback_command);
        out
    }
}

/// Snapshot every configured store of `layout`.
pub fn backup(
    layout: &ProjectLayout,
    label: Option<String>,
    verify: bool,
) -> Result<BackupResult> {
    let request = BackupRequest::new(BackupKind::Backup)
        .with_label(label)
        .with_verify(verify);
    let manifest = backup::create_backup(&layout.stores(), &layout.backup_root(), &request)?;
    Ok(BackupResult {
        rollback_command: rollback_command(&manifest.dir),
        backup: manifest,
    })
}

// === migrate-prefix ===

#[derive(Serialize)]
pub struct MigrateResult {
    #[serde(flatten)]
    pub report: MigrationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_command: Option<String>,
}

impl Output for MigrateResult {
    fn to_json(&self) -> String {
        to_json(self)
    }

    fn to_human(&self) -> String {
        let report = &self.report;
        let tasks = &report.analysis.tasks;
        let mut out = String::new();

        let heading = if report.dry_run {
            "Dry run"
        } else {
            "Migration"
        };
        let _ = writeln!(out, "{}: {} -> {}", heading, report.from, report.to);
        let _ = writeln!(
            out,
            "  issues:        {} matching of {}",
            tasks.issues_matching, tasks.issues_total
        );
        let _ = writeln!(
            out,
            "  dependencies:  {} matching of {}",
            tasks.dependencies_matching, tasks.dependencies_total
        );
        for field in tasks.references.iter().filter(|f| f.rows > 0) {
            let _ = writeln!(out, "  {:<28} {}", field.field, field.rows);
        }
        if let Some(ref mail) = report.analysis.mail {
            let _ = writeln!(
                out,
                "  mail threads:  {} of {} messages",
                mail.thread_mentions, mail.messages_total
            );
            let _ = writeln!(
                out,
                "  reservations:  {} of {} reasons",
                mail.reason_mentions, mail.reservations_total
            );
        }

        if report.dry_run {
            out.push_str("\nNo changes made (dry run).");
            return out;
        }
        if report.is_noop() {
            let _ = write!(out, "\nNothing carries the '{}' prefix. No changes made.", report.from);
            return out;
        }

        out.push('\n');
        for rewrite in &report.rewrites {
            let _ = writeln!(
                out,
                "Rewrote {} rows in the {} store",
                rewrite.rows_changed(),
                rewrite.store
            );
        }
        if let Some(ref validation) = report.validation {
            let _ = writeln!(
                out,
                "Post-validation: {} checks passed",
                validation.checks.len()
            );
        }
        if let Some(ref command) = self.rollback_command {
            let _ = write!(out, "\nUndo with:\n    {}", command);
        }
        out
    }
}

/// Rename `from` to `to` across the stores of `layout`.
pub fn migrate_prefix(
    layout: &ProjectLayout,
    from: &str,
    to: &str,
    options: &MigrationOptions,
) -> Result<MigrateResult> {
    let rename = PrefixRename::new(from, to)?;
    let report = migrate::run(layout, rename, options)?;
    Ok(MigrateResult {
        rollback_command: report.backup.as_ref().map(|b| rollback_command(&b.dir)),
        report,
    })
}

// === rollback ===

#[derive(Serialize)]
pub struct RollbackOutput {
    #[serde(flatten)]
    pub result: RollbackResult,
}

impl Output for RollbackOutput {
    fn to_json(&self) -> String {
        to_json(self)
    }

    fn to_human(&self) -> String {
        let result = &self.result;
        let mut out = format!("Restored backup: {}\n", result.backup_dir.display());
        for store in &result.restored {
            let _ = writeln!(out, "  {:<12} -> {}", store.name, store.destination.display());
        }
        if result.verified {
            out.push_str("Checksums verified before restore.\n");
        }
        match result.safety_snapshot {
            Some(ref snapshot) => {
                let _ = write!(
                    out,
                    "\nState before the rollback was saved to {}\nUndo with:\n    {}",
                    snapshot.display(),
                    rollback_command(snapshot)
                );
            }
            None => out.push_str("\nNo live stores existed, no safety snapshot taken."),
        }
        out
    }
}

/// Restore `backup_dir`, asking `confirm` first unless forced.
pub fn rollback<F>(
    backup_dir: &Path,
    options: &RollbackOptions,
    confirm: F,
) -> Result<RollbackOutput>
where
    F: FnOnce(&RollbackPlan) -> Result<bool>,
{
    let result = rollback::rollback(backup_dir, options, confirm)?;
    Ok(RollbackOutput { result })
}

/// Describe a rollback plan for the confirmation prompt.
pub fn describe_plan(plan: &RollbackPlan) -> String {
    let mut out = format!(
        "About to restore {} backup from {}:\n",
        plan.backup.kind,
        plan.backup.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for target in &plan.targets {
        let _ = writeln!(
            out,
            "  {} -> {}",
            target.backup_file.display(),
            target.destination.display()
        );
    }
    out.push_str("Current files are snapshotted first. Other writers must be stopped.\n");
    out
}

// === list-backups ===

#[derive(Serialize)]
pub struct BackupList {
    pub backup_root: PathBuf,
    pub count: usize,
    pub backups: Vec<BackupManifest>,
}

impl Output for BackupList {
    fn to_json(&self) -> String {
        to_json(self)
    }

    fn to_human(&self) -> String {
        if self.backups.is_empty() {
            return format!("No backups under {}", self.backup_root.display());
        }
        let mut out = format!(
            "{} backup(s) under {}:\n",
            self.count,
            self.backup_root.display()
        );
        for manifest in &self.backups {
            let name = manifest
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let rename = match (&manifest.from_prefix, &manifest.to_prefix) {
                (Some(from), Some(to)) => format!("  ({} -> {})", from, to),
                _ => String::new(),
            };
            let _ = writeln!(
                out,
                "  {}  {:<12} {} store(s){}",
                name,
                manifest.kind,
                manifest.stores.len(),
                rename
            );
        }
        out.trim_end().to_string()
    }
}

/// List the backups of `layout`, newest first.
pub fn list_backups(layout: &ProjectLayout) -> Result<BackupList> {
    let root = layout.backup_root();
    let backups = backup::list_backups(&root)?;
    Ok(BackupList {
        backup_root: root,
        count: backups.len(),
        backups,
    })
}

fn write_stores(out: &mut String, manifest: &BackupManifest) {
    for store in &manifest.stores {
        let _ = writeln!(
            out,
            "  {:<12} {} bytes  sha256 {}",
            store.name, store.bytes, store.sha256
        );
    }
    for skipped in &manifest.skipped {
        let _ = writeln!(out, "  skipped (missing): {}", skipped.display());
    }
}
