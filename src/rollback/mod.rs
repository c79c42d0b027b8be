//! Rollback manager: restore the stores recorded in a backup.
//!
//! The backup's `metadata.txt` is the source of truth for what gets restored
//! and where. Before any live file is replaced, the current state of every
//! live store is captured in a `pre-rollback-<timestamp>` snapshot inside the
//! backup directory, so a rollback can itself be undone.
//!
//! Each store is restored by copying the backup next to the live file,
//! syncing it, and renaming it over the live file. A crash mid-restore leaves
//! either the old file or the new one, never a torn copy.

use crate::backup::{
    self, BackupKind, BackupManifest, BackupRequest, backup_file, checksum_file,
    read_checksum_file, read_manifest, sha256_file,
};
use crate::storage::{self, StoreKind, StoreRef};
use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Suffix of the staging copy written next to a live store during restore.
pub const STAGING_SUFFIX: &str = ".rekey-restore";

#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOptions {
    /// Recompute every backup checksum before touching live files
    pub verify: bool,
    /// Skip the confirmation callback
    pub force: bool,
}

/// One store to restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreTarget {
    pub name: String,
    pub kind: StoreKind,
    /// `<name>.backup` inside the backup directory
    pub backup_file: PathBuf,
    /// Live path the backup is restored to
    pub destination: PathBuf,
    /// Checksum recorded in the manifest
    pub sha256: String,
}

/// What a rollback would do, shown to the user before confirming.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackPlan {
    pub backup: BackupManifest,
    pub targets: Vec<RestoreTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoredStore {
    pub name: String,
    pub destination: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub backup_dir: PathBuf,
    pub verified: bool,
    /// Snapshot of the live stores taken before restoring
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_snapshot: Option<PathBuf>,
    pub restored: Vec<RestoredStore>,
}

/// Check the structure of `backup_dir` and work out what to restore.
pub fn plan(backup_dir: &Path) -> Result<RollbackPlan> {
    if !backup_dir.is_dir() {
        return Err(Error::Validation(format!(
            "backup directory does not exist: {}",
            backup_dir.display()
        )));
    }

    let manifest = read_manifest(backup_dir)?;
    if manifest.stores.is_empty() {
        return Err(Error::Validation(format!(
            "backup records no stores: {}",
            backup_dir.display()
        )));
    }

    let mut targets = Vec::with_capacity(manifest.stores.len());
    for store in &manifest.stores {
        let kind = StoreKind::from_store_name(&store.name).ok_or_else(|| {
            Error::Validation(format!("backup holds an unknown store: {}", store.name))
        })?;

        let copy = backup_file(backup_dir, &store.name);
        let checksum = checksum_file(backup_dir, &store.name);
        for required in [&copy, &checksum] {
            if !required.is_file() {
                return Err(Error::Validation(format!(
                    "backup is incomplete, missing {}",
                    required.display()
                )));
            }
        }

        targets.push(RestoreTarget {
            name: store.name.clone(),
            kind,
            backup_file: copy,
            destination: store.source.clone(),
            sha256: store.sha256.clone(),
        });
    }

    Ok(RollbackPlan {
        backup: manifest,
        targets,
    })
}

/// Recompute every backup checksum and compare it with the recorded ones.
pub fn verify_backup(plan: &RollbackPlan) -> Result<()> {
    for target in &plan.targets {
        let checksum_path = checksum_file(&plan.backup.dir, &target.name);
        let recorded = read_checksum_file(&checksum_path).map_err(|e| {
            Error::Validation(format!("cannot read {}: {}", checksum_path.display(), e))
        })?;
        if recorded != target.sha256 {
            return Err(Error::Validation(format!(
                "{} disagrees with {}: {} vs {}",
                checksum_path.display(),
                backup::METADATA_FILE,
                recorded,
                target.sha256
            )));
        }

        let actual = sha256_file(&target.backup_file).map_err(|e| {
            Error::Validation(format!("cannot read {}: {}", target.backup_file.display(), e))
        })?;
        if actual != target.sha256 {
            return Err(Error::Validation(format!(
                "checksum mismatch for {}: expected {}, found {}",
                target.backup_file.display(),
                target.sha256,
                actual
            )));
        }
        tracing::debug!(store = %target.name, "backup checksum verified");
    }
    Ok(())
}

/// Restore every store recorded in `backup_dir`.
///
/// `confirm` is called with the plan unless `options.force` is set; returning
/// `false` cancels without touching anything. Failures after the safety
/// snapshot carry its path for recovery.
pub fn rollback<F>(
    backup_dir: &Path,
    options: &RollbackOptions,
    confirm: F,
) -> Result<RollbackResult>
where
    F: FnOnce(&RollbackPlan) -> Result<bool>,
{
    let plan = plan(backup_dir)?;
    if options.verify {
        verify_backup(&plan)?;
        tracing::info!(dir = %backup_dir.display(), "backup verified");
    }

    if !options.force && !confirm(&plan)? {
        return Err(Error::Cancelled("rollback not confirmed".to_string()));
    }

    let safety_snapshot = take_safety_snapshot(&plan)?;

    let mut restored = Vec::with_capacity(plan.targets.len());
    for target in &plan.targets {
        match restore_store(target) {
            Ok(store) => restored.push(store),
            Err(e) => {
                return Err(match safety_snapshot {
                    Some(ref snapshot) => e.recoverable(snapshot),
                    None => e,
                });
            }
        }
    }

    tracing::info!(
        dir = %backup_dir.display(),
        stores = restored.len(),
        "rollback complete"
    );
    Ok(RollbackResult {
        backup_dir: plan.backup.dir.clone(),
        verified: options.verify,
        safety_snapshot,
        restored,
    })
}

/// Capture the live stores that are about to be replaced.
///
/// Returns `None` when none of the destinations exist any more.
fn take_safety_snapshot(plan: &RollbackPlan) -> Result<Option<PathBuf>> {
    let live: Vec<StoreRef> = plan
        .targets
        .iter()
        .filter(|t| t.destination.is_file())
        .map(|t| StoreRef::new(t.kind, &t.destination))
        .collect();
    if live.is_empty() {
        tracing::warn!("no live stores exist, skipping safety snapshot");
        return Ok(None);
    }

    let request = BackupRequest::new(BackupKind::PreRollback).with_verify(true);
    let snapshot = backup::create_backup(&live, &plan.backup.dir, &request)?;
    tracing::info!(dir = %snapshot.dir.display(), "safety snapshot taken");
    Ok(Some(snapshot.dir))
}

/// Replace one live store with its backup copy.
fn restore_store(target: &RestoreTarget) -> Result<RestoredStore> {
    let destination = &target.destination;
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| restore_err("create", parent, e))?;
    }

    let staging = staging_path(destination);
    let bytes = match stage_copy(&target.backup_file, &staging) {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
    };

    for sidecar in storage::sidecar_paths(destination) {
        match fs::remove_file(&sidecar) {
            Ok(()) => tracing::debug!(path = %sidecar.display(), "removed stale sidecar"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                let _ = fs::remove_file(&staging);
                return Err(restore_err("remove", &sidecar, e));
            }
        }
    }

    fs::rename(&staging, destination).map_err(|e| restore_err("replace", destination, e))?;

    let sha256 = sha256_file(destination).map_err(|e| restore_err("hash", destination, e))?;
    if sha256 != target.sha256 {
        return Err(Error::Restore(format!(
            "restored {} does not match its backup: expected {}, found {}",
            destination.display(),
            target.sha256,
            sha256
        )));
    }

    tracing::info!(store = %target.name, path = %destination.display(), "store restored");
    Ok(RestoredStore {
        name: target.name.clone(),
        destination: destination.clone(),
        sha256,
        bytes,
    })
}

fn stage_copy(source: &Path, staging: &Path) -> Result<u64> {
    let bytes = fs::copy(source, staging).map_err(|e| restore_err("copy", source, e))?;
    File::open(staging)
        .and_then(|f| f.sync_all())
        .map_err(|e| restore_err("sync", staging, e))?;
    Ok(bytes)
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn restore_err(action: &str, path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Restore(format!("{} {}: {}", action, path.display(), err))
}
