//! Backup manager: checksummed snapshots of the coupled stores.
//!
//! A backup is a directory under the project's backup root:
//!
//! ```text
//! .beads/backups/migrate_20261017-090000-123_before-rename/
//!     beads.backup        raw copy of the task store
//!     beads.sha256        sha256sum-compatible checksum line
//!     agent_mail.backup
//!     agent_mail.sha256
//!     metadata.txt        see [`manifest`]
//! ```
//!
//! Backups must complete before anything is written to a store. Any I/O
//! failure is reported as [`Error::Backup`] and the partial directory is
//! removed.

pub mod manifest;

pub use manifest::{
    BackupKind, BackupManifest, CapturedStore, METADATA_FILE, TOOL_NAME, read_manifest,
};

use crate::storage::{self, Store, StoreRef};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// Extension of the raw store copy.
pub const BACKUP_EXT: &str = "backup";

/// Extension of the checksum file.
pub const CHECKSUM_EXT: &str = "sha256";

/// What to back up and how to label it.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub kind: BackupKind,
    pub label: Option<String>,
    /// Re-hash each copy from disk and fail on mismatch
    pub verify: bool,
    pub from_prefix: Option<String>,
    pub to_prefix: Option<String>,
}

impl BackupRequest {
    pub fn new(kind: BackupKind) -> Self {
        Self {
            kind,
            label: None,
            verify: false,
            from_prefix: None,
            to_prefix: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_prefixes(mut self, from: &str, to: &str) -> Self {
        self.from_prefix = Some(from.to_string());
        self.to_prefix = Some(to.to_string());
        self
    }
}

/// Snapshot `stores` into a new directory under `backup_root`.
///
/// Stores whose file does not exist are skipped with a warning and listed in
/// [`BackupManifest::skipped`]. Capturing nothing at all is an error.
pub fn create_backup(
    stores: &[StoreRef],
    backup_root: &Path,
    request: &BackupRequest,
) -> Result<BackupManifest> {
    let created_at = Utc::now();
    let dir = backup_root.join(backup_dir_name(
        request.kind,
        created_at,
        request.label.as_deref(),
    ));

    fs::create_dir_all(backup_root)
        .map_err(|e| backup_err("create backup root", backup_root, e))?;
    fs::create_dir(&dir).map_err(|e| backup_err("create backup directory", &dir, e))?;

    match capture_all(stores, &dir, created_at, request) {
        Ok(manifest) => {
            tracing::info!(
                dir = %dir.display(),
                kind = %request.kind,
                stores = manifest.stores.len(),
                "backup complete"
            );
            Ok(manifest)
        }
        Err(err) => {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %cleanup, "could not remove partial backup");
            }
            Err(err)
        }
    }
}

fn capture_all(
    stores: &[StoreRef],
    dir: &Path,
    created_at: DateTime<Utc>,
    request: &BackupRequest,
) -> Result<BackupManifest> {
    let mut captured = Vec::new();
    let mut skipped = Vec::new();

    for store in stores {
        if !store.exists() {
            tracing::warn!(
                store = store.name(),
                path = %store.path.display(),
                "store does not exist, skipping backup"
            );
            skipped.push(store.path.clone());
            continue;
        }
        captured.push(capture_store(store, dir, request.verify)?);
    }

    if captured.is_empty() {
        return Err(Error::Backup(
            "none of the configured stores exist, nothing to back up".to_string(),
        ));
    }

    let manifest = BackupManifest {
        dir: dir.to_path_buf(),
        kind: request.kind,
        created_at,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        label: request
            .label
            .as_deref()
            .map(sanitize_label)
            .filter(|l| !l.is_empty()),
        from_prefix: request.from_prefix.clone(),
        to_prefix: request.to_prefix.clone(),
        stores: captured,
        skipped,
    };
    manifest
        .write()
        .map_err(|e| backup_err("write metadata in", dir, e))?;
    Ok(manifest)
}

/// Copy one store into `dir` and write its checksum file.
fn capture_store(store: &StoreRef, dir: &Path, verify: bool) -> Result<CapturedStore> {
    let source = store.path.canonicalize().map_err(|e| backup_err("resolve", &store.path, e))?;

    // A raw copy of the main file misses rows still sitting in the WAL
    if storage::has_wal(&source) {
        let live = Store::open(&source)
            .map_err(|e| backup_err("open for checkpoint", &source, e))?;
        live.checkpoint()
            .map_err(|e| backup_err("checkpoint", &source, e))?;
    }

    let sha256 = sha256_file(&source).map_err(|e| backup_err("hash", &source, e))?;
    let target = backup_file(dir, store.name());
    let bytes = fs::copy(&source, &target).map_err(|e| backup_err("copy", &source, e))?;

    if verify {
        File::open(&target)
            .and_then(|f| f.sync_all())
            .map_err(|e| backup_err("sync", &target, e))?;
        let copied = sha256_file(&target).map_err(|e| backup_err("hash", &target, e))?;
        if copied != sha256 {
            return Err(Error::Backup(format!(
                "checksum mismatch for {}: source {} but copy {}",
                store.name(),
                sha256,
                copied
            )));
        }
    }

    let checksum_path = checksum_file(dir, store.name());
    fs::write(
        &checksum_path,
        format!("{}  {}.{}\n", sha256, store.name(), BACKUP_EXT),
    )
    .map_err(|e| backup_err("write checksum", &checksum_path, e))?;

    tracing::debug!(store = store.name(), %sha256, bytes, "captured store");
    Ok(CapturedStore {
        name: store.name().to_string(),
        source,
        sha256,
        bytes,
    })
}

/// Stream a file through SHA-256 and return the lowercase hex digest.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Read the digest from a sha256sum-style checksum file.
pub fn read_checksum_file(path: &Path) -> io::Result<String> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase())
}

/// Path of the raw copy of `name` inside a backup directory.
pub fn backup_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, BACKUP_EXT))
}

/// Path of the checksum file of `name` inside a backup directory.
pub fn checksum_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", name, CHECKSUM_EXT))
}

/// List backups under `backup_root`, newest first.
///
/// Directories without a readable manifest are skipped with a warning.
pub fn list_backups(backup_root: &Path) -> Result<Vec<BackupManifest>> {
    if !backup_root.is_dir() {
        return Ok(Vec::new());
    }

    let mut manifests = Vec::new();
    for entry in fs::read_dir(backup_root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        match read_manifest(&path) {
            Ok(manifest) => manifests.push(manifest),
            Err(e) => tracing::warn!(dir = %path.display(), error = %e, "ignoring directory"),
        }
    }
    manifests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(manifests)
}

/// Directory name for a backup: `<kind>_<timestamp>[_<label>]`.
///
/// Safety snapshots use `pre-rollback-<timestamp>`.
fn backup_dir_name(kind: BackupKind, at: DateTime<Utc>, label: Option<&str>) -> String {
    let stamp = at.format("%Y%m%d-%H%M%S-%3f");
    let mut name = match kind {
        BackupKind::PreRollback => format!("{}-{}", kind, stamp),
        _ => format!("{}_{}", kind, stamp),
    };
    if let Some(label) = label {
        let label = sanitize_label(label);
        if !label.is_empty() {
            name.push('_');
            name.push_str(&label);
        }
    }
    name
}

/// Restrict a label to characters that are safe in a directory name.
fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

fn backup_err(action: &str, path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Backup(format!("{} {}: {}", action, path.display(), err))
}
