//! `metadata.txt`: the human-readable manifest written into every backup.
//!
//! The format is one `key: value` pair per line so it reads well in a pager
//! and parses without a schema:
//!
//! ```text
//! # rekey backup metadata
//! tool: rekey
//! version: 0.1.0
//! kind: migrate
//! created_at: 2026-10-17T09:00:00.123+00:00
//! from_prefix: dirt
//! to_prefix: chimaro
//! store: beads
//! store.beads.path: /work/app/.beads/beads.db
//! store.beads.sha256: 9f86d0...
//! store.beads.bytes: 40960
//! skipped: /home/me/.mcp_agent_mail/storage.sqlite3
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the tool recorded in every manifest.
pub const TOOL_NAME: &str = "rekey";

/// Manifest file name inside a backup directory.
pub const METADATA_FILE: &str = "metadata.txt";

/// Why a backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    /// Explicit `rekey backup`
    Backup,
    /// Taken by `rekey migrate-prefix` before any write
    Migrate,
    /// Safety snapshot of live state taken by `rekey rollback`
    PreRollback,
}

impl BackupKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "backup" => Some(Self::Backup),
            "migrate" => Some(Self::Migrate),
            "pre-rollback" => Some(Self::PreRollback),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Migrate => "migrate",
            Self::PreRollback => "pre-rollback",
        }
    }
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One store captured in a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedStore {
    /// Store name, also the file stem of `<name>.backup` and `<name>.sha256`
    pub name: String,
    /// Live path the store was copied from (and is restored to)
    pub source: PathBuf,
    /// SHA-256 of the source at the moment of copy, lowercase hex
    pub sha256: String,
    /// Size of the copy in bytes
    pub bytes: u64,
}

/// Everything known about one backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupManifest {
    /// The backup directory itself
    pub dir: PathBuf,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub tool_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_prefix: Option<String>,
    pub stores: Vec<CapturedStore>,
    /// Configured stores that did not exist and were not captured
    pub skipped: Vec<PathBuf>,
}

impl BackupManifest {
    /// Look up a captured store by name.
    pub fn store(&self, name: &str) -> Option<&CapturedStore> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Render the manifest as `metadata.txt` content.
    pub fn to_metadata(&self) -> String {
        let mut out = String::from("# rekey backup metadata\n");
        let _ = writeln!(out, "tool: {}", TOOL_NAME);
        let _ = writeln!(out, "version: {}", self.tool_version);
        let _ = writeln!(out, "kind: {}", self.kind);
        let _ = writeln!(out, "created_at: {}", self.created_at.to_rfc3339());
        if let Some(ref label) = self.label {
            let _ = writeln!(out, "label: {}", label);
        }
        if let Some(ref from) = self.from_prefix {
            let _ = writeln!(out, "from_prefix: {}", from);
        }
        if let Some(ref to) = self.to_prefix {
            let _ = writeln!(out, "to_prefix: {}", to);
        }
        for store in &self.stores {
            let _ = writeln!(out, "store: {}", store.name);
            let _ = writeln!(out, "store.{}.path: {}", store.name, store.source.display());
            let _ = writeln!(out, "store.{}.sha256: {}", store.name, store.sha256);
            let _ = writeln!(out, "store.{}.bytes: {}", store.name, store.bytes);
        }
        for path in &self.skipped {
            let _ = writeln!(out, "skipped: {}", path.display());
        }
        out
    }

    /// Parse `metadata.txt` content for the backup living in `dir`.
    pub fn from_metadata(dir: &Path, text: &str) -> Result<Self> {
        let invalid = |msg: String| {
            Error::Validation(format!("invalid backup metadata in {}: {}", dir.display(), msg))
        };

        let mut tool = None;
        let mut tool_version = None;
        let mut kind = None;
        let mut created_at = None;
        let mut label = None;
        let mut from_prefix = None;
        let mut to_prefix = None;
        let mut stores: Vec<CapturedStore> = Vec::new();
        let mut skipped = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(": ")
                .ok_or_else(|| invalid(format!("line {} is not `key: value`", lineno + 1)))?;

            match key {
                "tool" => tool = Some(value.to_string()),
                "version" => tool_version = Some(value.to_string()),
                "kind" => {
                    kind = Some(
                        BackupKind::parse(value)
                            .ok_or_else(|| invalid(format!("unknown kind '{}'", value)))?,
                    )
                }
                "created_at" => {
                    let parsed = DateTime::parse_from_rfc3339(value)
                        .map_err(|e| invalid(format!("bad created_at: {}", e)))?;
                    created_at = Some(parsed.with_timezone(&Utc));
                }
                "label" => label = Some(value.to_string()),
                "from_prefix" => from_prefix = Some(value.to_string()),
                "to_prefix" => to_prefix = Some(value.to_string()),
                "skipped" => skipped.push(PathBuf::from(value)),
                "store" => stores.push(CapturedStore {
                    name: value.to_string(),
                    source: PathBuf::new(),
                    sha256: String::new(),
                    bytes: 0,
                }),
                other => {
                    let Some(rest) = other.strip_prefix("store.") else {
                        // Unknown keys are tolerated so newer manifests stay readable
                        continue;
                    };
                    let (name, field) = rest
                        .rsplit_once('.')
                        .ok_or_else(|| invalid(format!("malformed key '{}'", other)))?;
                    let store = stores
                        .iter_mut()
                        .find(|s| s.name == name)
                        .ok_or_else(|| invalid(format!("'{}' before `store: {}`", other, name)))?;
                    match field {
                        "path" => store.source = PathBuf::from(value),
                        "sha256" => store.sha256 = value.to_lowercase(),
                        "bytes" => {
                            store.bytes = value
                                .parse()
                                .map_err(|_| invalid(format!("bad byte count '{}'", value)))?
                        }
                        _ => {}
                    }
                }
            }
        }

        if tool.as_deref() != Some(TOOL_NAME) {
            return Err(invalid("not written by rekey".to_string()));
        }
        for store in &stores {
            if store.source.as_os_str().is_empty() || store.sha256.len() != 64 {
                return Err(invalid(format!("store '{}' is missing path or sha256", store.name)));
            }
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            kind: kind.ok_or_else(|| invalid("missing kind".to_string()))?,
            created_at: created_at.ok_or_else(|| invalid("missing created_at".to_string()))?,
            tool_version: tool_version.unwrap_or_default(),
            label,
            from_prefix,
            to_prefix,
            stores,
            skipped,
        })
    }

    /// Write `metadata.txt` into the manifest's directory.
    pub fn write(&self) -> std::io::Result<()> {
        fs::write(self.dir.join(METADATA_FILE), self.to_metadata())
    }
}

/// Read the manifest of the backup in `dir`.
pub fn read_manifest(dir: &Path) -> Result<BackupManifest> {
    let path = dir.join(METADATA_FILE);
    if !path.is_file() {
        return Err(Error::Validation(format!(
            "not a rekey backup (missing {}): {}",
            METADATA_FILE,
            dir.display()
        )));
    }
    let text = fs::read_to_string(&path)?;
    BackupManifest::from_metadata(dir, &text)
}
