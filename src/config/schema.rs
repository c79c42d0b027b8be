//! KDL schema for `config.kdl`.
//!
//! ```kdl
//! // rekey settings
//! mail-db "/home/me/.mcp_agent_mail/storage.sqlite3"
//! store-dir ".beads"
//! task-db "beads.db"
//! verify-backups #true
//! ```
//!
//! Every key is optional. A relative `mail-db` is resolved against the
//! directory holding the config file.

use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Settings read from a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RekeyConfig {
    /// Mail store path
    pub mail_db: Option<PathBuf>,
    /// Directory holding the task store, relative to the project
    pub store_dir: Option<String>,
    /// Task store file name inside `store_dir`
    pub task_db: Option<String>,
    /// Re-hash backup copies from disk on every backup
    pub verify_backups: Option<bool>,
}

impl RekeyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for (key, value) in [
            ("store-dir", self.store_dir.as_deref()),
            ("task-db", self.task_db.as_deref()),
        ] {
            if let Some(value) = value {
                if !is_plain_relative(value) {
                    return Err(format!(
                        "{} must be a relative path inside the project, got: {}",
                        key, value
                    ));
                }
            }
        }
        if let Some(ref mail) = self.mail_db {
            if mail.as_os_str().is_empty() {
                return Err("mail-db must not be empty".to_string());
            }
        }
        Ok(())
    }

    /// Parse config from a KDL document. Unknown nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        if let Some(s) = string_arg(doc, "mail-db") {
            config.mail_db = Some(PathBuf::from(s));
        }
        config.store_dir = string_arg(doc, "store-dir");
        config.task_db = string_arg(doc, "task-db");

        if let Some(node) = doc.get("verify-backups") {
            config.verify_backups = node.entries().first().and_then(|e| e.value().as_bool());
        }

        config
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref mail) = self.mail_db {
            push_string(&mut doc, "mail-db", mail.to_string_lossy().to_string());
        }
        if let Some(ref dir) = self.store_dir {
            push_string(&mut doc, "store-dir", dir.clone());
        }
        if let Some(ref db) = self.task_db {
            push_string(&mut doc, "task-db", db.clone());
        }
        if let Some(verify) = self.verify_backups {
            let mut node = KdlNode::new("verify-backups");
            node.push(KdlEntry::new(KdlValue::Bool(verify)));
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let doc: KdlDocument = content.parse().map_err(|e| {
            Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_kdl(&doc);
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        if let (Some(mail), Some(base)) = (config.mail_db.as_ref(), path.parent()) {
            if mail.is_relative() {
                config.mail_db = Some(base.join(mail));
            }
        }
        Ok(config)
    }
}

fn string_arg(doc: &KdlDocument, name: &str) -> Option<String> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .and_then(|entry| entry.value().as_string())
        .map(|s| s.to_string())
}

fn push_string(doc: &mut KdlDocument, name: &str, value: String) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(KdlValue::String(value)));
    doc.nodes_mut().push(node);
}

/// Non-empty relative path without `..` components.
fn is_plain_relative(value: &str) -> bool {
    let path = Path::new(value);
    !value.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = RekeyConfig::default();
        assert_eq!(config.mail_db, None);
        assert_eq!(config.verify_backups, None);
    }

    #[test]
    fn test_config_from_kdl() {
        let kdl = r#"
            mail-db "/srv/mail/storage.sqlite3"
            store-dir ".tasks"
            task-db "tasks.db"
            verify-backups #true
            unknown-key "ignored"
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = RekeyConfig::from_kdl(&doc);
        assert_eq!(
            config.mail_db,
            Some(PathBuf::from("/srv/mail/storage.sqlite3"))
        );
        assert_eq!(config.store_dir.as_deref(), Some(".tasks"));
        assert_eq!(config.task_db.as_deref(), Some("tasks.db"));
        assert_eq!(config.verify_backups, Some(true));
    }

    #[test]
    fn test_config_kdl_roundtrip() {
        let config = RekeyConfig {
            mail_db: Some(PathBuf::from("/srv/mail.db")),
            store_dir: Some(".beads".to_string()),
            task_db: None,
            verify_backups: Some(false),
        };
        let doc = config.to_kdl();
        assert_eq!(RekeyConfig::from_kdl(&doc), config);
    }

    #[test]
    fn test_config_validate_rejects_escaping_paths() {
        for bad in ["../elsewhere", "/abs", ""] {
            let config = RekeyConfig {
                store_dir: Some(bad.to_string()),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{bad:?}");
        }
        let config = RekeyConfig {
            task_db: Some("nested/beads.db".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_resolves_relative_mail_db() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, "mail-db \"mail/storage.sqlite3\"\n").unwrap();

        let config = RekeyConfig::load(&path).unwrap();
        assert_eq!(
            config.mail_db,
            Some(dir.path().join("mail/storage.sqlite3"))
        );
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.kdl");
        std::fs::write(&path, "mail-db \"unterminated\n").unwrap();

        let err = RekeyConfig::load(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.exit_code(), crate::EXIT_VALIDATION);
    }
}
