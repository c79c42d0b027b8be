//! Configuration for rekey.
//!
//! ## config.kdl
//!
//! Located at `--config PATH`, or `~/.config/rekey/config.kdl` when present.
//!
//! Contains:
//! - `mail-db` - Path of the agent-mail store
//! - `store-dir` - Directory holding the task store, relative to the project
//! - `task-db` - Task store file name inside `store-dir`
//! - `verify-backups` - Re-hash every backup copy from disk
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    DEFAULT_MAIL_DB, Resolved, Settings, SettingsOverrides, ValueSource, default_config_path,
    default_mail_db, resolve_settings, resolve_with,
};
pub use schema::RekeyConfig;
