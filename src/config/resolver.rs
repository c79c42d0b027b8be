//! Precedence resolution for settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (`--mail-db`, `--no-mail`)
//! 2. Config file (`--config PATH`, else `~/.config/rekey/config.kdl` if present)
//! 3. Built-in defaults
//!
//! Resolution happens once, in the binary. Everything below it receives
//! explicit [`Settings`].

use crate::config::RekeyConfig;
use crate::storage::{DEFAULT_STORE_DIR, DEFAULT_TASK_DB, ProjectLayout};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Default mail store location, relative to the home directory.
pub const DEFAULT_MAIL_DB: &str = ".mcp_agent_mail/storage.sqlite3";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from a config file
    ConfigFile(PathBuf),
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::ConfigFile(path) => write!(f, "config:{}", path.display()),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI flags that override the config file.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub mail_db: Option<PathBuf>,
    /// Leave the mail store out entirely
    pub no_mail: bool,
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub store_dir: Resolved<String>,
    pub task_db: Resolved<String>,
    /// `None` when no mail store takes part in the run
    pub mail_db: Option<Resolved<PathBuf>>,
    pub verify_backups: Resolved<bool>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: Resolved::new(DEFAULT_STORE_DIR.to_string(), ValueSource::Default),
            task_db: Resolved::new(DEFAULT_TASK_DB.to_string(), ValueSource::Default),
            mail_db: None,
            verify_backups: Resolved::new(false, ValueSource::Default),
        }
    }
}

impl Settings {
    pub fn mail_db(&self) -> Option<&Path> {
        self.mail_db.as_ref().map(|r| r.value.as_path())
    }

    /// Resolve the on-disk layout of `project` with these settings.
    pub fn layout(&self, project: &Path) -> Result<ProjectLayout> {
        ProjectLayout::resolve(
            project,
            &self.store_dir.value,
            &self.task_db.value,
            self.mail_db().map(Path::to_path_buf),
        )
    }
}

/// Default mail store path, if a home directory is known.
pub fn default_mail_db() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_MAIL_DB))
}

/// Default config file path, if a config directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("rekey").join("config.kdl"))
}

/// Load the config file and resolve settings with full precedence.
///
/// An explicit `config_path` must exist. The default config file is read only
/// when present.
pub fn resolve_settings(
    config_path: Option<&Path>,
    overrides: &SettingsOverrides,
) -> Result<Settings> {
    let (config, source) = match config_path {
        Some(path) => {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            (RekeyConfig::load(path)?, Some(path.to_path_buf()))
        }
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => (RekeyConfig::load(&path)?, Some(path)),
            None => (RekeyConfig::default(), None),
        },
    };

    let settings = resolve_with(&config, source, overrides, default_mail_db());
    tracing::debug!(?settings, "resolved settings");
    Ok(settings)
}

/// Merge an already loaded config with CLI overrides and defaults.
pub fn resolve_with(
    config: &RekeyConfig,
    config_source: Option<PathBuf>,
    overrides: &SettingsOverrides,
    default_mail: Option<PathBuf>,
) -> Settings {
    let mut result = Settings::default();
    let from_file = || match config_source {
        Some(ref path) => ValueSource::ConfigFile(path.clone()),
        None => ValueSource::Default,
    };

    if let Some(ref dir) = config.store_dir {
        result.store_dir = Resolved::new(dir.clone(), from_file());
    }
    if let Some(ref db) = config.task_db {
        result.task_db = Resolved::new(db.clone(), from_file());
    }
    if let Some(verify) = config.verify_backups {
        result.verify_backups = Resolved::new(verify, from_file());
    }

    result.mail_db = if overrides.no_mail {
        None
    } else if let Some(ref mail) = overrides.mail_db {
        Some(Resolved::new(mail.clone(), ValueSource::CliFlag))
    } else if let Some(ref mail) = config.mail_db {
        Some(Resolved::new(mail.clone(), from_file()))
    } else {
        default_mail.map(|mail| Resolved::new(mail, ValueSource::Default))
    };

    result
}
