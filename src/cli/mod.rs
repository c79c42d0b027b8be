//! CLI argument definitions for rekey.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Version string with build metadata.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("REKEY_GIT_COMMIT"),
    " ",
    env!("REKEY_BUILD_TIMESTAMP"),
    ")"
);

/// Rekey - rename the key prefix of a beads task store and its agent-mail store.
///
/// Every migration takes a checksummed backup first; every backup can be
/// restored with `rekey rollback`. Stop all other writers (agents, daemons,
/// editors) before running `migrate-prefix` or `rollback`.
#[derive(Parser, Debug)]
#[command(name = "rekey")]
#[command(author, version = VERSION, about = "Backup, prefix migration and rollback for beads task stores", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Log debug detail to stderr (RUST_LOG overrides)
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Settings file (KDL). Defaults to ~/.config/rekey/config.kdl when present
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Mail store selection shared by commands that touch both stores.
#[derive(Args, Debug, Clone, Default)]
pub struct MailArgs {
    /// Agent-mail store to include (default: ~/.mcp_agent_mail/storage.sqlite3)
    #[arg(long = "mail-db", value_name = "PATH", conflicts_with = "no_mail")]
    pub mail_db: Option<PathBuf>,

    /// Leave the agent-mail store out of this run
    #[arg(long = "no-mail")]
    pub no_mail: bool,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot the task store and mail store into a checksummed backup
    ///
    /// Backups are written to <project>/.beads/backups/backup_<timestamp>[_<label>]/.
    Backup {
        /// Project directory containing .beads/beads.db
        #[arg(long, value_name = "PATH")]
        project: PathBuf,

        /// Label appended to the backup directory name
        #[arg(long)]
        label: Option<String>,

        /// Re-read every copy from disk and compare checksums
        #[arg(long)]
        verify: bool,

        #[command(flatten)]
        mail: MailArgs,
    },

    /// Rename the key prefix of every task and every reference to it
    ///
    /// Runs validate, analyze, backup, migrate and post-validate. Key
    /// collisions abort before anything is written. Other writers must be
    /// stopped for the duration of the run.
    MigratePrefix {
        /// Current prefix (e.g., dirt)
        #[arg(long)]
        from: String,

        /// New prefix (e.g., chimaro)
        #[arg(long)]
        to: String,

        /// Project directory containing .beads/beads.db
        #[arg(long, value_name = "PATH")]
        project: PathBuf,

        /// Analyze and report only; write nothing, take no backup
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        mail: MailArgs,
    },

    /// Restore the stores recorded in a backup
    ///
    /// The current files are first saved to a pre-rollback snapshot inside
    /// the backup directory. Other writers must be stopped.
    Rollback {
        /// Backup directory to restore
        #[arg(long, value_name = "PATH")]
        backup: PathBuf,

        /// Verify backup checksums before restoring
        #[arg(long)]
        verify: bool,

        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// List a project's backups, newest first
    ListBackups {
        /// Project directory containing .beads/beads.db
        #[arg(long, value_name = "PATH")]
        project: PathBuf,
    },
}

impl Commands {
    /// Command name as typed on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Backup { .. } => "backup",
            Commands::MigratePrefix { .. } => "migrate-prefix",
            Commands::Rollback { .. } => "rollback",
            Commands::ListBackups { .. } => "list-backups",
        }
    }

    /// Arguments as JSON, for the journal.
    pub fn args_json(&self) -> serde_json::Value {
        match self {
            Commands::Backup {
                project,
                label,
                verify,
                mail,
            } => serde_json::json!({
                "project": project,
                "label": label,
                "verify": verify,
                "mail_db": mail.mail_db,
                "no_mail": mail.no_mail,
            }),
            Commands::MigratePrefix {
                from,
                to,
                project,
                dry_run,
                mail,
            } => serde_json::json!({
                "from": from,
                "to": to,
                "project": project,
                "dry_run": dry_run,
                "mail_db": mail.mail_db,
                "no_mail": mail.no_mail,
            }),
            Commands::Rollback {
                backup,
                verify,
                force,
            } => serde_json::json!({ "backup": backup, "verify": verify, "force": force }),
            Commands::ListBackups { project } => serde_json::json!({ "project": project }),
        }
    }
}
