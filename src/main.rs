//! Rekey CLI - backup, identifier-prefix migration and rollback for task stores.

use clap::Parser;
use rekey::action_log::{self, ActionLog};
use rekey::cli::{Cli, Commands, MailArgs};
use rekey::commands::{self, Output};
use rekey::config::{SettingsOverrides, resolve_settings};
use rekey::migrate::MigrationOptions;
use rekey::rollback::{RollbackOptions, RollbackPlan};
use rekey::storage::BACKUP_DIR;
use rekey::{EXIT_BACKUP, EXIT_OK, Error};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Where the journal entry for this run goes, filled in as the run resolves paths.
#[derive(Default)]
struct JournalTarget {
    path: Option<PathBuf>,
    backup: Option<PathBuf>,
    /// Project whose stores a failed run left untouched
    project: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let human = cli.human_readable;

    // Serialize command for the journal
    let cmd_name = cli.command.name();
    let args_json = cli.command.args_json();

    let start = Instant::now();
    let mut journal = JournalTarget::default();
    let result = run_command(cli.command, cli.config.as_deref(), human, &mut journal);
    let duration = start.elapsed().as_millis() as u64;

    let exit_code = match &result {
        Ok(()) => EXIT_OK,
        Err(e) => command_exit_code(cmd_name, e),
    };

    if let Some(ref path) = journal.path {
        let backup = journal.backup.clone().or_else(|| {
            result
                .as_ref()
                .err()
                .and_then(|e| e.recovery_backup().map(Path::to_path_buf))
        });
        let entry = ActionLog::new(cmd_name, args_json, exit_code, duration)
            .with_error(result.as_ref().err().map(|e| e.to_string()))
            .with_backup(backup);
        if let Err(e) = action_log::log_action(path, &entry) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write journal");
        }
    }

    if let Err(e) = result {
        report_error(&e, exit_code, human, journal.project.as_deref());
    }
    process::exit(exit_code);
}

/// Log to stderr so stdout carries only command output.
fn init_tracing(verbose: bool) {
    let default = if verbose { "rekey=debug" } else { "rekey=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run_command(
    command: Commands,
    config: Option<&Path>,
    human: bool,
    journal: &mut JournalTarget,
) -> Result<(), Error> {
    match command {
        Commands::Backup {
            project,
            label,
            verify,
            mail,
        } => {
            let settings = resolve_settings(config, &overrides(&mail))?;
            let layout = settings.layout(&project)?;
            journal.path = Some(action_log::journal_path(&layout.backup_root()));

            let verify = verify || settings.verify_backups.value;
            let result = commands::backup(&layout, label, verify)?;
            journal.backup = Some(result.backup.dir.clone());
            output(&result, human);
        }

        Commands::MigratePrefix {
            from,
            to,
            project,
            dry_run,
            mail,
        } => {
            journal.project = Some(project.clone());
            let settings = resolve_settings(config, &overrides(&mail))?;
            let layout = settings.layout(&project)?;
            journal.path = Some(action_log::journal_path(&layout.backup_root()));
            journal.project = Some(layout.project.clone());

            let options = MigrationOptions {
                dry_run,
                verify_backup: settings.verify_backups.value,
            };
            let result = commands::migrate_prefix(&layout, &from, &to, &options)?;
            journal.backup = result.report.backup.as_ref().map(|b| b.dir.clone());
            output(&result, human);
        }

        Commands::Rollback {
            backup,
            verify,
            force,
        } => {
            if backup.is_dir() {
                journal.path = Some(action_log::journal_path(&backup_root_of(&backup)));
            }
            journal.backup = Some(backup.clone());

            let options = RollbackOptions { verify, force };
            let result = commands::rollback(&backup, &options, confirm_on_stdin)?;
            output(&result, human);
        }

        Commands::ListBackups { project } => {
            let settings = resolve_settings(
                config,
                &SettingsOverrides {
                    mail_db: None,
                    no_mail: true,
                },
            )?;
            let layout = settings.layout(&project)?;
            let result = commands::list_backups(&layout)?;
            output(&result, human);
        }
    }
    Ok(())
}

fn overrides(mail: &MailArgs) -> SettingsOverrides {
    SettingsOverrides {
        mail_db: mail.mail_db.clone(),
        no_mail: mail.no_mail,
    }
}

/// Exit code for a failed command.
///
/// `backup` fails only with 3. `rollback` fails with 1 when nothing was
/// touched and 3 otherwise.
fn command_exit_code(command: &str, err: &Error) -> i32 {
    match command {
        "backup" => EXIT_BACKUP,
        "rollback" if !err.is_validation() => EXIT_BACKUP,
        _ => err.exit_code(),
    }
}

/// Backup root a backup directory lives under.
///
/// Safety snapshots sit one level deeper, inside the backup they protect.
fn backup_root_of(backup: &Path) -> PathBuf {
    backup
        .ancestors()
        .skip(1)
        .find(|dir| dir.file_name().is_some_and(|n| n == BACKUP_DIR))
        .or_else(|| backup.parent())
        .unwrap_or(backup)
        .to_path_buf()
}

/// Ask on stderr/stdin whether to go ahead with a rollback.
fn confirm_on_stdin(plan: &RollbackPlan) -> rekey::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "{}Proceed? [y/N] ", commands::describe_plan(plan))?;
    stderr.flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn report_error(err: &Error, exit_code: i32, human: bool, project: Option<&Path>) {
    let hint = commands::recovery_hint(err, project);
    if human {
        eprintln!("Error: {}", err);
        if let Some(hint) = hint {
            eprintln!("\n{}", hint);
        }
    } else {
        let mut json = serde_json::json!({
            "error": err.to_string(),
            "exit_code": exit_code,
        });
        if let Some(dir) = err.recovery_backup() {
            json["backup"] = serde_json::json!(dir);
        }
        if let Some(command) = commands::recovery_command(err, project) {
            json["recovery_command"] = serde_json::json!(command);
        }
        eprintln!("{}", json);
    }
}
