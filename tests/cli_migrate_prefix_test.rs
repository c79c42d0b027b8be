//! Integration tests for `rekey migrate-prefix`.

mod common;

use common::{TestEnv, parse_json, sha256};
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Output;

fn migrate(env: &TestEnv, from: &str, to: &str) -> assert_cmd::Command {
    let mut cmd = env.rekey();
    cmd.args([
        "migrate-prefix",
        "--from",
        from,
        "--to",
        to,
        "--project",
        &env.project_arg(),
    ]);
    cmd
}

/// The JSON error report printed on stderr.
fn error_json(output: &Output) -> serde_json::Value {
    let line = output
        .stderr
        .split(|b| *b == b'\n')
        .find(|l| l.starts_with(b"{"))
        .unwrap();
    serde_json::from_slice(line).unwrap()
}

fn sidecar(db: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", db.display(), suffix))
}

/// The production scenario: 389 `dirt` issues with 15 dependency edges.
fn dirt_project() -> TestEnv {
    let env = TestEnv::with_issues("dirt", 389, 15);
    env.tasks()
        .execute_batch(
            "INSERT INTO labels VALUES ('dirt-1', 'backend'), ('dirt-2', 'ui');
             INSERT INTO comments (issue_id, text) VALUES ('dirt-3', 'see dirt-4');
             INSERT INTO config VALUES ('issue_prefix', 'dirt');",
        )
        .unwrap();
    env.add_message("dirt-1");
    env.add_message("dirt-200");
    env.add_message("lobby");
    env.add_reservation("working on dirt-17");
    env.add_reservation("refactor");
    env
}

#[test]
fn test_dirt_to_chimaro_end_to_end() {
    let env = dirt_project();

    let output = migrate(&env, "dirt", "chimaro").output().unwrap();
    assert!(output.status.success(), "{:?}", output);
    let json = parse_json(&output.stdout);
    assert_eq!(json["phase"], "post-validated");
    assert_eq!(json["analysis"]["tasks"]["issues_matching"], 389);
    assert_eq!(json["analysis"]["tasks"]["dependencies_total"], 15);
    assert_eq!(json["analysis"]["tasks"]["collisions"], 0);

    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id LIKE 'chimaro-%'"),
        389
    );
    assert_eq!(env.count_tasks("SELECT COUNT(*) FROM issues"), 389);
    assert_eq!(env.count_tasks("SELECT COUNT(*) FROM dependencies"), 15);
    assert_eq!(
        env.count_tasks(
            "SELECT COUNT(*) FROM dependencies
             WHERE issue_id LIKE 'chimaro-%' AND depends_on_id LIKE 'chimaro-%'"
        ),
        15
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM labels WHERE issue_id LIKE 'chimaro-%'"),
        2
    );
    let setting: String = env
        .tasks()
        .query_row(
            "SELECT value FROM config WHERE key = 'issue_prefix'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(setting, "chimaro");

    assert_eq!(
        env.count_mail("SELECT COUNT(*) FROM messages WHERE thread_id LIKE 'chimaro-%'"),
        2
    );
    let reason: String = env
        .mail()
        .query_row(
            "SELECT reason FROM file_reservations ORDER BY id LIMIT 1",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(reason, "working on chimaro-17");
}

#[test]
fn test_no_residue_after_migration() {
    let env = dirt_project();
    migrate(&env, "dirt", "chimaro").assert().success();

    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE substr(id, 1, 5) = 'dirt-'"),
        0
    );
    assert_eq!(
        env.count_tasks(
            "SELECT COUNT(*) FROM dependencies
             WHERE substr(issue_id, 1, 5) = 'dirt-' OR substr(depends_on_id, 1, 5) = 'dirt-'"
        ),
        0
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM comments WHERE substr(issue_id, 1, 5) = 'dirt-'"),
        0
    );
    assert_eq!(
        env.count_mail("SELECT COUNT(*) FROM messages WHERE substr(thread_id, 1, 5) = 'dirt-'"),
        0
    );
    // Dependency edges all resolve
    assert_eq!(
        env.count_tasks(
            "SELECT COUNT(*) FROM dependencies d
             WHERE NOT EXISTS (SELECT 1 FROM issues i WHERE i.id = d.depends_on_id)"
        ),
        0
    );
}

#[test]
fn test_migration_takes_backup_first() {
    let env = dirt_project();
    let tasks_before = sha256(&env.task_db());
    let mail_before = sha256(&env.mail_db());

    let output = migrate(&env, "dirt", "chimaro").output().unwrap();
    let json = parse_json(&output.stdout);
    let dir = std::path::PathBuf::from(json["backup"]["dir"].as_str().unwrap());
    let name = dir.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("migrate_"), "{name}");

    assert_eq!(sha256(&dir.join("beads.backup")), tasks_before);
    assert_eq!(sha256(&dir.join("agent_mail.backup")), mail_before);
    let metadata = fs::read_to_string(dir.join("metadata.txt")).unwrap();
    assert!(metadata.contains("from_prefix: dirt"));
    assert!(metadata.contains("to_prefix: chimaro"));
    assert!(
        json["rollback_command"]
            .as_str()
            .unwrap()
            .contains(dir.to_str().unwrap())
    );
}

#[test]
fn test_dry_run_changes_nothing() {
    let env = dirt_project();
    let tasks_before = sha256(&env.task_db());
    let mail_before = sha256(&env.mail_db());

    let output = migrate(&env, "dirt", "chimaro")
        .arg("--dry-run")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert_eq!(json["dry_run"], true);
    assert_eq!(json["phase"], "analyzed");
    assert_eq!(json["analysis"]["tasks"]["issues_matching"], 389);
    assert_eq!(json["analysis"]["mail"]["thread_refs"], 2);

    assert_eq!(sha256(&env.task_db()), tasks_before);
    assert_eq!(sha256(&env.mail_db()), mail_before);
    assert!(env.backups().is_empty());
}

#[test]
fn test_dry_run_leaves_unflushed_wal_alone() {
    let source = TestEnv::with_issues("dirt", 20, 5);
    let writer = source.tasks();
    writer
        .execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA wal_autocheckpoint = 0;
             INSERT INTO issues (id, title) VALUES ('dirt-21', 'late');",
        )
        .unwrap();

    // Carry the store over with its frames still in the WAL, as after a crash
    let env = TestEnv::new();
    for suffix in ["", "-wal", "-shm"] {
        fs::copy(
            sidecar(&source.task_db(), suffix),
            sidecar(&env.task_db(), suffix),
        )
        .unwrap();
    }
    drop(writer);
    let before = sha256(&env.task_db());

    let output = migrate(&env, "dirt", "chimaro")
        .args(["--dry-run", "--no-mail"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{:?}", output);
    let json = parse_json(&output.stdout);
    assert_eq!(json["analysis"]["tasks"]["issues_matching"], 21);

    assert_eq!(sha256(&env.task_db()), before, "dry run changed the store file");
    assert!(sidecar(&env.task_db(), "-wal").exists());
    assert!(env.backups().is_empty());
}

#[test]
fn test_collision_exits_1_with_zero_writes() {
    let env = TestEnv::with_issues("dirt", 5, 2);
    env.add_issues("chimaro", 1, 0);
    let tasks_before = sha256(&env.task_db());
    let mail_before = sha256(&env.mail_db());

    migrate(&env, "dirt", "chimaro")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("dirt-1 -> chimaro-1"));

    assert_eq!(sha256(&env.task_db()), tasks_before);
    assert_eq!(sha256(&env.mail_db()), mail_before);
    assert!(env.backups().is_empty());
}

#[test]
fn test_collision_suggests_backup_command() {
    let env = TestEnv::with_issues("dirt", 3, 0);
    env.add_issues("chimaro", 1, 0);

    let output = migrate(&env, "dirt", "chimaro").output().unwrap();
    assert_eq!(output.status.code(), Some(1));

    let err = error_json(&output);
    assert!(err.get("backup").is_none());
    let command = err["recovery_command"].as_str().unwrap();
    assert!(command.starts_with("rekey backup --project "), "{command}");
    assert!(command.ends_with(" --verify"));
    let project = env.path().file_name().unwrap().to_str().unwrap();
    assert!(command.contains(project), "{command}");
}

#[test]
fn test_missing_task_store_prints_backup_hint() {
    let env = TestEnv::new();
    fs::remove_file(env.task_db()).unwrap();

    env.rekey()
        .args([
            "-H",
            "migrate-prefix",
            "--from",
            "dirt",
            "--to",
            "chimaro",
            "--project",
            &env.project_arg(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No store was changed."))
        .stderr(predicate::str::contains(format!(
            "rekey backup --project {} --verify",
            env.project_arg()
        )));
}

#[test]
fn test_collision_fails_dry_run_too() {
    let env = TestEnv::with_issues("dirt", 2, 0);
    env.add_issues("chimaro", 2, 0);
    migrate(&env, "dirt", "chimaro")
        .arg("--dry-run")
        .assert()
        .code(1);
}

#[test]
fn test_invalid_prefixes_exit_1() {
    let env = TestEnv::with_issues("dirt", 1, 0);
    for (from, to) in [
        ("dirt", "dirt"),
        ("Dirt", "chimaro"),
        ("dirt", "chi maro"),
        ("dirt", "dirt-x"),
        ("dirt", "chimaro-"),
    ] {
        migrate(&env, from, to).assert().code(1);
    }
    assert!(env.backups().is_empty());
}

#[test]
fn test_missing_task_store_exits_1() {
    let env = TestEnv::new();
    fs::remove_file(env.task_db()).unwrap();
    migrate(&env, "dirt", "chimaro")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no task store found"));
}

#[test]
fn test_lookalike_prefixes_are_untouched() {
    let env = TestEnv::with_issues("dirt", 3, 1);
    env.add_issues("dirty", 2, 1);
    env.add_issues("xdirt", 1, 0);

    migrate(&env, "dirt", "chimaro").assert().success();

    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id LIKE 'dirty-%'"),
        2
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id = 'xdirt-1'"),
        1
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM dependencies WHERE issue_id = 'dirty-2'"),
        1
    );
}

#[test]
fn test_nothing_to_migrate_succeeds_without_backup() {
    let env = TestEnv::with_issues("other", 3, 1);
    let before = sha256(&env.task_db());

    env.rekey()
        .args([
            "-H",
            "migrate-prefix",
            "--from",
            "dirt",
            "--to",
            "chimaro",
            "--project",
            &env.project_arg(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes made"));

    assert_eq!(sha256(&env.task_db()), before);
    assert!(env.backups().is_empty());
}

#[test]
fn test_no_mail_leaves_mail_store_alone() {
    let env = dirt_project();
    let mail_before = sha256(&env.mail_db());

    let output = migrate(&env, "dirt", "chimaro")
        .arg("--no-mail")
        .output()
        .unwrap();
    assert!(output.status.success());
    let json = parse_json(&output.stdout);
    assert!(json["analysis"].get("mail").is_none());
    assert_eq!(sha256(&env.mail_db()), mail_before);
}

#[test]
fn test_mail_failure_exits_2_and_names_backup() {
    let env = TestEnv::with_issues("dirt", 3, 1);
    env.mail()
        .execute_batch(
            "CREATE TRIGGER frozen BEFORE UPDATE ON messages
             BEGIN SELECT RAISE(ABORT, 'messages are frozen'); END;",
        )
        .unwrap();
    env.add_message("dirt-1");

    let output = migrate(&env, "dirt", "chimaro").output().unwrap();
    assert_eq!(output.status.code(), Some(2));

    let err = error_json(&output);
    let command = err["recovery_command"].as_str().unwrap();
    assert!(command.starts_with("rekey rollback --backup "));
    assert!(command.ends_with(" --verify"));
    assert!(err["error"].as_str().unwrap().contains("agent_mail"));

    let journal = fs::read_to_string(env.backup_root().join("rekey.log")).unwrap();
    let entry: serde_json::Value = serde_json::from_str(journal.lines().last().unwrap()).unwrap();
    assert_eq!(entry["exit_code"], 2);
    assert_eq!(entry["backup"], err["backup"]);
}

#[test]
fn test_post_validation_failure_exits_2_and_keeps_migrated_state() {
    let env = TestEnv::with_issues("dirt", 5, 2);
    env.tasks()
        .execute_batch(
            "CREATE TRIGGER drift AFTER UPDATE OF id ON issues WHEN NEW.id = 'chimaro-1'
             BEGIN INSERT INTO issues (id, title) VALUES ('stray-1', 'stray'); END;",
        )
        .unwrap();

    let output = migrate(&env, "dirt", "chimaro")
        .arg("--no-mail")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));

    let err = error_json(&output);
    let message = err["error"].as_str().unwrap();
    assert!(message.contains("Post-migration validation failed"), "{message}");
    assert!(message.contains("total issues: expected 5, found 6"), "{message}");
    assert_eq!(err["exit_code"], 2);

    let backup = PathBuf::from(err["backup"].as_str().unwrap());
    assert!(backup.join("beads.backup").is_file());
    assert_eq!(
        err["recovery_command"],
        format!("rekey rollback --backup {} --verify", backup.display())
    );

    // The committed rewrite stays for the operator to inspect or roll back
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id LIKE 'chimaro-%'"),
        5
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id = 'stray-1'"),
        1
    );
    assert_eq!(
        env.count_tasks("SELECT COUNT(*) FROM issues WHERE id LIKE 'dirt-%'"),
        0
    );
}

#[test]
fn test_human_output_reports_counts() {
    let env = dirt_project();
    env.rekey()
        .args([
            "-H",
            "migrate-prefix",
            "--from",
            "dirt",
            "--to",
            "chimaro",
            "--project",
            &env.project_arg(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Migration: dirt -> chimaro"))
        .stdout(predicate::str::contains("389 matching of 389"))
        .stdout(predicate::str::contains("Undo with:"));
}
