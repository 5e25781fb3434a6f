//! Headless session flows against a fake launcher script.

use std::fs;

use chrono::Local;

use taskdeck::orchestrator::CommandKind;
use taskdeck::task::TaskId;
use taskdeck::{Error, Phase};

use crate::fixtures::{
    failure_response, read_invocations, success_response, write_crashing_launcher,
    write_fake_launcher, TestVault,
};

fn vault_with_launcher(response: String) -> TestVault {
    let mut vault = TestVault::new();
    let launcher = write_fake_launcher(&vault.temp_dir, &response);
    vault.config.launcher = Some(launcher.display().to_string());
    let project_dir = vault.temp_dir.path().join("project");
    fs::create_dir_all(&project_dir).unwrap();
    vault.config.vaults[0].project_path = Some(project_dir);
    vault
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_session_creates_and_persists_id() {
    let vault = vault_with_launcher(success_response("sess-100"));
    let path = vault.write_task("fix-login", "status: todo\n");
    let engine = vault.engine();

    let handle = engine
        .start_session("Personal", &TaskId::new("fix-login"))
        .await
        .unwrap();

    assert_eq!(handle.session_id, "sess-100");
    assert!(handle.handoff_command.ends_with("--resume sess-100"));
    assert_eq!(handle.task_title, "fix-login");

    // the id landed in the frontmatter and the index
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("session_id: sess-100"));
    let task = engine
        .get_task("Personal", &TaskId::new("fix-login"))
        .unwrap();
    assert_eq!(task.session_id.as_deref(), Some("sess-100"));

    // a fresh session never passes --resume
    let invocations = read_invocations(&vault.temp_dir);
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0].contains("-p /work-on-task \"24 Tasks/fix-login.md\""));
    assert!(!invocations[0].contains("--resume"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_start_is_a_resume_not_a_create() {
    let vault = vault_with_launcher(success_response("sess-old"));
    vault.write_task("fix-login", "status: todo\n");
    let engine = vault.engine();
    let task_id = TaskId::new("fix-login");

    let first = engine.start_session("Personal", &task_id).await.unwrap();
    let second = engine.start_session("Personal", &task_id).await.unwrap();

    // exactly one external create; the second call only builds the
    // resume command for the id the first one persisted
    assert_eq!(read_invocations(&vault.temp_dir).len(), 1);
    assert_eq!(second.session_id, first.session_id);
    assert!(second.handoff_command.ends_with("--resume sess-old"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_session_without_project_path_fails() {
    let mut vault = vault_with_launcher(success_response("sess-1"));
    vault.config.vaults[0].project_path = None;
    vault.write_task("fix-login", "status: todo\n");
    let engine = vault.engine();

    let result = engine
        .start_session("Personal", &TaskId::new("fix-login"))
        .await;
    assert!(matches!(result, Err(Error::MissingProjectPath { .. })));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_task_project_path_wins_over_vault_default() {
    let vault = vault_with_launcher(success_response("sess-2"));
    let task_project = vault.temp_dir.path().join("task-project");
    fs::create_dir_all(&task_project).unwrap();
    vault.write_task(
        "fix-login",
        &format!("status: todo\nproject: {}\n", task_project.display()),
    );
    let engine = vault.engine();

    let handle = engine
        .start_session("Personal", &TaskId::new("fix-login"))
        .await
        .unwrap();
    assert_eq!(handle.working_dir, task_project);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_success_keeps_phase() {
    let vault = vault_with_launcher(success_response("sess-3"));
    let path = vault.write_task("fix-login", "status: todo\nphase: in_progress\n");
    let engine = vault.engine();

    let outcome = engine
        .execute_command("Personal", &TaskId::new("fix-login"), CommandKind::CompleteTask)
        .await
        .unwrap();

    assert_eq!(outcome.success, Some(true));
    assert_eq!(outcome.session_id, "sess-3");
    assert_eq!(
        outcome.executed_command,
        "/complete-task \"24 Tasks/fix-login.md\" --tool"
    );
    assert_eq!(outcome.working_dir, vault.vault().path);

    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("phase: in_progress"));
    assert!(content.contains("session_id: sess-3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_failure_moves_task_to_human_review() {
    let vault = vault_with_launcher(failure_response("sess-4"));
    let path = vault.write_task("fix-login", "status: todo\nphase: done\n");
    let engine = vault.engine();

    let outcome = engine
        .execute_command("Personal", &TaskId::new("fix-login"), CommandKind::CompleteTask)
        .await
        .unwrap();

    assert_eq!(outcome.success, Some(false));
    assert_eq!(outcome.error.as_deref(), Some("simulated failure"));

    // failure overrides whatever phase the task was in
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("phase: human_review"));
    let task = engine
        .get_task("Personal", &TaskId::new("fix-login"))
        .unwrap();
    assert_eq!(task.display_phase(), Phase::HumanReview);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_launcher_crash_is_an_orchestration_error() {
    let mut vault = TestVault::new();
    let launcher = write_crashing_launcher(&vault.temp_dir);
    vault.config.launcher = Some(launcher.display().to_string());
    let path = vault.write_task(
        "fix-login",
        "status: todo\nphase: in_progress\nsession_id: sess-9\n",
    );
    let engine = vault.engine();

    let result = engine
        .execute_command("Personal", &TaskId::new("fix-login"), CommandKind::CompleteTask)
        .await;
    assert!(matches!(result, Err(Error::Orchestration(_))));

    // an infrastructure failure is not the session's verdict; the phase
    // stays where it was
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.contains("phase: in_progress"));
    let task = engine
        .get_task("Personal", &TaskId::new("fix-login"))
        .unwrap();
    assert_eq!(task.display_phase(), Phase::InProgress);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_defer_command_carries_tomorrows_date() {
    let vault = vault_with_launcher(success_response("sess-5"));
    vault.write_task("fix-login", "status: todo\n");
    let engine = vault.engine();

    engine
        .execute_command("Personal", &TaskId::new("fix-login"), CommandKind::DeferTask)
        .await
        .unwrap();

    let tomorrow = Local::now()
        .date_naive()
        .succ_opt()
        .unwrap()
        .format("%Y-%m-%d")
        .to_string();
    let invocations = read_invocations(&vault.temp_dir);
    assert!(invocations[0].contains("/defer-task"));
    assert!(invocations[0].contains(&tomorrow));
    assert!(invocations[0].contains("--tool"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_command_resumes_existing_session() {
    let vault = vault_with_launcher(success_response("sess-6"));
    vault.write_task("fix-login", "status: todo\nsession_id: sess-6\n");
    let engine = vault.engine();

    engine
        .execute_command("Personal", &TaskId::new("fix-login"), CommandKind::CompleteTask)
        .await
        .unwrap();

    let invocations = read_invocations(&vault.temp_dir);
    assert!(invocations[0].contains("--resume sess-6"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_session_then_fresh_start() {
    let vault = vault_with_launcher(success_response("sess-7"));
    vault.write_task("fix-login", "status: todo\nsession_id: sess-stale\n");
    let engine = vault.engine();

    engine
        .clear_session("Personal", &TaskId::new("fix-login"))
        .unwrap();
    engine
        .start_session("Personal", &TaskId::new("fix-login"))
        .await
        .unwrap();

    // after clearing, the start is a create, not a resume
    let invocations = read_invocations(&vault.temp_dir);
    assert_eq!(invocations.len(), 1);
    assert!(!invocations[0].contains("--resume"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_launcher_is_an_error() {
    let mut vault = TestVault::new();
    vault.config.launcher = Some("definitely-not-a-real-binary-xyz".to_string());
    let project_dir = vault.temp_dir.path().join("project");
    fs::create_dir_all(&project_dir).unwrap();
    vault.config.vaults[0].project_path = Some(project_dir);
    vault.write_task("fix-login", "status: todo\n");
    let engine = vault.engine();

    let result = engine
        .start_session("Personal", &TaskId::new("fix-login"))
        .await;
    assert!(matches!(result, Err(Error::LauncherNotFound { .. })));
}
