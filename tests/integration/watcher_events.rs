//! Live filesystem watching: raw changes become semantic events.

use std::fs;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use taskdeck::{EventKind, Subscription, TaskEvent};

use crate::fixtures::TestVault;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

async fn next_event(sub: &Subscription) -> TaskEvent {
    timeout(EVENT_TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for event")
}

async fn assert_quiet(sub: &Subscription) {
    let result = timeout(Duration::from_millis(700), sub.recv()).await;
    assert!(result.is_err(), "expected no event, got {:?}", result);
}

/// Let the coalescing window pass between filesystem operations so each
/// one settles into its own event.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(250)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_create_modify_delete_lifecycle() {
    let vault = TestVault::new();
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    let path = vault.write_task("alpha", "status: todo\n");
    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Created);
    assert_eq!(event.task_id.as_ref().unwrap().as_str(), "alpha");
    assert_eq!(event.vault.as_deref(), Some("Personal"));
    settle().await;

    fs::write(&path, "---\nstatus: in_progress\n---\n\nnew body\n").unwrap();
    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Modified);
    settle().await;

    fs::remove_file(&path).unwrap();
    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Deleted);
    assert_eq!(event.task_id.as_ref().unwrap().as_str(), "alpha");

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_identical_rewrite_is_suppressed() {
    let vault = TestVault::new();
    vault.write_task("alpha", "status: todo\n");
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    // byte-identical rewrite: the digest matches, no event
    vault.write_task("alpha", "status: todo\n");
    assert_quiet(&sub).await;

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rename_becomes_moved() {
    let vault = TestVault::new();
    let from = vault.write_task("old-name", "status: todo\n");
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    fs::rename(&from, vault.task_path("new-name")).unwrap();
    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Moved);
    assert_eq!(event.old_task_id.as_ref().unwrap().as_str(), "old-name");
    assert_eq!(event.task_id.as_ref().unwrap().as_str(), "new-name");

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rename_with_immediate_edit_keeps_one_record() {
    let vault = TestVault::new();
    let from = vault.write_task("old-name", "status: todo\n");
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    // an edit landing in the same coalescing window as the rename must not
    // erase the rename's old side
    let to = vault.task_path("new-name");
    fs::rename(&from, &to).unwrap();
    fs::write(&to, "---\nstatus: todo\n---\n\nedited right after\n").unwrap();

    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Moved);
    assert_eq!(event.old_task_id.as_ref().unwrap().as_str(), "old-name");
    assert_eq!(event.task_id.as_ref().unwrap().as_str(), "new-name");

    // no ghost record under the old id, and the index has the fresh content
    assert!(engine
        .get_task("Personal", &taskdeck::TaskId::new("old-name"))
        .is_err());
    let task = engine
        .get_task("Personal", &taskdeck::TaskId::new("new-name"))
        .unwrap();
    assert_eq!(task.description.as_deref(), Some("edited right after"));

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_degraded_vault_recovers_when_directory_appears() {
    let mut vault = TestVault::new();
    vault.config.rescan_interval_secs = 1;
    fs::remove_dir_all(vault.vault().tasks_dir()).unwrap();

    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    // the tasks folder comes back with a task in it; the periodic rescan
    // picks it up, re-arms the watcher, and announces a resync
    vault.write_task("alpha", "status: todo\n");
    loop {
        let _ = next_event(&sub).await;
        if engine
            .get_task("Personal", &taskdeck::TaskId::new("alpha"))
            .is_ok()
        {
            break;
        }
    }

    // the watcher is live again: a new file produces a real event
    vault.write_task("beta", "status: todo\n");
    loop {
        let event = next_event(&sub).await;
        if event.kind == EventKind::Created
            && event.task_id.as_ref().map(|t| t.as_str()) == Some("beta")
        {
            break;
        }
    }

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_non_task_files_are_ignored() {
    let vault = TestVault::new();
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    fs::write(vault.vault().tasks_dir().join("notes.txt"), "not a task").unwrap();
    assert_quiet(&sub).await;

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_burst_of_writes_coalesces_into_one_event() {
    let vault = TestVault::new();
    vault.write_task("alpha", "status: todo\n");
    let engine = vault.engine();
    let cancel = CancellationToken::new();
    let handle = engine.start_watchers(cancel.clone()).unwrap();
    let sub = engine.subscribe(None).unwrap();

    // several writes inside one coalescing window
    let path = vault.task_path("alpha");
    for i in 0..5 {
        fs::write(&path, format!("---\nstatus: todo\n---\nrev {}\n", i)).unwrap();
    }

    let event = next_event(&sub).await;
    assert_eq!(event.kind, EventKind::Modified);
    assert_quiet(&sub).await;

    // the index holds the final revision
    let task = engine
        .get_task("Personal", &taskdeck::TaskId::new("alpha"))
        .unwrap();
    assert_eq!(task.description.as_deref(), Some("rev 4"));

    handle.shutdown();
}
