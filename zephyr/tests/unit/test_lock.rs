//! Lock coordinator tests against a local shell "server"

use tokio_test::{assert_err, assert_ok};

use zephyr::deploy::lock::{LockCoordinator, LockPayload, LockState};
use zephyr::errors::ZephyrError;

use crate::common::{Harness, ScriptedPrompter};

fn payload(user: &str, pid: u32) -> LockPayload {
    LockPayload {
        user: user.to_string(),
        pid,
        hostname: "laptop".to_string(),
        started_at: "2025-01-01T10:00:00+00:00".to_string(),
        run_id: Some("0b6a2c2e-5f7e-4d55-9a51-3d7f0f6f1c11".to_string()),
    }
}

fn write_payload(path: &std::path::Path, payload: &LockPayload) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_string(payload).unwrap()).unwrap();
}

fn read_payload(path: &std::path::Path) -> LockPayload {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_acquire_writes_both_markers_and_release_removes_them() {
    let h = Harness::laravel();
    let project = h.project_path();
    let prompter = ScriptedPrompter::default();
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    assert_ok!(lock.acquire().await);
    assert_eq!(lock.state(), LockState::Locked);

    let remote = read_payload(&h.remote_lock());
    let local = read_payload(h.layout.lock_file().path());
    assert_eq!(remote, local);
    assert_eq!(Some(&remote), lock.payload());
    assert_eq!(remote.pid, std::process::id());

    lock.release().await;
    assert_eq!(lock.state(), LockState::Released);
    assert!(!h.remote_lock().exists());
    assert!(!h.layout.lock_file().path().exists());
    assert!(prompter.asked().is_empty());
}

#[tokio::test]
async fn test_stale_lock_from_this_machine_is_reacquired_after_confirmation() {
    let h = Harness::laravel();
    let project = h.project_path();
    let stale = payload("dev", 999_999);
    write_payload(&h.remote_lock(), &stale);
    write_payload(h.layout.lock_file().path(), &stale);

    let prompter = ScriptedPrompter::new(&[true]);
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    assert_ok!(lock.acquire().await);

    assert_eq!(prompter.asked().len(), 1);
    let remote = read_payload(&h.remote_lock());
    assert!(!remote.same_instance(&stale));
    assert_eq!(remote, read_payload(h.layout.lock_file().path()));
    lock.release().await;
}

#[tokio::test]
async fn test_declined_stale_lock_is_a_conflict() {
    let h = Harness::laravel();
    let project = h.project_path();
    let stale = payload("dev", 999_999);
    write_payload(&h.remote_lock(), &stale);
    write_payload(h.layout.lock_file().path(), &stale);

    let prompter = ScriptedPrompter::new(&[false]);
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    let err = assert_err!(lock.acquire().await);
    assert!(matches!(err, ZephyrError::LockConflict { pid: 999_999, .. }));
    assert_eq!(lock.state(), LockState::Conflict);

    // A lock we never held is left alone
    lock.release().await;
    assert_eq!(read_payload(&h.remote_lock()), stale);
}

#[tokio::test]
async fn test_foreign_lock_always_conflicts_without_prompting() {
    let h = Harness::laravel();
    let project = h.project_path();
    write_payload(&h.remote_lock(), &payload("alice", 4242));
    write_payload(h.layout.lock_file().path(), &payload("dev", 4242));

    let prompter = ScriptedPrompter::new(&[true]);
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    let err = assert_err!(lock.acquire().await);
    assert!(err.to_string().contains("alice@laptop"));
    assert!(prompter.asked().is_empty());
    assert_eq!(read_payload(&h.remote_lock()).user, "alice");
}

#[tokio::test]
async fn test_remote_lock_without_local_copy_conflicts() {
    let h = Harness::laravel();
    let project = h.project_path();
    write_payload(&h.remote_lock(), &payload("dev", 77));

    let prompter = ScriptedPrompter::new(&[true]);
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    assert!(matches!(
        lock.acquire().await,
        Err(ZephyrError::LockConflict { pid: 77, .. })
    ));
    assert!(prompter.asked().is_empty());
}

#[tokio::test]
async fn test_second_acquirer_is_refused() {
    let h = Harness::laravel();
    let project = h.project_path();
    let prompter = ScriptedPrompter::default();

    let mut first = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);
    assert_ok!(first.acquire().await);

    // Another machine: same server, its own local metadata
    let other = tempfile::tempdir().unwrap();
    let other_layout = zephyr::storage::layout::ProjectLayout::new(other.path());
    let mut second = LockCoordinator::new(h.session(), &prompter, &other_layout, &project);
    assert_err!(second.acquire().await);

    first.release().await;
    assert_ok!(second.acquire().await);
    second.release().await;
}

#[tokio::test]
async fn test_failed_local_mirror_rolls_back_remote_lock() {
    let h = Harness::laravel();
    let project = h.project_path();
    // A directory where the local lock file belongs cannot be written
    std::fs::create_dir_all(h.layout.lock_file().path()).unwrap();

    let prompter = ScriptedPrompter::default();
    let mut lock = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);

    let err = assert_err!(lock.acquire().await);
    assert!(matches!(err, ZephyrError::IoError(_)));
    assert_eq!(lock.state(), LockState::Unlocked);
    assert!(!h.remote_lock().exists());

    // Nothing is left to lock the next run out
    std::fs::remove_dir(h.layout.lock_file().path()).unwrap();
    let mut next = LockCoordinator::new(h.session(), &prompter, &h.layout, &project);
    assert_ok!(next.acquire().await);
    next.release().await;
    assert!(prompter.asked().is_empty());
}
