//! Snapshot manager tests

use zephyr::deploy::snapshot::{resume_decision, SnapshotManager};
use zephyr::models::plan::{PendingSnapshot, TaskStep};
use zephyr::prompt::Decision;

use crate::common::{Harness, ScriptedPrompter};

fn snapshot(h: &Harness) -> PendingSnapshot {
    PendingSnapshot::new(
        &h.target(),
        vec!["composer.json".to_string()],
        vec![
            TaskStep::new("Pull latest changes for main", "git pull origin main"),
            TaskStep::new("Install Composer dependencies", "composer install --no-dev"),
        ],
    )
}

#[tokio::test]
async fn test_save_mirrors_snapshot_to_server() {
    let h = Harness::laravel();
    let project = h.project_path();
    let manager = SnapshotManager::new(h.session(), &h.layout, &project);
    let saved = snapshot(&h);

    manager.save(&saved).await.unwrap();

    let remote: PendingSnapshot =
        serde_json::from_str(&std::fs::read_to_string(h.remote_snapshot()).unwrap()).unwrap();
    assert_eq!(remote, saved);
    assert_eq!(manager.load().await.unwrap(), Some(saved));
}

#[tokio::test]
async fn test_load_falls_back_to_remote_copy() {
    let h = Harness::laravel();
    let project = h.project_path();
    let manager = SnapshotManager::new(h.session(), &h.layout, &project);
    let saved = snapshot(&h);

    manager.save(&saved).await.unwrap();
    std::fs::remove_file(h.layout.snapshot_file().path()).unwrap();

    assert_eq!(manager.load().await.unwrap(), Some(saved));
    assert!(h.layout.snapshot_file().path().exists());
}

#[tokio::test]
async fn test_clear_removes_both_copies() {
    let h = Harness::laravel();
    let project = h.project_path();
    let manager = SnapshotManager::new(h.session(), &h.layout, &project);

    manager.save(&snapshot(&h)).await.unwrap();
    manager.clear().await.unwrap();

    assert!(!h.remote_snapshot().exists());
    assert!(!h.layout.snapshot_file().path().exists());
    assert_eq!(manager.load().await.unwrap(), None);

    // Clearing twice is fine
    manager.clear().await.unwrap();
}

#[tokio::test]
async fn test_resume_default_follows_target_match() {
    let h = Harness::laravel();
    let pending = snapshot(&h);

    // Defaults only: resume when server and branch match
    let prompter = ScriptedPrompter::default();
    assert_eq!(
        resume_decision(&prompter, &pending, &h.target()).await.unwrap(),
        Decision::Resume
    );

    let mut other_branch = h.target();
    other_branch.branch = "develop".to_string();
    assert_eq!(
        resume_decision(&prompter, &pending, &other_branch).await.unwrap(),
        Decision::Proceed
    );

    let asked = prompter.asked();
    assert_eq!(asked.len(), 2);
    assert!(asked[0].contains("Install Composer dependencies"));
    assert!(asked[1].contains("does not match"));
}
