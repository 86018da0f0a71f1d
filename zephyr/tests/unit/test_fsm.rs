//! FSM unit tests

use zephyr::deploy::fsm::{DeployEvent, DeployState, DeploymentFsm};

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeployState::Precheck);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_failure_from_every_remote_state_goes_through_cleanup() {
    let path = [
        DeployEvent::PrecheckPassed,
        DeployEvent::Connected,
        DeployEvent::LockAcquired,
        DeployEvent::Planned { persist: true },
        DeployEvent::SnapshotSaved,
    ];

    for depth in 1..=path.len() {
        let mut fsm = DeploymentFsm::new();
        for event in &path[..depth] {
            fsm.process(event.clone()).unwrap();
        }

        let failing = fsm.state();
        assert_eq!(
            fsm.process(DeployEvent::Fail("boom".to_string())).unwrap(),
            DeployState::Cleanup,
            "failing from {:?}",
            failing
        );
        assert_eq!(
            fsm.process(DeployEvent::CleanupFinished).unwrap(),
            DeployState::Failed
        );
        assert_eq!(fsm.error(), Some("boom"));
    }
}

#[test]
fn test_fsm_terminal_states_reject_events() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeployEvent::PrecheckPassed).unwrap();
    fsm.process(DeployEvent::Connected).unwrap();
    fsm.process(DeployEvent::LockAcquired).unwrap();
    fsm.process(DeployEvent::Planned { persist: false }).unwrap();
    fsm.process(DeployEvent::StepsCompleted).unwrap();
    fsm.process(DeployEvent::CleanupFinished).unwrap();
    assert_eq!(fsm.state(), DeployState::Done);

    assert!(fsm.process(DeployEvent::Fail("late".to_string())).is_err());
    assert!(fsm.process(DeployEvent::PrecheckPassed).is_err());
    assert_eq!(fsm.state(), DeployState::Done);
}

#[test]
fn test_fsm_state_serialization() {
    let json = serde_json::to_string(&DeployState::Snapshotting).unwrap();
    assert_eq!(json, "\"snapshotting\"");
}
