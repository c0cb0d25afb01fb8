use std::fs;
use stepagent::runtime::{
    bootstrap_state_root, ownership_state, AgentLock, OwnershipState, RuntimeError, StatePaths,
};
use tempfile::tempdir;

#[test]
fn second_agent_on_same_state_root_is_refused() {
    let dir = tempdir().expect("tempdir");
    let paths = StatePaths::new(dir.path().join(".stepagent"));
    bootstrap_state_root(&paths).expect("bootstrap");

    let lock = AgentLock::acquire(&paths).expect("first lock");
    assert_eq!(
        ownership_state(&paths).expect("ownership"),
        OwnershipState::Running {
            pid: std::process::id()
        }
    );
    let err = AgentLock::acquire(&paths).expect_err("second lock");
    assert!(matches!(err, RuntimeError::AlreadyRunning { pid } if pid == lock.pid()));

    drop(lock);
    assert_eq!(
        ownership_state(&paths).expect("ownership"),
        OwnershipState::NotRunning
    );
}

#[test]
fn stale_lock_from_dead_process_is_replaced() {
    let dir = tempdir().expect("tempdir");
    let paths = StatePaths::new(dir.path().join(".stepagent"));
    bootstrap_state_root(&paths).expect("bootstrap");
    fs::write(paths.agent_lock_path(), "999999").expect("stale lock");
    assert_eq!(
        ownership_state(&paths).expect("ownership"),
        OwnershipState::Stale
    );

    let lock = AgentLock::acquire(&paths).expect("replace stale lock");
    let pid = fs::read_to_string(paths.agent_lock_path()).expect("read lock");
    assert_eq!(pid.trim(), lock.pid().to_string());
    let log = fs::read_to_string(paths.runtime_log_path()).expect("runtime log");
    assert!(log.contains("agent.lock.stale"));
}
