use std::fs;
use std::time::Duration;
use stepagent::queue::SqliteTaskQueue;
use stepagent::runtime::{
    bootstrap_state_root, MessageClass, PeriodicIntervals, PeriodicLogger, StatePaths,
};
use tempfile::tempdir;

const HOUR: i64 = 3600;

#[test]
fn repeated_message_reaches_central_log_once_per_interval() {
    let dir = tempdir().expect("tempdir");
    let paths = StatePaths::new(dir.path().join(".stepagent"));
    bootstrap_state_root(&paths).expect("bootstrap");
    let mut queue = SqliteTaskQueue::open(
        &paths.root.join("queue.sqlite3"),
        "pub-1",
        Duration::from_millis(100),
    )
    .expect("open queue");
    let message = "Flag file exists in the state root";
    let start = 1_700_000_000;

    let mut logger = PeriodicLogger::load(&paths, PeriodicIntervals::default());
    assert!(logger
        .log(&mut queue, MessageClass::CrashFlag, "error", message, start)
        .expect("log"));
    assert!(!logger
        .log(&mut queue, MessageClass::CrashFlag, "error", message, start + HOUR)
        .expect("log"));
    assert_eq!(queue.log_entries().expect("entries").len(), 1);

    // A new process picks up the persisted cache and still suppresses the repeat.
    let mut reloaded = PeriodicLogger::load(&paths, PeriodicIntervals::default());
    assert!(!reloaded
        .log(&mut queue, MessageClass::CrashFlag, "error", message, start + 3 * HOUR)
        .expect("log"));
    assert!(reloaded
        .log(&mut queue, MessageClass::CrashFlag, "error", message, start + 4 * HOUR)
        .expect("log"));

    let entries = queue.log_entries().expect("entries");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].posted_at, start + 4 * HOUR);

    let cache = fs::read_to_string(paths.periodic_messages_path()).expect("cache file");
    assert_eq!(cache, format!("{}\t{message}\n", start + 4 * HOUR));
}
